//! File-backed card store.
//!
//! One JSON file per deck under `decks/`, plus a single `schemas.json`.
//! Writes go through a temp file and rename so a crash never leaves a
//! half-written deck behind.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use mnemo_core::error::{Error, Result};
use mnemo_core::models::{Card, CardSchema};
use mnemo_core::store::CardStore;

const DECKS_DIR: &str = "decks";
const SCHEMAS_FILE: &str = "schemas.json";

pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(DECKS_DIR))?;
        Ok(Self { root })
    }

    fn deck_path(&self, scope: &str) -> Result<PathBuf> {
        // deck names become file names; Anki's "::" separator is safe,
        // path separators are not
        if scope.is_empty() || scope.contains('/') || scope.contains('\\') {
            return Err(Error::Store(format!("invalid deck name '{scope}'")));
        }
        Ok(self.root.join(DECKS_DIR).join(format!("{scope}.json")))
    }

    fn schemas_path(&self) -> PathBuf {
        self.root.join(SCHEMAS_FILE)
    }

    fn load_schemas(&self) -> Result<BTreeMap<String, CardSchema>> {
        let path = self.schemas_path();
        if !path.is_file() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl CardStore for JsonDirStore {
    fn all_cards(&self, scope: &str) -> Result<Vec<Card>> {
        let path = self.deck_path(scope)?;
        if !path.is_file() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    fn save_cards(&mut self, scope: &str, cards: &[Card]) -> Result<()> {
        for card in cards {
            if card.deck != scope {
                return Err(Error::Store(format!(
                    "card {} belongs to deck '{}', not '{scope}'",
                    card.id, card.deck
                )));
            }
        }
        let path = self.deck_path(scope)?;
        Self::write_atomic(&path, &serde_json::to_vec_pretty(cards)?)
    }

    fn schema(&self, id: &str) -> Result<Option<CardSchema>> {
        Ok(self.load_schemas()?.remove(id))
    }

    fn save_schema(&mut self, schema: &CardSchema) -> Result<()> {
        let mut schemas = self.load_schemas()?;
        schemas.insert(schema.id.clone(), schema.clone());
        Self::write_atomic(&self.schemas_path(), &serde_json::to_vec_pretty(&schemas)?)
    }

    fn scopes(&self) -> Result<Vec<String>> {
        let mut scopes = Vec::new();
        for entry in fs::read_dir(self.root.join(DECKS_DIR))? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    scopes.push(stem.to_string());
                }
            }
        }
        scopes.sort_unstable();
        Ok(scopes)
    }
}
