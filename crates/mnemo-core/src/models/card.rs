//! Card and schema models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::sha256_hex;

/// A unique identifier for a card, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardId(Uuid);

impl CardId {
    /// Create a new unique card ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CardId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A flashcard in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Unique identifier
    pub id: CardId,
    /// Local schema this card's fields follow
    pub schema_id: String,
    /// Deck (scope) the card belongs to
    pub deck: String,
    /// Field name to markup content; `BTreeMap` for deterministic iteration
    pub fields: BTreeMap<String, String>,
    /// Tags carried to/from the remote note
    #[serde(default)]
    pub tags: Vec<String>,
    /// Vault-relative path of the note this card came from, if any
    #[serde(default)]
    pub source_path: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Card {
    /// Create a new card in the given deck with the given schema and fields
    #[must_use]
    pub fn new(deck: impl Into<String>, schema_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: CardId::new(),
            schema_id: schema_id.into(),
            deck: deck.into(),
            fields: BTreeMap::new(),
            tags: Vec::new(),
            source_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set a field value, builder style
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Hash of the synchronizable content (fields + tags), hex SHA-256.
    ///
    /// Field iteration order is deterministic, so two cards with equal
    /// fields and tags always hash identically.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut buffer = String::new();
        for (name, value) in &self.fields {
            buffer.push_str(name);
            buffer.push('\u{1f}');
            buffer.push_str(value);
            buffer.push('\u{1e}');
        }
        let mut tags = self.tags.clone();
        tags.sort_unstable();
        for tag in &tags {
            buffer.push_str(tag);
            buffer.push('\u{1e}');
        }
        sha256_hex(buffer.as_bytes())
    }
}

/// A local card-template schema: ordered fields plus front/back templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSchema {
    /// Stable local identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Ordered field names
    pub fields: Vec<String>,
    /// Front-side template markup referencing fields as `{{Field}}`
    pub front_template: String,
    /// Back-side template markup referencing fields as `{{Field}}`
    pub back_template: String,
}

impl CardSchema {
    /// The default two-field question/answer schema
    #[must_use]
    pub fn basic() -> Self {
        Self {
            id: "basic".to_string(),
            name: "Basic".to_string(),
            fields: vec!["Front".to_string(), "Back".to_string()],
            front_template: "{{Front}}".to_string(),
            back_template: "{{Front}}<hr id=answer>{{Back}}".to_string(),
        }
    }
}
