//! Persistent bidirectional mapping registry.
//!
//! The single owner of `MappingRecord` and `TemplateMapping` state. The
//! primary table is keyed by stable UUID; two secondary indexes (by local
//! id, by remote id) are rebuilt on load. Every mutation persists the full
//! table synchronously (write-through) via an atomic temp-file rename, so
//! abrupt termination never loses or tears mapping state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{CardId, MappingRecord, SyncStatus, TemplateMapping};

const MAPPING_SCHEMA_VERSION: u32 = 1;

/// On-disk shape of the mapping file
#[derive(Debug, Serialize, Deserialize)]
struct MappingFile {
    schema_version: u32,
    mappings: Vec<MappingRecord>,
    #[serde(default)]
    templates: Vec<TemplateMapping>,
}

/// Bidirectional index between local cards and remote notes
pub struct MappingRegistry {
    path: PathBuf,
    records: HashMap<Uuid, MappingRecord>,
    by_local: HashMap<CardId, Uuid>,
    by_remote: HashMap<i64, Uuid>,
    templates: HashMap<String, TemplateMapping>,
}

impl MappingRegistry {
    /// Load the registry from its mapping file, empty when absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut registry = Self {
            path,
            records: HashMap::new(),
            by_local: HashMap::new(),
            by_remote: HashMap::new(),
            templates: HashMap::new(),
        };

        if !registry.path.exists() {
            return Ok(registry);
        }

        let raw = std::fs::read_to_string(&registry.path)?;
        let file: MappingFile = serde_json::from_str(&raw)?;
        if file.schema_version != MAPPING_SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported mapping file schema_version {} (expected {MAPPING_SCHEMA_VERSION})",
                file.schema_version
            )));
        }

        for record in file.mappings {
            registry.index(&record);
            registry.records.insert(record.stable_uuid, record);
        }
        for template in file.templates {
            registry
                .templates
                .insert(template.local_schema_id.clone(), template);
        }
        debug!(
            records = registry.records.len(),
            templates = registry.templates.len(),
            "mapping registry loaded"
        );
        Ok(registry)
    }

    /// Number of card mappings
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or update the mapping for one card.
    ///
    /// Replaces any prior record with the same stable UUID; rejects a
    /// record whose local or remote id is already claimed by a different
    /// mapping, keeping both indexes unique.
    pub fn record_mapping(&mut self, record: MappingRecord) -> Result<()> {
        if let Some(existing) = self.by_local.get(&record.local_id) {
            if *existing != record.stable_uuid {
                return Err(Error::InvalidInput(format!(
                    "local id {} is already mapped",
                    record.local_id
                )));
            }
        }
        if let Some(existing) = self.by_remote.get(&record.remote_id) {
            if *existing != record.stable_uuid {
                return Err(Error::InvalidInput(format!(
                    "remote id {} is already mapped",
                    record.remote_id
                )));
            }
        }

        if let Some(previous) = self.records.remove(&record.stable_uuid) {
            self.unindex(&previous);
        }
        self.index(&record);
        self.records.insert(record.stable_uuid, record);
        self.persist()
    }

    pub fn find_by_local_id(&self, local_id: &CardId) -> Option<&MappingRecord> {
        self.by_local
            .get(local_id)
            .and_then(|uuid| self.records.get(uuid))
    }

    pub fn find_by_remote_id(&self, remote_id: i64) -> Option<&MappingRecord> {
        self.by_remote
            .get(&remote_id)
            .and_then(|uuid| self.records.get(uuid))
    }

    pub fn find_by_uuid(&self, uuid: &Uuid) -> Option<&MappingRecord> {
        self.records.get(uuid)
    }

    /// All mappings, unordered
    pub fn iter(&self) -> impl Iterator<Item = &MappingRecord> {
        self.records.values()
    }

    /// Mark a mapping's sync status without touching the rest of the record
    pub fn set_status(&mut self, local_id: &CardId, status: SyncStatus) -> Result<()> {
        let uuid = *self
            .by_local
            .get(local_id)
            .ok_or_else(|| Error::NotFound(format!("no mapping for local id {local_id}")))?;
        if let Some(record) = self.records.get_mut(&uuid) {
            record.sync_status = status;
        }
        self.persist()
    }

    /// Remove the mapping for one local card, if present
    pub fn remove_mapping(&mut self, local_id: &CardId) -> Result<Option<MappingRecord>> {
        let Some(uuid) = self.by_local.get(local_id).copied() else {
            return Ok(None);
        };
        let removed = self.records.remove(&uuid);
        if let Some(record) = &removed {
            self.unindex(record);
            self.persist()?;
        }
        Ok(removed)
    }

    /// Drop mappings whose local card no longer exists.
    ///
    /// Prevents unbounded growth as cards are deleted locally. Returns the
    /// removed records so the caller can propagate the deletions.
    pub fn cleanup(&mut self, existing: &HashSet<CardId>) -> Result<Vec<MappingRecord>> {
        let stale: Vec<Uuid> = self
            .records
            .values()
            .filter(|record| !existing.contains(&record.local_id))
            .map(|record| record.stable_uuid)
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::with_capacity(stale.len());
        for uuid in &stale {
            if let Some(record) = self.records.remove(uuid) {
                self.unindex(&record);
                removed.push(record);
            }
        }
        self.persist()?;
        info!(removed = removed.len(), "mapping registry cleanup");
        Ok(removed)
    }

    /// The template mapping for a local schema, if one was recorded
    pub fn template_for(&self, local_schema_id: &str) -> Option<&TemplateMapping> {
        self.templates.get(local_schema_id)
    }

    /// The template mapping pointing at a remote model, if any
    pub fn template_for_remote(&self, remote_model: &str) -> Option<&TemplateMapping> {
        self.templates
            .values()
            .find(|template| template.remote_model == remote_model)
    }

    /// Record a schema-to-model mapping.
    ///
    /// A mapping that has become sync-capable is immutable; overwriting it
    /// would silently reinterpret already-synced content.
    pub fn record_template(&mut self, template: TemplateMapping) -> Result<()> {
        if let Some(existing) = self.templates.get(&template.local_schema_id) {
            if existing.sync_capable && *existing != template {
                return Err(Error::InvalidInput(format!(
                    "template mapping for schema '{}' is sync-capable and immutable",
                    template.local_schema_id
                )));
            }
        }
        self.templates
            .insert(template.local_schema_id.clone(), template);
        self.persist()
    }

    /// Flag a template mapping as sync-capable, freezing it
    pub fn mark_template_sync_capable(&mut self, local_schema_id: &str) -> Result<()> {
        let template = self.templates.get_mut(local_schema_id).ok_or_else(|| {
            Error::NotFound(format!("no template mapping for schema '{local_schema_id}'"))
        })?;
        if !template.sync_capable {
            template.sync_capable = true;
            return self.persist();
        }
        Ok(())
    }

    /// Serialized bytes of the current table, for byte-for-byte comparisons
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.to_file())?)
    }

    fn index(&mut self, record: &MappingRecord) {
        self.by_local.insert(record.local_id, record.stable_uuid);
        self.by_remote.insert(record.remote_id, record.stable_uuid);
    }

    fn unindex(&mut self, record: &MappingRecord) {
        self.by_local.remove(&record.local_id);
        self.by_remote.remove(&record.remote_id);
    }

    fn to_file(&self) -> MappingFile {
        let mut mappings: Vec<MappingRecord> = self.records.values().cloned().collect();
        mappings.sort_by_key(|record| record.stable_uuid);
        let mut templates: Vec<TemplateMapping> = self.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.local_schema_id.cmp(&b.local_schema_id));
        MappingFile {
            schema_version: MAPPING_SCHEMA_VERSION,
            mappings,
            templates,
        }
    }

    // Full-table rewrite through a temp file; rename is atomic on the same
    // filesystem.
    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.to_file())?;
        let tmp = temp_sibling(&self.path);
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| "mappings.json".into(), std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    path.with_file_name(name)
}
