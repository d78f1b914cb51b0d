//! Mapping models correlating local cards and schemas with remote notes and models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::card::CardId;

/// Sync state of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Content hash matched the local card when last checked
    Synced,
    /// Local card has un-synced edits
    Pending,
    /// Last transfer attempt for this card failed
    Error,
}

/// Per-mapping transfer direction.
///
/// There is no two-way conflict resolution; each mapping syncs one way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Local store is the source of truth; changes flow to the peer
    Push,
    /// Remote peer is the source of truth; changes flow to the local store
    Pull,
}

/// Persisted correlation between one local card and one remote note.
///
/// Owned exclusively by the mapping registry; other components go through
/// the registry's API. No two records ever share a `local_id` or a
/// `remote_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    /// Local card id
    pub local_id: CardId,
    /// Remote note id
    pub remote_id: i64,
    /// Stable correlation key, survives id churn on either side
    pub stable_uuid: Uuid,
    /// Hash of the card's synchronizable fields at last successful sync
    pub content_hash: String,
    /// Hash over the card's transferred media set, if any media was moved
    #[serde(default)]
    pub media_hash: Option<String>,
    /// Local schema the card followed when mapped
    pub schema_id: String,
    /// Local modification time at last sync (Unix ms)
    pub local_modified_at: i64,
    /// Remote modification time at last sync (Unix ms)
    pub remote_modified_at: i64,
    /// Incremented on every successful sync of this record
    pub sync_version: u32,
    /// Current sync state
    pub sync_status: SyncStatus,
    /// Which way this mapping transfers
    pub direction: SyncDirection,
}

/// Display role of a schema field, inferred or declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Question side
    Front,
    /// Answer side
    Back,
    /// Appears on both sides (also the fallback when undetermined)
    Both,
    /// Bookkeeping or otherwise non-display field
    Custom,
}

/// Persisted correlation between a local schema and a remote note type.
///
/// Immutable once `sync_capable` is set, so already-synced content is never
/// silently reinterpreted under new field roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMapping {
    /// Local schema id
    pub local_schema_id: String,
    /// Remote note-type (model) name
    pub remote_model: String,
    /// Role assignment per remote field name
    pub field_roles: BTreeMap<String, FieldRole>,
    /// Set once cards have been synced under this mapping
    pub sync_capable: bool,
}

/// Per-record last-sync timestamp used for incremental diffing.
///
/// Kept disjoint from `MappingRecord` so bulk change scans stay cheap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTimestamp {
    /// Card this timestamp belongs to
    pub record_id: CardId,
    /// Time of the last successful sync (Unix ms)
    pub last_sync_time: i64,
    /// Direction of the last sync
    pub direction: SyncDirection,
}
