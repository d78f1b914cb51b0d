//! Data models for Mnemo

mod card;
mod mapping;
mod sync_log;

pub use card::{Card, CardId, CardSchema};
pub use mapping::{
    FieldRole, MappingRecord, SyncDirection, SyncStatus, SyncTimestamp, TemplateMapping,
};
pub use sync_log::{ItemError, SyncLogEntry};
