//! Backup manager.
//!
//! Point-in-time snapshots of a deck's cards, taken before destructive
//! imports. One directory per backup id holding a metadata header plus the
//! serialized card payload. Backups are immutable once written; a fixed
//! retention cap evicts the oldest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Card;

const META_FILE: &str = "meta.json";
const RECORDS_FILE: &str = "records.json";

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    Import,
    Manual,
}

/// Metadata header stored beside each backup payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    pub id: Uuid,
    /// Deck the snapshot covers
    pub scope: String,
    pub reason: BackupReason,
    /// Snapshot time (Unix ms)
    pub created_at: i64,
    pub record_count: usize,
}

/// Creates, lists, and restores deck snapshots under one root directory
pub struct BackupManager {
    root: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            root: root.into(),
            retention: retention.max(1),
        }
    }

    /// Snapshot a deck's cards; returns the new backup id.
    ///
    /// Enforces retention afterwards, evicting oldest-first.
    pub fn create_backup(
        &self,
        scope: &str,
        records: &[Card],
        reason: BackupReason,
    ) -> Result<Uuid> {
        let id = Uuid::now_v7();
        let dir = self.root.join(id.to_string());
        std::fs::create_dir_all(&dir)?;

        let meta = BackupMeta {
            id,
            scope: scope.to_string(),
            reason,
            created_at: chrono::Utc::now().timestamp_millis(),
            record_count: records.len(),
        };
        std::fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&meta)?)?;
        std::fs::write(dir.join(RECORDS_FILE), serde_json::to_vec_pretty(&records)?)?;
        info!(%id, scope, records = records.len(), "backup created");

        self.enforce_retention()?;
        Ok(id)
    }

    /// Read back the cards of one backup. The backup itself is untouched.
    pub fn restore_backup(&self, id: Uuid) -> Result<Vec<Card>> {
        let dir = self.root.join(id.to_string());
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("backup {id}")));
        }
        let raw = std::fs::read_to_string(dir.join(RECORDS_FILE))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The metadata header of one backup
    pub fn backup_meta(&self, id: Uuid) -> Result<BackupMeta> {
        let dir = self.root.join(id.to_string());
        let raw = std::fs::read_to_string(dir.join(META_FILE))
            .map_err(|_| Error::NotFound(format!("backup {id}")))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// All backups, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupMeta>> {
        let mut backups = Vec::new();
        if !self.root.is_dir() {
            return Ok(backups);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match read_meta(&entry.path()) {
                Ok(meta) => backups.push(meta),
                Err(error) => debug!(path = %entry.path().display(), %error, "skipping unreadable backup"),
            }
        }
        backups.sort_by_key(|meta| std::cmp::Reverse(meta.created_at));
        Ok(backups)
    }

    fn enforce_retention(&self) -> Result<()> {
        let backups = self.list_backups()?;
        for meta in backups.iter().skip(self.retention) {
            let dir = self.root.join(meta.id.to_string());
            std::fs::remove_dir_all(&dir)?;
            info!(id = %meta.id, "evicted backup past retention");
        }
        Ok(())
    }
}

fn read_meta(dir: &Path) -> Result<BackupMeta> {
    let raw = std::fs::read_to_string(dir.join(META_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_cards(n: usize) -> Vec<Card> {
        (0..n)
            .map(|i| Card::new("Physics", "basic").with_field("Front", format!("q{i}")))
            .collect()
    }

    #[test]
    fn create_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path(), 5);
        let cards = sample_cards(3);

        let id = manager
            .create_backup("Physics", &cards, BackupReason::Import)
            .unwrap();
        let restored = manager.restore_backup(id).unwrap();
        assert_eq!(restored, cards);

        let meta = manager.backup_meta(id).unwrap();
        assert_eq!(meta.scope, "Physics");
        assert_eq!(meta.reason, BackupReason::Import);
        assert_eq!(meta.record_count, 3);
    }

    #[test]
    fn restore_does_not_delete_the_backup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path(), 5);
        let id = manager
            .create_backup("Physics", &sample_cards(1), BackupReason::Manual)
            .unwrap();
        manager.restore_backup(id).unwrap();
        assert!(manager.restore_backup(id).is_ok());
        assert_eq!(manager.list_backups().unwrap().len(), 1);
    }

    #[test]
    fn list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path(), 5);
        let first = manager
            .create_backup("A", &sample_cards(1), BackupReason::Manual)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = manager
            .create_backup("B", &sample_cards(1), BackupReason::Manual)
            .unwrap();

        let listed = manager.list_backups().unwrap();
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[1].id, first);
    }

    #[test]
    fn retention_evicts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path(), 2);
        let oldest = manager
            .create_backup("A", &sample_cards(1), BackupReason::Import)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager
            .create_backup("B", &sample_cards(1), BackupReason::Import)
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager
            .create_backup("C", &sample_cards(1), BackupReason::Import)
            .unwrap();

        assert_eq!(manager.list_backups().unwrap().len(), 2);
        assert!(matches!(
            manager.restore_backup(oldest),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn restore_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path(), 2);
        assert!(matches!(
            manager.restore_backup(Uuid::now_v7()),
            Err(Error::NotFound(_))
        ));
    }
}
