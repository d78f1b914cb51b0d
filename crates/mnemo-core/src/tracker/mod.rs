//! Incremental sync tracker.
//!
//! Per-record last-sync timestamps, kept apart from the mapping registry
//! so that computing the changed set is a cheap bulk scan. This gate is
//! what keeps a no-op sync run from issuing any RPC beyond the connection
//! probe.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::models::{Card, CardId, SyncDirection, SyncTimestamp};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerFile {
    timestamps: Vec<SyncTimestamp>,
}

/// Tracks when each record last synced and computes minimal changed sets
pub struct SyncTracker {
    path: PathBuf,
    stamps: HashMap<CardId, SyncTimestamp>,
    full_resync: bool,
}

impl SyncTracker {
    /// Load the tracker from its timestamp file, empty when absent.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut stamps = HashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: TrackerFile = serde_json::from_str(&raw)?;
            for stamp in file.timestamps {
                stamps.insert(stamp.record_id, stamp);
            }
        }
        debug!(records = stamps.len(), "sync tracker loaded");
        Ok(Self {
            path,
            stamps,
            full_resync: false,
        })
    }

    /// Bypass the incremental gate on the next changed-set computation.
    ///
    /// Recovery hatch after registry or store corruption.
    pub fn set_full_resync(&mut self, full_resync: bool) {
        self.full_resync = full_resync;
    }

    /// Whether a record needs syncing.
    ///
    /// True when no prior timestamp exists, when the record changed locally
    /// since the last sync, or when the supplied remote modification time
    /// is newer than the last sync.
    pub fn should_sync(&self, card: &Card, remote_modified_at: Option<i64>) -> bool {
        if self.full_resync {
            return true;
        }
        let Some(stamp) = self.stamps.get(&card.id) else {
            return true;
        };
        if card.updated_at > stamp.last_sync_time {
            return true;
        }
        remote_modified_at.is_some_and(|remote| remote > stamp.last_sync_time)
    }

    /// Filter to exactly the minimal changed set
    pub fn changed_records<'a>(
        &self,
        all_records: &'a [Card],
        remote_modified: &HashMap<CardId, i64>,
    ) -> Vec<&'a Card> {
        all_records
            .iter()
            .filter(|card| self.should_sync(card, remote_modified.get(&card.id).copied()))
            .collect()
    }

    /// Record a successful sync of one record at the given time
    pub fn mark_synced(
        &mut self,
        record_id: CardId,
        direction: SyncDirection,
        at: i64,
    ) -> Result<()> {
        self.stamps.insert(
            record_id,
            SyncTimestamp {
                record_id,
                last_sync_time: at,
                direction,
            },
        );
        self.persist()
    }

    /// Drop the timestamp for a deleted record
    pub fn forget(&mut self, record_id: &CardId) -> Result<()> {
        if self.stamps.remove(record_id).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    /// The stored timestamp for a record, if any
    pub fn last_sync(&self, record_id: &CardId) -> Option<&SyncTimestamp> {
        self.stamps.get(record_id)
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut timestamps: Vec<SyncTimestamp> = self.stamps.values().cloned().collect();
        timestamps.sort_by_key(|stamp| stamp.record_id.as_str());
        let bytes = serde_json::to_vec_pretty(&TrackerFile { timestamps })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_updated_at(updated_at: i64) -> Card {
        let mut card = Card::new("Deck", "basic").with_field("Front", "q");
        card.updated_at = updated_at;
        card
    }

    fn tracker_in(dir: &tempfile::TempDir) -> SyncTracker {
        SyncTracker::load(dir.path().join("timestamps.json")).unwrap()
    }

    #[test]
    fn unseen_record_needs_sync() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir);
        assert!(tracker.should_sync(&card_updated_at(10), None));
    }

    #[test]
    fn unchanged_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let card = card_updated_at(10);
        tracker
            .mark_synced(card.id, SyncDirection::Push, 20)
            .unwrap();
        assert!(!tracker.should_sync(&card, None));
        assert!(!tracker.should_sync(&card, Some(15)));
    }

    #[test]
    fn local_edit_after_sync_needs_sync() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let mut card = card_updated_at(10);
        tracker
            .mark_synced(card.id, SyncDirection::Push, 20)
            .unwrap();
        card.updated_at = 30;
        assert!(tracker.should_sync(&card, None));
    }

    #[test]
    fn newer_remote_modification_needs_sync() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let card = card_updated_at(10);
        tracker
            .mark_synced(card.id, SyncDirection::Pull, 20)
            .unwrap();
        assert!(tracker.should_sync(&card, Some(25)));
    }

    #[test]
    fn changed_records_filters_to_minimal_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let synced = card_updated_at(10);
        let edited = card_updated_at(10);
        let unseen = card_updated_at(10);
        tracker
            .mark_synced(synced.id, SyncDirection::Push, 20)
            .unwrap();
        tracker
            .mark_synced(edited.id, SyncDirection::Push, 20)
            .unwrap();

        let mut edited = edited;
        edited.updated_at = 30;
        let all = vec![synced.clone(), edited.clone(), unseen.clone()];
        let changed = tracker.changed_records(&all, &HashMap::new());
        let changed_ids: Vec<CardId> = changed.iter().map(|card| card.id).collect();
        assert_eq!(changed_ids, vec![edited.id, unseen.id]);
    }

    #[test]
    fn full_resync_bypasses_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let card = card_updated_at(10);
        tracker
            .mark_synced(card.id, SyncDirection::Push, 20)
            .unwrap();
        tracker.set_full_resync(true);
        assert!(tracker.should_sync(&card, None));
    }

    #[test]
    fn timestamps_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let card = card_updated_at(10);
        {
            let mut tracker = tracker_in(&dir);
            tracker
                .mark_synced(card.id, SyncDirection::Push, 42)
                .unwrap();
        }
        let tracker = tracker_in(&dir);
        assert_eq!(tracker.last_sync(&card.id).unwrap().last_sync_time, 42);
        assert!(!tracker.should_sync(&card, None));
    }

    #[test]
    fn forget_drops_the_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = tracker_in(&dir);
        let card = card_updated_at(10);
        tracker
            .mark_synced(card.id, SyncDirection::Push, 20)
            .unwrap();
        tracker.forget(&card.id).unwrap();
        assert!(tracker.should_sync(&card, None));
    }
}
