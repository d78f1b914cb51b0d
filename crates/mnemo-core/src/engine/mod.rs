//! Sync engine facade.
//!
//! Owns the store, mapping registry, and sync tracker behind one mutex so
//! only one batch runs at a time. A second caller gets `SyncInFlight`
//! immediately instead of queueing; the scheduler treats that as a skip.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backup::BackupManager;
use crate::batch::{BatchExporter, BatchImporter, CancelFlag};
use crate::config::SyncConfig;
use crate::connection::ConnectionSupervisor;
use crate::error::{Error, Result};
use crate::models::{SyncDirection, SyncLogEntry};
use crate::registry::MappingRegistry;
use crate::rpc::RpcClient;
use crate::scheduler::SyncRunner;
use crate::store::CardStore;
use crate::tracker::SyncTracker;

const HISTORY_LIMIT: usize = 20;

struct EngineState<S> {
    store: S,
    registry: MappingRegistry,
    tracker: SyncTracker,
}

pub struct SyncEngine<S: CardStore> {
    client: RpcClient,
    config: SyncConfig,
    backups: BackupManager,
    supervisor: Arc<ConnectionSupervisor>,
    media_root: PathBuf,
    cancel: CancelFlag,
    state: tokio::sync::Mutex<EngineState<S>>,
    history: std::sync::Mutex<Vec<SyncLogEntry>>,
}

impl<S: CardStore> SyncEngine<S> {
    /// Open the engine over a store, loading registry and tracker state
    /// from `data_dir` and writing media files under `media_root`.
    pub fn open(
        store: S,
        config: SyncConfig,
        data_dir: &Path,
        media_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let config = config.validated()?;
        let client = RpcClient::connect(&config)?;
        let registry = MappingRegistry::load(data_dir.join("mappings.json"))?;
        let tracker = SyncTracker::load(data_dir.join("timestamps.json"))?;
        let backups = BackupManager::new(data_dir.join("backups"), config.backup_retention);
        let supervisor = Arc::new(ConnectionSupervisor::new(client.clone(), &config));
        Ok(Self {
            client,
            config,
            backups,
            supervisor,
            media_root: media_root.into(),
            cancel: CancelFlag::new(),
            state: tokio::sync::Mutex::new(EngineState {
                store,
                registry,
                tracker,
            }),
            history: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub const fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// The one supervisor watching this engine's peer. Every caller shares
    /// it, so probes and heartbeats feed the same state machine.
    #[must_use]
    pub fn supervisor(&self) -> Arc<ConnectionSupervisor> {
        Arc::clone(&self.supervisor)
    }

    /// Handle for cancelling the batch currently in flight
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Recent run logs, newest last
    pub fn history(&self) -> Vec<SyncLogEntry> {
        self.history.lock().expect("history poisoned").clone()
    }

    /// Force the next run to re-evaluate every record
    pub async fn request_full_resync(&self) {
        let mut state = self.state.lock().await;
        state.tracker.set_full_resync(true);
        info!("full resync requested");
    }

    /// Push one deck's changed cards to the peer
    pub async fn push_deck(&self, scope: &str) -> Result<SyncLogEntry> {
        let mut state = self.state.try_lock().map_err(|_| Error::SyncInFlight)?;
        self.cancel.reset();
        let EngineState {
            store,
            registry,
            tracker,
        } = &mut *state;
        let mut exporter = BatchExporter {
            client: &self.client,
            config: &self.config,
            registry,
            tracker,
            store,
            media_root: &self.media_root,
            cancel: &self.cancel,
        };
        let log = exporter.run(scope).await?;
        self.remember(log.clone());
        Ok(log)
    }

    /// Pull one remote deck into the local store
    pub async fn pull_deck(&self, scope: &str) -> Result<SyncLogEntry> {
        let mut state = self.state.try_lock().map_err(|_| Error::SyncInFlight)?;
        self.cancel.reset();
        let EngineState {
            store,
            registry,
            tracker,
        } = &mut *state;
        let mut importer = BatchImporter {
            client: &self.client,
            config: &self.config,
            registry,
            tracker,
            store,
            backups: &self.backups,
            media_root: &self.media_root,
            cancel: &self.cancel,
        };
        let log = importer.run(scope).await?;
        self.remember(log.clone());
        Ok(log)
    }

    /// Push every local deck, aggregating the per-deck logs into one entry
    pub async fn push_all(&self) -> Result<SyncLogEntry> {
        let mut state = self.state.try_lock().map_err(|_| Error::SyncInFlight)?;
        self.cancel.reset();
        let scopes = state.store.scopes()?;

        // Prune mappings for cards deleted locally. This needs the full
        // card set, so it runs here rather than inside a single-deck batch.
        let mut live = std::collections::HashSet::new();
        for scope in &scopes {
            for card in state.store.all_cards(scope)? {
                live.insert(card.id);
            }
        }
        let removed = state.registry.cleanup(&live)?;
        if !removed.is_empty() {
            // Push-owned notes exist because we created them; deleting the
            // local card deletes the remote note too. Pull-owned notes stay
            // put on the peer.
            let orphans: Vec<i64> = removed
                .iter()
                .filter(|record| record.direction == SyncDirection::Push)
                .map(|record| record.remote_id)
                .collect();
            if !orphans.is_empty() {
                self.client.delete_notes(&orphans).await?;
            }
            debug!(
                pruned = removed.len(),
                deleted_remote = orphans.len(),
                "dropped mappings for deleted cards"
            );
        }

        let mut aggregate = SyncLogEntry::begin();
        for scope in scopes {
            let EngineState {
                store,
                registry,
                tracker,
            } = &mut *state;
            let mut exporter = BatchExporter {
                client: &self.client,
                config: &self.config,
                registry,
                tracker,
                store,
                media_root: &self.media_root,
                cancel: &self.cancel,
            };
            aggregate.absorb(exporter.run(&scope).await?);
            if self.cancel.is_cancelled() {
                break;
            }
        }
        // the one-shot full-resync flag is spent after a complete pass
        state.tracker.set_full_resync(false);

        aggregate.finish();
        self.remember(aggregate.clone());
        Ok(aggregate)
    }

    /// Roll one deck back to a stored snapshot.
    ///
    /// Returns the number of restored cards. The snapshot stays on disk.
    pub async fn restore_backup(&self, id: uuid::Uuid) -> Result<usize> {
        let mut state = self.state.try_lock().map_err(|_| Error::SyncInFlight)?;
        let meta = self.backups.backup_meta(id)?;
        let cards = self.backups.restore_backup(id)?;
        state.store.save_cards(&meta.scope, &cards)?;
        info!(backup = %id, deck = %meta.scope, count = cards.len(), "backup restored");
        Ok(cards.len())
    }

    /// Deck names with card counts, for status displays
    pub async fn deck_summary(&self) -> Result<Vec<(String, usize)>> {
        let state = self.state.lock().await;
        let mut summary = Vec::new();
        for scope in state.store.scopes()? {
            let count = state.store.all_cards(&scope)?.len();
            summary.push((scope, count));
        }
        Ok(summary)
    }

    fn remember(&self, log: SyncLogEntry) {
        let mut history = self.history.lock().expect("history poisoned");
        history.push(log);
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
    }
}

#[async_trait]
impl<S: CardStore + Send + Sync> SyncRunner for SyncEngine<S> {
    async fn perform_incremental_sync(&self) -> Result<SyncLogEntry> {
        self.push_all().await
    }
}
