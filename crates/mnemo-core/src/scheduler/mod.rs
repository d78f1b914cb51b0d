//! Automatic sync scheduling.
//!
//! Three triggers converge on a single entry point: a periodic interval,
//! an optional run right after startup, and debounced local change events.
//! The runner itself enforces single-flight, so an overlapping trigger
//! degrades to a skipped run instead of a concurrent one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connection::ConnectionSupervisor;
use crate::error::{Error, Result};
use crate::models::SyncLogEntry;

/// What woke the scheduler up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Interval,
    Startup,
    FileChange,
}

/// The one entry point every trigger funnels into
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn perform_incremental_sync(&self) -> Result<SyncLogEntry>;
}

/// Cloneable handle for reporting local change events to the scheduler
#[derive(Debug, Clone)]
pub struct ChangeNotifier(mpsc::UnboundedSender<()>);

impl ChangeNotifier {
    /// Report one local change; cheap and non-blocking, callable from
    /// filesystem watcher callbacks
    pub fn notify_change(&self) {
        // a dropped scheduler just means nobody is listening anymore
        let _ = self.0.send(());
    }
}

pub struct AutoSyncScheduler<R: SyncRunner> {
    runner: Arc<R>,
    supervisor: Arc<ConnectionSupervisor>,
    interval: Duration,
    debounce: Duration,
    sync_on_start: bool,
    require_connected: bool,
    events: mpsc::UnboundedReceiver<()>,
}

impl<R: SyncRunner> AutoSyncScheduler<R> {
    pub fn new(
        runner: Arc<R>,
        supervisor: Arc<ConnectionSupervisor>,
        config: &SyncConfig,
    ) -> (Self, ChangeNotifier) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            runner,
            supervisor,
            interval: Duration::from_secs(config.sync_interval_secs.max(1)),
            debounce: Duration::from_secs(config.debounce_secs),
            sync_on_start: config.sync_on_start,
            require_connected: config.require_connected,
            events: rx,
        };
        (scheduler, ChangeNotifier(tx))
    }

    /// Drive the trigger loop until `shutdown` fires.
    ///
    /// Change events are debounced with a quiet period: a burst of edits
    /// produces exactly one run, `debounce` after the last edit.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        if self.sync_on_start {
            self.trigger(SyncTrigger::Startup).await;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // consume the immediate first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.trigger(SyncTrigger::Interval).await;
                }
                event = self.events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    self.drain_quiet_period().await;
                    self.trigger(SyncTrigger::FileChange).await;
                }
            }
        }
    }

    /// Absorb further change events until none arrive for a full debounce
    /// window
    async fn drain_quiet_period(&mut self) {
        loop {
            match tokio::time::timeout(self.debounce, self.events.recv()).await {
                Ok(Some(())) => {}
                Ok(None) | Err(_) => break,
            }
        }
    }

    async fn trigger(&self, trigger: SyncTrigger) {
        if self.require_connected && !self.supervisor.is_connected() {
            debug!(?trigger, "peer not connected; sync deferred");
            return;
        }
        match self.runner.perform_incremental_sync().await {
            Ok(log) => info!(?trigger, summary = %log.summary(), "scheduled sync finished"),
            Err(Error::SyncInFlight) => debug!(?trigger, "sync already running; skipped"),
            Err(error) => warn!(?trigger, %error, "scheduled sync failed"),
        }
    }
}
