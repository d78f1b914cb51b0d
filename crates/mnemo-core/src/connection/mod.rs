//! Connection supervisor: liveness probing and reconnection.
//!
//! Owns the one connection state machine the rest of the engine consults.
//! State is transient and in-memory only; components subscribe to
//! transitions instead of sharing mutable fields.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::rpc::RpcClient;
use crate::util::unix_timestamp_ms;

/// Connection status toward the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Snapshot of the supervisor's state machine. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Time of the last successful probe (Unix ms)
    pub last_heartbeat: Option<i64>,
    /// Attempts made in the current reconnect cycle
    pub reconnect_attempts: u32,
    /// Last transport error message, cleared on success
    pub last_error: Option<String>,
}

impl ConnectionState {
    const fn initial() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_heartbeat: None,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

type Subscriber = Box<dyn Fn(&ConnectionState) + Send + Sync>;

/// Supervises liveness of the peer connection.
///
/// Transitions: `disconnected -> connected` on a successful probe,
/// `connected -> disconnected` on a failed one, and
/// `disconnected -> reconnecting -> connected|disconnected` during backoff.
pub struct ConnectionSupervisor {
    client: RpcClient,
    heartbeat_interval: Duration,
    backoff_initial: Duration,
    backoff_cap: Duration,
    backoff_max_attempts: u32,
    state: Mutex<ConnectionState>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ConnectionSupervisor {
    pub fn new(client: RpcClient, config: &SyncConfig) -> Self {
        Self {
            client,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            backoff_initial: Duration::from_secs(config.backoff_initial_secs),
            backoff_cap: Duration::from_secs(config.backoff_cap_secs),
            backoff_max_attempts: config.backoff_max_attempts,
            state: Mutex::new(ConnectionState::initial()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> ConnectionState {
        self.state.lock().expect("connection state poisoned").clone()
    }

    /// Whether the last probe succeeded
    pub fn is_connected(&self) -> bool {
        self.state().status == ConnectionStatus::Connected
    }

    /// Register a transition callback.
    ///
    /// Callbacks must return quickly; they run on the supervisor's task.
    /// A panicking callback is caught and logged, never propagated.
    pub fn subscribe(&self, subscriber: impl Fn(&ConnectionState) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(Box::new(subscriber));
    }

    /// One liveness probe: a trivial `version` call.
    ///
    /// Returns whether the peer answered; the state machine transitions
    /// either way.
    pub async fn probe(&self) -> bool {
        match self.client.version().await {
            Ok(version) => {
                debug!(version, "heartbeat ok");
                self.transition(|state| {
                    state.status = ConnectionStatus::Connected;
                    state.last_heartbeat = Some(unix_timestamp_ms());
                    state.reconnect_attempts = 0;
                    state.last_error = None;
                });
                true
            }
            Err(error) => {
                debug!(%error, "heartbeat failed");
                self.transition(|state| {
                    state.status = ConnectionStatus::Disconnected;
                    state.last_error = Some(error.to_string());
                });
                false
            }
        }
    }

    /// Reconnect with capped exponential backoff.
    ///
    /// Delays are non-decreasing (initial, 2x, 4x, ... up to the cap) and
    /// the cycle gives up after the configured attempt count, leaving the
    /// state `disconnected` until the next heartbeat or manual retry.
    pub async fn reconnect(&self) -> bool {
        for (attempt, delay) in (1u32..).zip(self.backoff_delays()) {
            self.transition(|state| {
                state.status = ConnectionStatus::Reconnecting;
                state.reconnect_attempts = attempt;
            });
            tokio::time::sleep(delay).await;
            if self.probe().await {
                info!(attempt, "reconnected");
                return true;
            }
        }
        warn!(
            attempts = self.backoff_max_attempts,
            "reconnect attempts exhausted; staying disconnected"
        );
        self.transition(|state| state.status = ConnectionStatus::Disconnected);
        false
    }

    /// The full backoff schedule for one reconnect cycle
    pub fn backoff_delays(&self) -> Vec<Duration> {
        backoff_schedule(
            self.backoff_initial,
            self.backoff_cap,
            self.backoff_max_attempts,
        )
    }

    /// Spawn the periodic heartbeat loop.
    ///
    /// Runs until the handle is aborted; a failed probe triggers one
    /// reconnect cycle before the loop resumes its fixed interval.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !supervisor.probe().await {
                    supervisor.reconnect().await;
                }
            }
        })
    }

    fn transition(&self, mutate: impl FnOnce(&mut ConnectionState)) {
        let snapshot = {
            let mut state = self.state.lock().expect("connection state poisoned");
            let before = state.clone();
            mutate(&mut state);
            if *state == before {
                return;
            }
            state.clone()
        };
        let subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        for subscriber in subscribers.iter() {
            // Fire-and-forget: a misbehaving subscriber must not take the
            // supervisor down with it.
            if catch_unwind(AssertUnwindSafe(|| subscriber(&snapshot))).is_err() {
                warn!("connection subscriber panicked; ignoring");
            }
        }
    }
}

/// Capped exponential backoff schedule: `initial, 2*initial, 4*initial, ...`
/// clamped to `cap`, `attempts` entries long.
#[must_use]
pub fn backoff_schedule(initial: Duration, cap: Duration, attempts: u32) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(attempts as usize);
    let mut delay = initial;
    for _ in 0..attempts {
        delays.push(delay.min(cap));
        delay = delay.checked_mul(2).unwrap_or(cap).min(cap);
    }
    delays
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::rpc::tests::ScriptedTransport;

    fn supervisor_with(responses: Vec<Result<serde_json::Value>>) -> ConnectionSupervisor {
        let client = RpcClient::with_transport(Arc::new(ScriptedTransport::new(responses)));
        let config = SyncConfig {
            backoff_initial_secs: 1,
            backoff_cap_secs: 4,
            backoff_max_attempts: 4,
            ..SyncConfig::default()
        };
        ConnectionSupervisor::new(client, &config)
    }

    #[test]
    fn backoff_schedule_is_monotonic_and_capped() {
        let delays = backoff_schedule(Duration::from_secs(1), Duration::from_secs(8), 6);
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn backoff_schedule_is_bounded_by_attempts() {
        let delays = backoff_schedule(Duration::from_secs(1), Duration::from_secs(60), 3);
        assert_eq!(delays.len(), 3);
    }

    #[tokio::test]
    async fn probe_success_transitions_to_connected() {
        let supervisor = supervisor_with(vec![ScriptedTransport::ok(serde_json::json!(6))]);
        assert!(supervisor.probe().await);

        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert!(state.last_heartbeat.is_some());
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn probe_failure_transitions_to_disconnected() {
        let supervisor = supervisor_with(vec![Err(crate::error::Error::NotRunning(
            "connection refused".to_string(),
        ))]);
        assert!(!supervisor.probe().await);

        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert!(state.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_max_attempts() {
        let supervisor = supervisor_with(vec![
            Err(crate::error::Error::NotRunning("down".to_string())),
            Err(crate::error::Error::NotRunning("down".to_string())),
            Err(crate::error::Error::NotRunning("down".to_string())),
            Err(crate::error::Error::NotRunning("down".to_string())),
        ]);
        assert!(!supervisor.reconnect().await);
        assert_eq!(supervisor.state().status, ConnectionStatus::Disconnected);
        assert_eq!(supervisor.state().reconnect_attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_at_first_success() {
        let supervisor = supervisor_with(vec![
            Err(crate::error::Error::NotRunning("down".to_string())),
            ScriptedTransport::ok(serde_json::json!(6)),
        ]);
        assert!(supervisor.reconnect().await);
        assert_eq!(supervisor.state().status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions_and_panics_are_contained() {
        let supervisor = supervisor_with(vec![ScriptedTransport::ok(serde_json::json!(6))]);
        let seen = Arc::new(AtomicUsize::new(0));

        supervisor.subscribe(|_| panic!("bad subscriber"));
        let counter = Arc::clone(&seen);
        supervisor.subscribe(move |state| {
            assert_eq!(state.status, ConnectionStatus::Connected);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(supervisor.probe().await);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
