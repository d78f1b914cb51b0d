//! Sync engine configuration.
//!
//! Everything the subsystem needs is passed in through this plain struct;
//! nothing in the engine reads settings from global state. The settings UI
//! (or the CLI config file) owns producing it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Default AnkiConnect endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8765";

/// Per-layer enable flags for the content pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerFlags {
    pub math: bool,
    pub links: bool,
    pub callouts: bool,
    pub highlight: bool,
}

impl Default for LayerFlags {
    fn default() -> Self {
        Self {
            math: true,
            links: true,
            callouts: true,
            highlight: true,
        }
    }
}

/// Configuration surface for the whole sync subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// AnkiConnect endpoint URL
    pub endpoint: String,
    /// Per-call RPC timeout in seconds
    pub request_timeout_secs: u64,
    /// Heartbeat probe interval in seconds
    pub heartbeat_interval_secs: u64,
    /// First reconnect delay in seconds; doubles per attempt
    pub backoff_initial_secs: u64,
    /// Reconnect delay cap in seconds
    pub backoff_cap_secs: u64,
    /// Reconnect attempts before giving up until the next heartbeat
    pub backoff_max_attempts: u32,
    /// Media files at or above this many bytes become backlinks instead of uploads
    pub media_size_threshold: u64,
    /// Vault name used in deep links back to the source application
    pub vault_name: String,
    /// Rewrite cross-references as deep links rather than plain text
    pub deep_link_refs: bool,
    /// Content pipeline layer flags
    pub layers: LayerFlags,
    /// Concurrency cap for read-only enrichment RPC calls
    pub concurrency_limit: usize,
    /// How many backups to retain before evicting the oldest
    pub backup_retention: usize,
    /// Periodic auto-sync interval in seconds
    pub sync_interval_secs: u64,
    /// Quiet period after a file-change event before auto-sync fires, seconds
    pub debounce_secs: u64,
    /// Run a sync when the scheduler starts
    pub sync_on_start: bool,
    /// Scheduler only fires while the supervisor reports connected
    pub require_connected: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_secs: 5,
            heartbeat_interval_secs: 30,
            backoff_initial_secs: 1,
            backoff_cap_secs: 60,
            backoff_max_attempts: 5,
            media_size_threshold: 5 * 1024 * 1024,
            vault_name: String::new(),
            deep_link_refs: true,
            layers: LayerFlags::default(),
            concurrency_limit: 3,
            backup_retention: 10,
            sync_interval_secs: 300,
            debounce_secs: 5,
            sync_on_start: false,
            require_connected: true,
        }
    }
}

impl SyncConfig {
    /// Validate and normalize the endpoint and numeric bounds.
    ///
    /// Returns the normalized config so callers can validate-then-store.
    pub fn validated(mut self) -> Result<Self> {
        let endpoint = normalize_text_option(Some(self.endpoint))
            .ok_or_else(|| Error::InvalidInput("endpoint must not be empty".to_string()))?;
        if !is_http_url(&endpoint) {
            return Err(Error::InvalidInput(
                "endpoint must include http:// or https://".to_string(),
            ));
        }
        self.endpoint = endpoint.trim_end_matches('/').to_string();

        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.backoff_initial_secs == 0 || self.backoff_cap_secs < self.backoff_initial_secs {
            return Err(Error::InvalidInput(
                "backoff schedule must start at >= 1s and cap at >= the initial delay".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            self.concurrency_limit = 1;
        }
        if self.sync_interval_secs == 0 {
            return Err(Error::InvalidInput(
                "sync_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
