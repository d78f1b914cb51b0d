//! mnemo-core - Core library for Mnemo
//!
//! This crate contains the sync engine shared by all Mnemo interfaces:
//! the RPC client for the spaced-repetition peer, the content conversion
//! pipeline, mapping and timestamp persistence, and the batch
//! import/export orchestration.

pub mod backup;
pub mod batch;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod media;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod tracker;
pub mod util;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use models::{Card, CardId, CardSchema, SyncLogEntry};
