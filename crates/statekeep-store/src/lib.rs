//! statekeep store — durable keyed JSON state with crash-safe writes
//!
//! Layers, leaves first:
//! - `atomic`: temp-file + fsync + rename writes, one retry policy
//! - `document`: schema-tolerant JSON documents with backfill and corruption recovery
//! - `log`: bounded, optionally disk-mirrored append logs
//! - `store`: one document + one lock + one audit log
//! - `registry`: one store per path per process

pub mod atomic;
pub mod config;
pub mod document;
pub mod log;
pub mod registry;
pub mod store;

pub use atomic::RetryPolicy;
pub use config::StoreConfig;
pub use document::{JsonDocument, LoadReport, Loaded};
pub use log::{BoundedAppendLog, LogQuery};
pub use registry::StoreRegistry;
pub use store::StateStore;

/// Current unix time in seconds, microsecond resolution.
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
