//! statekeep — durable keyed JSON state store
//!
//! Crash-safe document writes, schema backfill with corruption recovery,
//! bounded audit logs, and a locked load-modify-save facade.
//!
//! ```no_run
//! use serde_json::json;
//! use statekeep::{document_from_value, StateStore, StoreConfig};
//!
//! let defaults = document_from_value(json!({"replica_count": 0, "history": []})).unwrap();
//! let store = StateStore::open("replicas.json", defaults, &StoreConfig::default())?;
//! store.update(|doc| {
//!     let n = doc["replica_count"].as_i64().unwrap_or(0);
//!     doc.insert("replica_count".into(), json!(n + 1));
//!     Ok(())
//! })?;
//! # Ok::<(), statekeep::Error>(())
//! ```

pub use statekeep_core::{
    document_from_value, patch, Document, DocumentPatch, Error, LogEntry, PatchOp, Result,
    StoreState,
};
pub use statekeep_store::{
    atomic, config, document, log, registry, store, BoundedAppendLog, JsonDocument, LoadReport,
    Loaded, LogQuery, RetryPolicy, StateStore, StoreConfig, StoreRegistry,
};
