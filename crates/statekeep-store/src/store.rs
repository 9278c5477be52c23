//! StateStore — one document, one lock, one audit trail
//!
//! Every load-modify-save sequence runs while holding the store's mutex, so
//! concurrent `update()` calls serialize instead of interleaving. The store
//! keeps the last-known-good document in memory; a failed update leaves both
//! the file and that copy untouched, even when the file on disk needed
//! backfill or recovery.
//!
//! Only one process should write a given path. Rename atomicity keeps the
//! file intact under concurrent writers from different processes, but the
//! last writer wins.

use crate::atomic::RetryPolicy;
use crate::config::StoreConfig;
use crate::document::{JsonDocument, LoadReport, LAST_UPDATED};
use crate::log::BoundedAppendLog;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use statekeep_core::{Document, DocumentPatch, Error, Result, StoreState};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

struct StoreInner {
    cached: Document,
    state: StoreState,
}

pub struct StateStore {
    document: JsonDocument,
    inner: Mutex<StoreInner>,
    audit: BoundedAppendLog,
}

/// Sibling audit mirror: `<path>.audit.json`.
pub fn audit_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".audit.json");
    PathBuf::from(name)
}

impl StateStore {
    /// Open (creating, recovering or backfilling as needed) the document at `path`.
    pub fn open(path: impl Into<PathBuf>, defaults: Document, config: &StoreConfig) -> Result<Self> {
        let path = path.into();
        let retry = config.retry_policy();
        // Mirroring is best-effort and runs under the store lock, so it never retries.
        let audit = if config.mirror_audit_log {
            BoundedAppendLog::mirrored(
                audit_path_for(&path),
                config.max_entries,
                RetryPolicy::none(),
            )
        } else {
            BoundedAppendLog::new(config.max_entries)
        };
        let document = JsonDocument::new(path, defaults).with_retry(retry);

        let loaded = document.load()?;
        if !loaded.report.unknown_keys.is_empty() {
            warn!(
                "{} has keys not in the default schema (kept): {}",
                document.path().display(),
                loaded.report.unknown_keys.join(", ")
            );
        }
        record_load(&audit, &loaded.report);
        let state = state_after(&loaded.report);
        info!("Opened store {} ({})", document.path().display(), state);

        Ok(Self {
            document,
            inner: Mutex::new(StoreInner {
                cached: loaded.document,
                state,
            }),
            audit,
        })
    }

    pub fn path(&self) -> &Path {
        self.document.path()
    }

    pub fn defaults(&self) -> &Document {
        self.document.defaults()
    }

    pub fn audit(&self) -> &BoundedAppendLog {
        &self.audit
    }

    pub fn state(&self) -> StoreState {
        self.inner.lock().state
    }

    /// A copy of the last-known-good document.
    pub fn get_state(&self) -> Document {
        self.inner.lock().cached.clone()
    }

    /// Load, mutate a working copy, save. Runs entirely under the store lock.
    ///
    /// If `mutator` fails nothing is written and the cause comes back wrapped
    /// in `Error::DocumentUpdate`.
    pub fn update<F>(&self, mutator: F) -> Result<Document>
    where
        F: FnOnce(&mut Document) -> anyhow::Result<()>,
    {
        self.transact("update", Map::new(), |current| {
            let mut working = current.clone();
            mutator(&mut working).map_err(Error::DocumentUpdate)?;
            Ok(working)
        })
    }

    /// Apply a typed patch as one update.
    pub fn apply(&self, patch: &DocumentPatch) -> Result<Document> {
        let mut extra = Map::new();
        extra.insert(
            "patch".to_string(),
            serde_json::to_value(patch).unwrap_or(Value::Null),
        );
        self.transact("patch", extra, |current| {
            statekeep_core::patch::apply(current, patch)
        })
    }

    /// Like `update`, but a failure is logged once and the last-known-good
    /// document is returned instead.
    pub fn update_or_stale<F>(&self, mutator: F) -> Document
    where
        F: FnOnce(&mut Document) -> anyhow::Result<()>,
    {
        match self.update(mutator) {
            Ok(document) => document,
            Err(e) => {
                error!(
                    "Update of {} failed, continuing with last-known-good state: {}",
                    self.path().display(),
                    describe(&e)
                );
                self.get_state()
            }
        }
    }

    /// Write the default schema back.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let document = self.document.reset()?;
        inner.cached = document;
        inner.state = StoreState::Fresh;
        self.audit.append("reset", Value::Null);
        info!("Reset {} to defaults", self.path().display());
        Ok(())
    }

    /// Re-read the file, picking up changes made outside this store.
    pub fn reload(&self) -> Result<Document> {
        let mut inner = self.inner.lock();
        self.load_into(&mut inner)
    }

    fn load_into(&self, inner: &mut StoreInner) -> Result<Document> {
        let loaded = self.document.load()?;
        record_load(&self.audit, &loaded.report);
        inner.state = state_after(&loaded.report);
        inner.cached = loaded.document.clone();
        Ok(loaded.document)
    }

    fn transact<F>(&self, kind: &str, mut extra: Map<String, Value>, f: F) -> Result<Document>
    where
        F: FnOnce(&Document) -> Result<Document>,
    {
        let mut inner = self.inner.lock();
        // Backfill and recovery stay in memory until `f` succeeds; the save
        // below is the only write.
        let loaded = self.document.inspect()?;
        let current = loaded.document;

        let mut next = match f(&current) {
            Ok(next) => next,
            Err(e) => return Err(self.record_failure(kind, e)),
        };
        if let Err(e) = self.document.save_inspected(&loaded.report, &mut next) {
            return Err(self.record_failure(kind, e));
        }
        record_load(&self.audit, &loaded.report);

        let keys: Vec<Value> = changed_keys(&current, &next)
            .into_iter()
            .map(Value::String)
            .collect();
        extra.insert("keys".to_string(), Value::Array(keys));
        self.audit.append(kind, Value::Object(extra));

        inner.cached = next.clone();
        inner.state = StoreState::Populated;
        Ok(next)
    }

    fn record_failure(&self, kind: &str, e: Error) -> Error {
        self.audit.append(
            "update_failed",
            json!({ "op": kind, "error": describe(&e) }),
        );
        e
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path())
            .field("state", &self.state())
            .field("audit", &self.audit)
            .finish()
    }
}

fn state_after(report: &LoadReport) -> StoreState {
    if report.created || report.recovered {
        StoreState::Fresh
    } else {
        StoreState::Populated
    }
}

fn record_load(audit: &BoundedAppendLog, report: &LoadReport) {
    if report.created {
        audit.append("created", Value::Null);
    }
    if report.recovered {
        audit.append("recovered", Value::Null);
    }
    if !report.backfilled.is_empty() {
        audit.append("backfilled", json!({ "keys": report.backfilled }));
    }
}

/// Top-level keys whose value differs, ignoring the save timestamp.
fn changed_keys(before: &Document, after: &Document) -> Vec<String> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|k| k.as_str() != LAST_UPDATED && before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}

/// Error text including the wrapped mutator cause chain.
fn describe(e: &Error) -> String {
    match e {
        Error::DocumentUpdate(cause) => format!("document update failed: {:#}", cause),
        other => other.to_string(),
    }
}
