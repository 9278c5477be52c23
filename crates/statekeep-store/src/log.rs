//! Bounded append log — capped, ordered event history
//!
//! Entries are appended under a mutex and the oldest are evicted once the log
//! holds more than `max_entries`. A log may mirror itself to disk as a JSON
//! array; mirroring is best-effort and never fails an append.

use crate::atomic::{self, RetryPolicy};
use crate::document::backup_path_for;
use crate::unix_now;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use statekeep_core::LogEntry;
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

struct LogInner {
    entries: VecDeque<LogEntry>,
    next_sequence: u64,
}

pub struct BoundedAppendLog {
    inner: Mutex<LogInner>,
    max_entries: usize,
    mirror: Option<Mirror>,
}

struct Mirror {
    path: PathBuf,
    retry: RetryPolicy,
}

/// Filter for [`BoundedAppendLog::query`]. All set conditions must hold.
#[derive(Default)]
pub struct LogQuery<'a> {
    filter: Option<Box<dyn Fn(&LogEntry) -> bool + 'a>>,
    kind: Option<String>,
    since: Option<f64>,
    limit: Option<usize>,
}

impl<'a> LogQuery<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, f: impl Fn(&LogEntry) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(f));
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Only entries with `timestamp >= since`.
    pub fn since(mut self, since: f64) -> Self {
        self.since = Some(since);
        self
    }

    /// Keep only the most recent `limit` matches.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(kind) = &self.kind {
            if &entry.kind != kind {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        self.filter.as_ref().map_or(true, |f| f(entry))
    }
}

impl BoundedAppendLog {
    /// In-memory only.
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                entries: VecDeque::new(),
                next_sequence: 1,
            }),
            max_entries,
            mirror: None,
        }
    }

    /// Mirrored to `path`. Entries from a previous mirror file are reloaded
    /// (trimmed to `max_entries`) and sequence numbering continues after them.
    pub fn mirrored(path: impl Into<PathBuf>, max_entries: usize, retry: RetryPolicy) -> Self {
        let path = path.into();
        let mut entries: VecDeque<LogEntry> = read_mirror(&path).into();
        while entries.len() > max_entries {
            entries.pop_front();
        }
        let next_sequence = entries.back().map_or(1, |e| e.sequence + 1);
        if !entries.is_empty() {
            info!(
                "Reloaded {} log entries from {}",
                entries.len(),
                path.display()
            );
        }

        Self {
            inner: Mutex::new(LogInner {
                entries,
                next_sequence,
            }),
            max_entries,
            mirror: Some(Mirror { path, retry }),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn mirror_path(&self) -> Option<&Path> {
        self.mirror.as_ref().map(|m| m.path.as_path())
    }

    pub fn append(&self, kind: impl Into<String>, payload: Value) -> LogEntry {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let mut inner = self.inner.lock();
        let entry = LogEntry {
            timestamp: unix_now(),
            kind: kind.into(),
            payload,
            sequence: inner.next_sequence,
        };
        inner.next_sequence += 1;
        inner.entries.push_back(entry.clone());
        while inner.entries.len() > self.max_entries {
            inner.entries.pop_front();
        }

        // Mirror under the lock so file order matches append order.
        self.write_mirror(&inner.entries);
        entry
    }

    pub fn query(&self, query: &LogQuery<'_>) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        let mut matched: Vec<LogEntry> = inner
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            if matched.len() > limit {
                matched.drain(..matched.len() - limit);
            }
        }
        matched
    }

    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop all entries. Sequence numbering is not reset.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        self.write_mirror(&inner.entries);
    }

    fn write_mirror(&self, entries: &VecDeque<LogEntry>) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        let bytes = match serde_json::to_vec_pretty(entries) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to serialize log mirror: {}", e);
                return;
            }
        };
        if let Err(e) = atomic::write_with_retry(&mirror.path, &bytes, &mirror.retry) {
            warn!("Log mirror write failed, keeping in-memory entries: {}", e);
        }
    }
}

impl std::fmt::Debug for BoundedAppendLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedAppendLog")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .field("mirror", &self.mirror_path())
            .finish()
    }
}

fn read_mirror(path: &Path) -> Vec<LogEntry> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read log mirror {}: {}, starting empty", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<LogEntry>>(&bytes) {
        Ok(entries) => entries,
        Err(e) => {
            let backup = backup_path_for(path);
            warn!(
                "Corrupt log mirror {}: {}, moving to {}",
                path.display(),
                e,
                backup.display()
            );
            if let Err(e) = fs::rename(path, &backup) {
                debug!("Log mirror backup failed: {}", e);
            }
            Vec::new()
        }
    }
}
