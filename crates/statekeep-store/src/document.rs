//! JSON state documents — load with defaults, recover from corruption, save durably
//!
//! A document on disk is a single JSON object. Loading guarantees that every
//! key of the default schema is present: missing keys (and missing sub-keys of
//! mapping defaults, one level deep) are backfilled and the upgraded document
//! is written back. Keys the schema does not know about are kept.
//!
//! A file that does not parse, or whose top-level value is not an object, is
//! copied to `<path>.bak` and replaced with the defaults.
//!
//! `inspect()` performs the same steps in memory without touching the disk,
//! for callers that only want to write once their own change succeeds.

use crate::atomic::{self, RetryPolicy};
use crate::unix_now;
use serde_json::Value;
use statekeep_core::{document_from_value, Document, Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Schema field stamped on every explicit save, when the schema declares it.
pub const LAST_UPDATED: &str = "last_updated";

/// What a load had to do to produce its document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// No file existed; defaults were written.
    pub created: bool,
    /// The file was corrupt; it was backed up and replaced with defaults.
    pub recovered: bool,
    /// Key paths filled from the schema (`key` or `key.sub`).
    pub backfilled: Vec<String>,
    /// Top-level keys present in the file but not in the schema.
    pub unknown_keys: Vec<String>,
    /// Whether this load wrote to disk.
    pub persisted: bool,
}

#[derive(Debug, Clone)]
pub struct Loaded {
    pub document: Document,
    pub report: LoadReport,
}

/// A document bound to a path and its default schema.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    path: PathBuf,
    defaults: Document,
    retry: RetryPolicy,
}

impl JsonDocument {
    pub fn new(path: impl Into<PathBuf>, defaults: Document) -> Self {
        Self {
            path: path.into(),
            defaults,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &Document {
        &self.defaults
    }

    pub fn backup_path(&self) -> PathBuf {
        backup_path_for(&self.path)
    }

    /// Load the document, writing back whatever creation, recovery or
    /// backfill produced.
    pub fn load(&self) -> Result<Loaded> {
        let mut loaded = self.inspect()?;
        let report = &mut loaded.report;
        if report.created || report.recovered || !report.backfilled.is_empty() {
            if report.recovered {
                self.back_up_corrupt();
            }
            self.write(&loaded.document)?;
            report.persisted = true;
        }
        Ok(loaded)
    }

    /// Load the document in memory only. The file is read but never written
    /// or moved; `report.persisted` is always false.
    pub fn inspect(&self) -> Result<Loaded> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No state at {}, using defaults", self.path.display());
                return Ok(Loaded {
                    document: self.defaults.clone(),
                    report: LoadReport {
                        created: true,
                        ..Default::default()
                    },
                });
            }
            Err(e) => return Err(Error::read_failure(&self.path, e)),
        };

        let Some(mut document) = parse_document(&bytes) else {
            warn!(
                "Corrupt state at {}, reinitializing from defaults",
                self.path.display()
            );
            return Ok(Loaded {
                document: self.defaults.clone(),
                report: LoadReport {
                    recovered: true,
                    ..Default::default()
                },
            });
        };

        let report = LoadReport {
            backfilled: backfill(&mut document, &self.defaults),
            unknown_keys: unknown_keys(&document, &self.defaults),
            ..Default::default()
        };

        if !report.unknown_keys.is_empty() {
            debug!(
                "{} has keys not in the default schema: {}",
                self.path.display(),
                report.unknown_keys.join(", ")
            );
        }
        if !report.backfilled.is_empty() {
            info!(
                "Backfilled {} from defaults in {}",
                report.backfilled.join(", "),
                self.path.display()
            );
        }

        Ok(Loaded { document, report })
    }

    /// Write the default schema back verbatim.
    pub fn reset(&self) -> Result<Document> {
        let document = self.defaults.clone();
        self.write(&document)?;
        Ok(document)
    }

    /// Stamp `last_updated` (if the schema declares it) and write durably.
    pub fn save(&self, document: &mut Document) -> Result<()> {
        stamp_last_updated(document, &self.defaults);
        self.write(document)
    }

    /// Save a document derived from an `inspect()`. A corrupt original found
    /// by that inspection is backed up before it is replaced.
    pub fn save_inspected(&self, report: &LoadReport, document: &mut Document) -> Result<()> {
        if report.recovered {
            self.back_up_corrupt();
        }
        self.save(document)
    }

    fn write(&self, document: &Document) -> Result<()> {
        let bytes = to_pretty_bytes(document)?;
        atomic::write_with_retry(&self.path, &bytes, &self.retry)?;
        debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    // Copy rather than rename, so the target still exists if the write of
    // the replacement fails.
    fn back_up_corrupt(&self) {
        let backup = self.backup_path();
        match fs::copy(&self.path, &backup) {
            Ok(_) => warn!(
                "Original of corrupt {} kept at {}",
                self.path.display(),
                backup.display()
            ),
            Err(e) => warn!(
                "Backup of corrupt {} to {} failed: {}",
                self.path.display(),
                backup.display(),
                e
            ),
        }
    }
}

/// Load `path` against `defaults` with the default retry policy.
pub fn load(path: impl AsRef<Path>, defaults: &Document) -> Result<Document> {
    JsonDocument::new(path.as_ref(), defaults.clone())
        .load()
        .map(|loaded| loaded.document)
}

/// Save `document` to `path` with the default retry policy. No schema, so no stamping.
pub fn save(path: impl AsRef<Path>, document: &Document) -> Result<()> {
    let bytes = to_pretty_bytes(document)?;
    atomic::write_with_retry(path.as_ref(), &bytes, &RetryPolicy::default())
}

pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Fill keys missing from `document` with schema defaults. Returns the filled key paths.
pub fn backfill(document: &mut Document, defaults: &Document) -> Vec<String> {
    let mut filled = Vec::new();
    for (key, default) in defaults {
        match document.get_mut(key) {
            None => {
                document.insert(key.clone(), default.clone());
                filled.push(key.clone());
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(sub_defaults) = default {
                    for (sub, value) in sub_defaults {
                        if !existing.contains_key(sub) {
                            existing.insert(sub.clone(), value.clone());
                            filled.push(format!("{}.{}", key, sub));
                        }
                    }
                }
            }
            Some(_) => {}
        }
    }
    filled
}

pub fn unknown_keys(document: &Document, defaults: &Document) -> Vec<String> {
    document
        .keys()
        .filter(|k| !defaults.contains_key(*k))
        .cloned()
        .collect()
}

fn parse_document(bytes: &[u8]) -> Option<Document> {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(document_from_value)
}

fn stamp_last_updated(document: &mut Document, defaults: &Document) {
    let stamp = match defaults.get(LAST_UPDATED) {
        None => return,
        Some(Value::Number(_)) => Value::from(unix_now()),
        Some(_) => Value::String(chrono::Utc::now().to_rfc3339()),
    };
    document.insert(LAST_UPDATED.to_string(), stamp);
}

/// Sorted keys, two-space indent, trailing newline.
pub fn to_pretty_bytes(document: &Document) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(document)?;
    bytes.push(b'\n');
    Ok(bytes)
}
