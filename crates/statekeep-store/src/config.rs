//! Store configuration
//!
//! The scalars a store consumes. Loaded from TOML by the embedding
//! application, falls back to defaults if no config file exists.

use crate::atomic::RetryPolicy;
use serde::{Deserialize, Serialize};
use statekeep_core::{Error, Result};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Retention cap for each store's audit log.
    pub max_entries: usize,
    /// Write attempts before a save fails with `WriteFailure`.
    pub retry_count: u32,
    /// Base backoff between write attempts; grows linearly per attempt.
    pub retry_backoff_seconds: f64,
    /// Mirror each store's audit log to `<path>.audit.json`.
    pub mirror_audit_log: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            retry_count: 3,
            retry_backoff_seconds: 0.05,
            mirror_audit_log: false,
        }
    }
}

impl StoreConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded store config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("{} in {}, using defaults", e, path.display());
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No store config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let secs = if self.retry_backoff_seconds.is_finite() {
            self.retry_backoff_seconds.max(0.0)
        } else {
            0.0
        };
        let backoff = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        RetryPolicy::new(self.retry_count, backoff)
    }
}
