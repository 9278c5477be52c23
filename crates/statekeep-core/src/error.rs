//! Error types for statekeep

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The durable write did not complete; the target keeps its previous content.
    #[error("write failed: {} after {attempts} attempt(s): {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {}: {source}", path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller-supplied mutator failed; nothing was saved.
    #[error("document update failed: {0}")]
    DocumentUpdate(#[source] anyhow::Error),

    #[error("invalid patch on `{key}`: {reason}")]
    InvalidPatch { key: String, reason: String },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn write_failure(path: impl AsRef<Path>, attempts: u32, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.as_ref().to_path_buf(),
            attempts,
            source,
        }
    }

    pub fn read_failure(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::ReadFailure {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_patch(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPatch {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True if the on-disk state is guaranteed unchanged by the failed call.
    pub fn is_disk_unchanged(&self) -> bool {
        matches!(
            self,
            Self::WriteFailure { .. } | Self::DocumentUpdate(_) | Self::InvalidPatch { .. }
        )
    }
}
