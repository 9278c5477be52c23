//! Atomic file writes — temp file, fsync, rename
//!
//! Readers of the target path see either the previous content or the new
//! content, never a partial file. The rename is the only step that makes new
//! content visible.

use statekeep_core::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How many times a durable write is attempted, and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Base delay; attempt `n` waits `backoff * n` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Sibling temp path: `<path>.<pid>-<random>.tmp`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let token = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4().simple());
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", token));
    path.with_file_name(name)
}

/// A fully written and synced temp file that has not yet replaced its target.
///
/// Dropping an uncommitted `StagedFile` removes the temp file.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    temp: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Rename the temp file onto the target.
    pub fn commit(mut self) -> std::io::Result<()> {
        fs::rename(&self.temp, &self.target)?;
        self.committed = true;
        sync_parent(&self.target);
        debug!("Committed {}", self.target.display());
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Write `bytes` to a sibling temp file and force it to disk, without touching `path`.
pub fn stage(path: &Path, bytes: &[u8]) -> std::io::Result<StagedFile> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let staged = StagedFile {
        target: path.to_path_buf(),
        temp: temp_path_for(path),
        committed: false,
    };

    // `staged` owns the temp path from here; an early return cleans it up.
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staged.temp)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    Ok(staged)
}

/// Atomically replace `path` with `bytes`. One attempt.
pub fn write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    stage(path, bytes)?.commit()
}

/// Atomically replace `path` with `bytes`, retrying per `policy`.
pub fn write_with_retry(path: &Path, bytes: &[u8], policy: &RetryPolicy) -> Result<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match write(path, bytes) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Write to {} failed (attempt {}/{}): {}, retrying in {:?}",
                    path.display(),
                    attempt,
                    attempts,
                    e,
                    delay
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(Error::write_failure(path, attempt, e)),
        }
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
