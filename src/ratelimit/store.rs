//! State file handle: locking, loading and atomic saving.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::lock::LockFile;
use super::state::LimiterState;
use crate::config::StorageConfig;
use crate::error::Result;

/// Handle to the shared state file.
///
/// Every process that rate-limits against the same path shares one budget.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    stale_after: Duration,
}

impl StateFile {
    /// Create a handle with the default lock settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_config(&StorageConfig {
            state_file: Some(path.into()),
            ..StorageConfig::default()
        })
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self {
            path: storage.state_path(),
            lock_path: storage.lock_path(),
            lock_timeout: storage.lock_timeout(),
            stale_after: storage.stale_after(),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Take the exclusive lock guarding read-modify-write of the state.
    pub fn lock(&self) -> Result<LockFile> {
        self.ensure_dir()?;
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        LockFile::acquire(&self.lock_path, self.lock_timeout, self.stale_after)
    }

    /// Read the state, `None` if no file exists yet.
    pub fn try_load(&self) -> Result<Option<LimiterState>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => LimiterState::from_json(&contents).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the state, falling back to a fresh record if it is missing or corrupt.
    pub fn load(&self) -> LimiterState {
        match self.try_load() {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!(path = %self.path.display(), "No rate limiter state yet, starting fresh");
                LimiterState::default()
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Rate limiter state unreadable, starting fresh"
                );
                LimiterState::default()
            }
        }
    }

    /// Write the state atomically: temp file in the same directory, then rename.
    pub fn save(&self, state: &LimiterState) -> Result<()> {
        let dir = self.ensure_dir()?;
        let json = state.to_json()?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), "Saved rate limiter state");
        Ok(())
    }

    fn ensure_dir(&self) -> Result<&Path> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        Ok(dir)
    }
}
