//! Cross-process lock file guarding the state file.
//!
//! The lock is a sibling file created with `create_new`, which fails if it
//! already exists on every platform. The file holds an ownership token so a
//! process only ever removes its own lock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use rand::Rng;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{NinjaexaError, Result};

const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// An exclusively held lock file, released on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    token: String,
}

impl LockFile {
    /// Acquire the lock at `path`, retrying with jittered backoff until `timeout`.
    ///
    /// A lock file older than `stale_after` is assumed abandoned by a crashed
    /// process and removed.
    pub fn acquire(path: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let token = format!("{} {}", std::process::id(), Uuid::new_v4());
        let deadline = Instant::now() + timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        let _ = fs::remove_file(path);
                        return Err(e.into());
                    }
                    trace!(path = %path.display(), "Acquired state lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::break_if_stale(path, stale_after) {
                        continue;
                    }
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(NinjaexaError::LockTimeout {
                    path: path.to_path_buf(),
                    waited: timeout,
                });
            }

            let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
            let pause = (backoff + Duration::from_millis(jitter_ms)).min(deadline - now);
            thread::sleep(pause);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a lock file whose last modification is older than `stale_after`.
    fn break_if_stale(path: &Path, stale_after: Duration) -> bool {
        match Self::stale_token(path, stale_after) {
            Some(token) => Self::remove_if_unchanged(path, &token),
            None => false,
        }
    }

    /// The token of the lock at `path` if it is older than `stale_after`.
    ///
    /// Token and age come from one open handle, so they describe the same file.
    fn stale_token(path: &Path, stale_after: Duration) -> Option<String> {
        let mut file = File::open(path).ok()?;
        let modified = file.metadata().and_then(|meta| meta.modified()).ok()?;
        let age = SystemTime::now().duration_since(modified).ok()?;
        if age < stale_after {
            return None;
        }

        let mut token = String::new();
        file.read_to_string(&mut token).ok()?;
        warn!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "Breaking stale rate limiter lock"
        );
        Some(token)
    }

    /// Remove the lock at `path` only if it still holds `expected`.
    ///
    /// The lock is first moved aside under a unique name, so a fresh lock
    /// created by a faster waiter is never deleted; it is linked back instead.
    fn remove_if_unchanged(path: &Path, expected: &str) -> bool {
        let mut tombstone = path.as_os_str().to_owned();
        tombstone.push(format!(".stale-{}", Uuid::new_v4()));
        let tombstone = PathBuf::from(tombstone);

        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            // Another waiter already broke it
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to break stale lock");
                return false;
            }
        }

        let unchanged = fs::read_to_string(&tombstone).map_or(false, |token| token == expected);
        if !unchanged {
            debug!(path = %path.display(), "Lock changed hands while breaking it; restoring");
            if let Err(e) = fs::hard_link(&tombstone, path) {
                warn!(path = %path.display(), error = %e, "Failed to restore live lock");
            }
        }
        if let Err(e) = fs::remove_file(&tombstone) {
            warn!(path = %tombstone.display(), error = %e, "Failed to remove lock tombstone");
        }
        unchanged
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "Failed to release state lock");
                } else {
                    trace!(path = %self.path.display(), "Released state lock");
                }
            }
            Ok(_) => {
                warn!(
                    path = %self.path.display(),
                    "State lock was taken over by another process; leaving it in place"
                );
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "State lock already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");

        let lock = LockFile::acquire(&path, Duration::from_millis(100), LONG).unwrap();
        assert!(path.exists());
        assert_eq!(lock.path(), path.as_path());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");

        let _held = LockFile::acquire(&path, Duration::from_millis(100), LONG).unwrap();
        let err = LockFile::acquire(&path, Duration::from_millis(50), LONG).unwrap_err();
        assert!(matches!(err, NinjaexaError::LockTimeout { .. }));
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");
        fs::write(&path, "12345 abandoned").unwrap();

        let lock = LockFile::acquire(&path, Duration::from_millis(100), Duration::ZERO).unwrap();
        assert_ne!(fs::read_to_string(&path).unwrap(), "12345 abandoned");
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_foreign_lock_is_left_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");

        let lock = LockFile::acquire(&path, Duration::from_millis(100), LONG).unwrap();
        fs::write(&path, "999 someone-else").unwrap();
        drop(lock);

        assert_eq!(fs::read_to_string(&path).unwrap(), "999 someone-else");
    }

    #[test]
    fn test_stale_break_spares_a_replaced_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");

        // Judged stale while it held one token, replaced before removal
        fs::write(&path, "777 fresh-owner").unwrap();
        assert!(!LockFile::remove_if_unchanged(&path, "12345 abandoned"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "777 fresh-owner");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(LockFile::remove_if_unchanged(&path, "777 fresh-owner"));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_fresh_lock_is_not_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");
        fs::write(&path, "12345 owner").unwrap();

        assert_eq!(LockFile::stale_token(&path, LONG), None);
        assert_eq!(
            LockFile::stale_token(&path, Duration::ZERO).as_deref(),
            Some("12345 owner")
        );
        assert!(path.exists());
    }

    #[test]
    fn test_released_lock_can_be_reacquired() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.lock");

        for _ in 0..3 {
            let _lock = LockFile::acquire(&path, Duration::from_millis(100), LONG).unwrap();
        }
        assert!(!path.exists());
    }
}
