//! File-based mutual exclusion for delivery passes.
//!
//! At most one delivery pass may run at a time across the whole subsystem.
//! The lock is a marker file at a well-known path: acquisition creates it
//! with `create_new` (so two processes racing for the lock cannot both
//! win), release removes it.
//!
//! # Staleness
//!
//! The process holding the lock has no heartbeat, so a crash leaves the
//! marker behind. Reclaim policy is explicit configuration, not silent
//! behavior: a marker older than [`LockConfig::stale_after`] is presumed to
//! belong to a dead process and is reclaimed (with a warning log) before a
//! single retry. Setting `stale_after` to `None` disables reclaim; the
//! marker must then be cleared with [`LockManager::force_clear`], the
//! administrative override.
//!
//! # Release
//!
//! [`LockHandle`] removes the marker on `Drop`, so the lock is released on
//! every exit path of a pass, including error propagation. Explicit
//! [`LockManager::release`] is preferred where the result can be checked.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::persist::fsync::{fsync_dir, fsync_file};

/// Errors that can occur during lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another pass holds the lock. Not a failure: the caller exits cleanly.
    #[error("delivery lock is held by another pass")]
    Busy,

    /// IO error during marker file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// Configuration for lock acquisition.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Age beyond which an existing marker is treated as left behind by a
    /// crashed process and reclaimed. `None` disables reclaim entirely.
    pub stale_after: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            stale_after: Some(Duration::hours(2)),
        }
    }
}

/// Proof of lock ownership. Removes the marker when dropped.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    released: bool,
}

impl LockHandle {
    fn release_file(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        std::fs::remove_file(&self.path)?;
        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release_file() {
            // Nothing more we can do here; the marker will look stale to
            // the next pass.
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release delivery lock");
        }
    }
}

/// Manages the delivery subsystem's mutual-exclusion marker.
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
    config: LockConfig,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>, config: LockConfig) -> Self {
        LockManager {
            path: path.into(),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempts to acquire the lock.
    ///
    /// Fails with [`LockError::Busy`] if a live marker exists. A marker
    /// older than the configured staleness threshold is reclaimed first,
    /// then acquisition is retried exactly once.
    pub fn acquire(&self) -> Result<LockHandle> {
        match self.try_create() {
            Ok(handle) => Ok(handle),
            Err(LockError::Busy) => {
                if self.reclaim_if_stale()? {
                    self.try_create()
                } else {
                    Err(LockError::Busy)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the lock, removing the marker.
    pub fn release(&self, mut handle: LockHandle) -> Result<()> {
        handle.release_file()?;
        Ok(())
    }

    /// Administrative override: removes the marker unconditionally.
    ///
    /// For operator use only, after confirming the holding process is dead.
    /// Never invoked automatically; an automatic override could let two
    /// passes overlap.
    pub fn force_clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                if let Some(parent) = self.path.parent() {
                    fsync_dir(parent)?;
                }
                tracing::info!(path = %self.path.display(), "delivery lock cleared by operator");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn try_create(&self) -> Result<LockHandle> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path);

        match result {
            Ok(mut file) => {
                // The acquisition time doubles as the staleness reference
                // for a future pass, should this one die without releasing.
                let stamp = Utc::now().to_rfc3339();
                file.write_all(stamp.as_bytes())?;
                fsync_file(&file)?;
                if let Some(parent) = self.path.parent() {
                    fsync_dir(parent)?;
                }
                Ok(LockHandle {
                    path: self.path.clone(),
                    released: false,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(LockError::Busy),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes the marker if it is older than the staleness threshold.
    /// Returns true if a marker was reclaimed.
    fn reclaim_if_stale(&self) -> Result<bool> {
        let Some(stale_after) = self.config.stale_after else {
            return Ok(false);
        };

        let Some(acquired_at) = self.marker_timestamp()? else {
            // Marker vanished between the failed create and now; the other
            // pass finished. Let the retry pick it up.
            return Ok(true);
        };

        if Utc::now() - acquired_at > stale_after {
            tracing::warn!(
                path = %self.path.display(),
                acquired_at = %acquired_at,
                "reclaiming stale delivery lock"
            );
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            if let Some(parent) = self.path.parent() {
                fsync_dir(parent)?;
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Reads the acquisition timestamp from the marker, falling back to the
    /// file mtime when the contents are unreadable.
    fn marker_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Ok(stamp) = DateTime::parse_from_rfc3339(contents.trim()) {
            return Ok(Some(stamp.with_timezone(&Utc)));
        }

        let metadata = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(DateTime::<Utc>::from(metadata.modified()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> LockManager {
        LockManager::new(dir.join("delivery.lock"), LockConfig::default())
    }

    #[test]
    fn acquire_creates_marker() {
        let dir = tempdir().unwrap();
        let lock = manager(dir.path());

        let handle = lock.acquire().unwrap();
        assert!(lock.path().exists());
        lock.release(handle).unwrap();
        assert!(!lock.path().exists());
    }

    #[test]
    fn second_acquire_is_busy() {
        let dir = tempdir().unwrap();
        let lock = manager(dir.path());

        let _handle = lock.acquire().unwrap();
        assert!(matches!(lock.acquire(), Err(LockError::Busy)));
    }

    #[test]
    fn drop_releases() {
        let dir = tempdir().unwrap();
        let lock = manager(dir.path());

        {
            let _handle = lock.acquire().unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());

        // Reacquirable after drop.
        let _handle = lock.acquire().unwrap();
    }

    #[test]
    fn stale_marker_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.lock");

        // A marker stamped three hours ago, past the default threshold.
        let old = Utc::now() - Duration::hours(3);
        std::fs::write(&path, old.to_rfc3339()).unwrap();

        let lock = LockManager::new(&path, LockConfig::default());
        let handle = lock.acquire().unwrap();
        lock.release(handle).unwrap();
    }

    #[test]
    fn fresh_marker_is_not_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.lock");
        std::fs::write(&path, Utc::now().to_rfc3339()).unwrap();

        let lock = LockManager::new(&path, LockConfig::default());
        assert!(matches!(lock.acquire(), Err(LockError::Busy)));
    }

    #[test]
    fn reclaim_disabled_never_steals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.lock");

        let old = Utc::now() - Duration::days(30);
        std::fs::write(&path, old.to_rfc3339()).unwrap();

        let lock = LockManager::new(&path, LockConfig { stale_after: None });
        assert!(matches!(lock.acquire(), Err(LockError::Busy)));
    }

    #[test]
    fn unreadable_stamp_falls_back_to_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.lock");
        std::fs::write(&path, "garbage").unwrap();

        // mtime is now, so the marker is fresh regardless of contents.
        let lock = LockManager::new(&path, LockConfig::default());
        assert!(matches!(lock.acquire(), Err(LockError::Busy)));
    }

    #[test]
    fn force_clear_removes_any_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.lock");
        std::fs::write(&path, Utc::now().to_rfc3339()).unwrap();

        let lock = LockManager::new(&path, LockConfig { stale_after: None });
        lock.force_clear().unwrap();
        assert!(!path.exists());

        // Clearing an absent marker is fine.
        lock.force_clear().unwrap();

        let _handle = lock.acquire().unwrap();
    }
}
