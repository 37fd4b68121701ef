//! The durable delivery checkpoint.
//!
//! The checkpoint is the progress ledger of an in-flight delivery pass: for
//! every tracked issue, its full recipient-to-status map. It is written
//! after every individual send attempt, so a crashed or killed pass resumes
//! from the last completed send rather than restarting.
//!
//! # File Format
//!
//! A single JSON document at a well-known path, shaped
//! `{ "<issue id>": { "<user id>": 0|1|2 } }`. The shape is deliberately
//! unversioned and flat: it must stay readable by (and from) the temp file
//! the original implementation wrote.
//!
//! # Atomic Writes
//!
//! Saves use the write-to-temp-then-rename pattern:
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename over `<path>`
//! 4. fsync the parent directory
//!
//! A crash mid-save leaves either the previous or the new checkpoint on
//! disk, never a torn one.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::types::{IssueId, StatusMap, UserId};

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// The full recipient-to-status ledger for every in-flight issue.
///
/// Serializes transparently to the external `{issue: {user: code}}` shape.
/// `BTreeMap` keeps issue iteration order stable across save/load cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointSnapshot(pub BTreeMap<IssueId, StatusMap>);

impl CheckpointSnapshot {
    pub fn new() -> Self {
        CheckpointSnapshot::default()
    }

    pub fn issue(&self, issue: IssueId) -> Option<&StatusMap> {
        self.0.get(&issue)
    }

    pub fn issue_mut(&mut self, issue: IssueId) -> Option<&mut StatusMap> {
        self.0.get_mut(&issue)
    }

    pub fn track(&mut self, issue: IssueId, statuses: StatusMap) {
        self.0.insert(issue, statuses);
    }

    pub fn record(&mut self, issue: IssueId, user: UserId, status: crate::types::DeliveryStatus) {
        self.0.entry(issue).or_default().set(user, status);
    }

    pub fn issues(&self) -> impl Iterator<Item = (IssueId, &StatusMap)> {
        self.0.iter().map(|(id, map)| (*id, map))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Durable storage for the checkpoint, keyed by a well-known path.
///
/// At most one checkpoint file exists at a time; it is a singleton scoped
/// to the whole delivery subsystem, not per-newsletter.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CheckpointStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the checkpoint, returning `None` if no pass is in flight.
    ///
    /// A malformed file is an error, not `None`: silently discarding a
    /// corrupt ledger would re-send everything.
    pub fn load(&self) -> Result<Option<CheckpointSnapshot>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some(snapshot))
    }

    /// Saves the checkpoint atomically.
    ///
    /// Called after every individual send attempt; the tight persistence
    /// cadence bounds the crash-recovery ambiguity to a single in-flight
    /// send.
    pub fn save(&self, snapshot: &CheckpointSnapshot) -> Result<()> {
        use std::fs::OpenOptions;
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        let bytes = serde_json::to_vec(snapshot)?;

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            fsync_file(&file)?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }

        Ok(())
    }

    /// Removes the checkpoint.
    ///
    /// Only called after every tracked issue's final status has been
    /// committed to the issue store. Removing an absent file is not an
    /// error, so `clear` is safe to retry.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}
