//! Durable persistence for delivery progress.
//!
//! This module provides the crash-safe checkpoint ledger and the low-level
//! fsync helpers it (and the lock manager) relies on.
//!
//! # Crash Safety
//!
//! - Checkpoint saves are atomic: write-to-temp-then-rename, with fsync on
//!   both the file and its directory.
//! - A crash between a send attempt and its checkpoint save loses at most
//!   that one attempt's outcome; the recipient is retried on resume.

pub mod checkpoint;
pub mod fsync;

pub use checkpoint::{CheckpointError, CheckpointSnapshot, CheckpointStore};
pub use fsync::{fsync_dir, fsync_file};
