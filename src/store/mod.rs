//! Durable storage seams for newsletters, issues, subscriptions, and
//! accounts.
//!
//! The delivery engine and the subscription registry consume storage
//! through these per-concern traits, so the core logic runs against an
//! in-memory store in tests and a file-backed store in the binary. No
//! ambient singletons: a store instance is passed in explicitly.

use std::io;

use thiserror::Error;

use crate::types::{
    Account, Issue, IssueId, Newsletter, NewsletterId, StatusMap, Subscription, SubscriptionHealth,
    SubscriptionId, UserId,
};

pub mod json;
pub mod memory;

pub use json::JsonStore;
pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error while persisting the backing document.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch in the backing document.
    #[error("store schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// A subscription row already exists for this (user, newsletter) pair.
    #[error("duplicate subscription for {user} in {newsletter}")]
    DuplicateSubscription {
        user: UserId,
        newsletter: NewsletterId,
    },

    /// The referenced subscription row does not exist.
    #[error("no such {0}")]
    MissingSubscription(SubscriptionId),

    /// The referenced issue does not exist.
    #[error("no such {0}")]
    MissingIssue(IssueId),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A subscription row about to be inserted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: UserId,
    pub newsletter_id: NewsletterId,
    pub health: SubscriptionHealth,
    pub time_subscribed: chrono::DateTime<chrono::Utc>,
    pub subscribed_by: UserId,
}

/// Read and write access to newsletters and their issues.
pub trait IssueStore {
    fn newsletters(&self) -> Result<Vec<Newsletter>>;

    fn newsletter(&self, id: NewsletterId) -> Result<Option<Newsletter>>;

    /// All issues across all newsletters. The delivery loop filters for
    /// due ones itself so the cutoff instant is taken exactly once.
    fn issues(&self) -> Result<Vec<Issue>>;

    /// Commits an issue's per-recipient status map and `delivered` flag.
    fn write_issue_status(
        &mut self,
        issue: IssueId,
        statuses: &StatusMap,
        delivered: bool,
    ) -> Result<()>;
}

/// Read and write access to subscription rows.
pub trait SubscriptionStore {
    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    fn subscription_for(
        &self,
        user: UserId,
        newsletter: NewsletterId,
    ) -> Result<Option<Subscription>>;

    fn subscriptions_for_newsletter(&self, newsletter: NewsletterId) -> Result<Vec<Subscription>>;

    fn subscriptions_for_user(&self, user: UserId) -> Result<Vec<Subscription>>;

    /// Inserts a new row, enforcing the one-row-per-(user, newsletter)
    /// invariant. Returns the assigned id.
    fn insert_subscription(&mut self, row: NewSubscription) -> Result<SubscriptionId>;

    /// Replaces an existing row in full.
    fn update_subscription(&mut self, row: &Subscription) -> Result<()>;

    /// Hard removal of one row (distinct from unsubscribing).
    fn delete_subscription(&mut self, id: SubscriptionId) -> Result<()>;

    /// Hard removal of all of a user's rows. Returns how many were removed.
    fn delete_subscriptions_for_user(&mut self, user: UserId) -> Result<usize>;
}

/// Read and write access to user accounts.
pub trait AccountStore {
    fn account(&self, id: UserId) -> Result<Option<Account>>;

    fn accounts(&self) -> Result<Vec<Account>>;

    fn delete_account(&mut self, id: UserId) -> Result<()>;
}
