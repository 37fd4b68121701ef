//! Core domain types for the delivery engine.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod ids;
pub mod issue;
pub mod newsletter;
pub mod subscription;

// Re-export commonly used types at the module level
pub use ids::{IssueId, NewsletterId, SubscriptionId, UserId};
pub use issue::{DeliveryStatus, Issue, StatusMap};
pub use newsletter::{Newsletter, SubscriptionMode};
pub use subscription::{Account, Recipient, Subscription, SubscriptionHealth};
