//! Issues and per-recipient delivery state.
//!
//! An issue is one composed message scheduled for delivery under a
//! newsletter. Its durable `status` map records, per recipient, how far
//! delivery has progressed. The map uses integer wire codes (0/1/2) so the
//! on-disk shape stays compatible with the checkpoint file format.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{IssueId, NewsletterId, UserId};

/// Per-recipient delivery state. Transitions only move forward:
/// `Unknown` is the initial state, `Failed` is retried on a later pass,
/// `Delivered` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DeliveryStatus {
    /// No send has been attempted yet.
    Unknown,

    /// The transport reported success. Terminal.
    Delivered,

    /// The transport reported failure; retried on the next pass.
    Failed,
}

impl DeliveryStatus {
    /// Returns true if no further send attempt is needed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }
}

impl From<DeliveryStatus> for u8 {
    fn from(status: DeliveryStatus) -> u8 {
        match status {
            DeliveryStatus::Unknown => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Failed => 2,
        }
    }
}

impl TryFrom<u8> for DeliveryStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DeliveryStatus::Unknown),
            1 => Ok(DeliveryStatus::Delivered),
            2 => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status code: {}", other)),
        }
    }
}

/// Ordered map from recipient to delivery status for one issue.
///
/// A `BTreeMap` underneath so recipients iterate in a stable order; the
/// delivery loop depends on this for deterministic send order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMap(pub BTreeMap<UserId, DeliveryStatus>);

impl StatusMap {
    /// Creates a map with every given recipient in the `Unknown` state.
    pub fn unknown_for(recipients: impl IntoIterator<Item = UserId>) -> Self {
        StatusMap(
            recipients
                .into_iter()
                .map(|user| (user, DeliveryStatus::Unknown))
                .collect(),
        )
    }

    pub fn get(&self, user: UserId) -> Option<DeliveryStatus> {
        self.0.get(&user).copied()
    }

    pub fn set(&mut self, user: UserId, status: DeliveryStatus) {
        self.0.insert(user, status);
    }

    /// Recipients whose status is not yet terminal, in stable order.
    pub fn undelivered(&self) -> impl Iterator<Item = UserId> + '_ {
        self.0
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(user, _)| *user)
    }

    /// True iff every tracked recipient has reached `Delivered`.
    ///
    /// An empty map is complete: an issue with no eligible recipients at
    /// freeze time has nothing left to deliver.
    pub fn is_complete(&self) -> bool {
        self.0.values().all(DeliveryStatus::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(UserId, DeliveryStatus)> for StatusMap {
    fn from_iter<T: IntoIterator<Item = (UserId, DeliveryStatus)>>(iter: T) -> Self {
        StatusMap(iter.into_iter().collect())
    }
}

/// One deliverable message under a newsletter.
///
/// Immutable once its publish time has passed and delivery has begun,
/// except for `status` and `delivered`, which only the delivery loop
/// mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub newsletter_id: NewsletterId,
    pub title: String,

    /// Authored HTML body. Plaintext and inlined-CSS variants are derived
    /// by the renderer collaborator at delivery time.
    pub html_content: String,

    /// Stylesheet selected by the editor, resolved by the renderer.
    pub stylesheet_id: u64,

    /// The issue becomes due once this time has elapsed.
    pub publish_on: DateTime<Utc>,

    /// Set once every tracked recipient has reached `Delivered`.
    pub delivered: bool,

    /// Durable per-recipient delivery state. `None` until the first pass
    /// tracks this issue and freezes its recipient set.
    pub status: Option<StatusMap>,
}

impl Issue {
    /// True if the issue should be picked up by a delivery pass.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.publish_on <= now && !self.delivered
    }
}
