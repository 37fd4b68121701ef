//! Subscriptions, their health state, and the account records they join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{NewsletterId, SubscriptionId, UserId};

/// Eligibility state of one subscription.
///
/// Wire codes are preserved from the original schema; note the gap at 3
/// (`Unsubscribed` is 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SubscriptionHealth {
    /// Healthy subscriber, receives mail.
    Ok,

    /// Flagged by external bounce handling but still receives mail.
    Problematic,

    /// Blocked by an administrator; receives no mail.
    Blacklisted,

    /// Opted out; receives no mail. Re-enterable via subscribe.
    Unsubscribed,
}

impl SubscriptionHealth {
    /// True iff a subscription in this state should receive mail.
    pub fn is_eligible(&self) -> bool {
        matches!(self, SubscriptionHealth::Ok | SubscriptionHealth::Problematic)
    }
}

impl From<SubscriptionHealth> for u8 {
    fn from(health: SubscriptionHealth) -> u8 {
        match health {
            SubscriptionHealth::Ok => 0,
            SubscriptionHealth::Problematic => 1,
            SubscriptionHealth::Blacklisted => 2,
            SubscriptionHealth::Unsubscribed => 4,
        }
    }
}

impl TryFrom<u8> for SubscriptionHealth {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SubscriptionHealth::Ok),
            1 => Ok(SubscriptionHealth::Problematic),
            2 => Ok(SubscriptionHealth::Blacklisted),
            4 => Ok(SubscriptionHealth::Unsubscribed),
            other => Err(format!("unknown subscription health code: {}", other)),
        }
    }
}

/// Relates one user to one newsletter.
///
/// INVARIANT: exactly one row exists per (user, newsletter) pair; the store
/// enforces this before insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub newsletter_id: NewsletterId,
    pub health: SubscriptionHealth,

    pub time_subscribed: DateTime<Utc>,

    /// Updated on every health change.
    pub time_health_changed: DateTime<Utc>,

    /// The actor who created (or reactivated) the subscription.
    pub subscribed_by: UserId,

    /// The actor who last moved the subscription to `Unsubscribed`, if any.
    pub unsubscribed_by: Option<UserId>,
}

impl Subscription {
    pub fn is_eligible(&self) -> bool {
        self.health.is_eligible()
    }
}

/// A user account as seen by the delivery subsystem.
///
/// Recipient resolution joins subscriptions against accounts that are
/// confirmed (email verified) and not soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub email: String,
    pub display_name: String,

    /// False while the address is pending email verification.
    pub confirmed: bool,

    /// Soft-deletion flag; deleted accounts never receive mail.
    pub deleted: bool,

    pub created: DateTime<Utc>,
}

impl Account {
    /// True if the account may appear in a recipient set.
    pub fn is_mailable(&self) -> bool {
        self.confirmed && !self.deleted
    }
}

/// One resolved recipient of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
}
