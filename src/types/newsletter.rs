//! Newsletters and their subscription modes.

use serde::{Deserialize, Serialize};

use super::ids::NewsletterId;

/// How users come to be subscribed to a newsletter.
///
/// Wire codes (0/1/2/3) are preserved from the original schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SubscriptionMode {
    /// Users subscribe themselves.
    OptIn,

    /// Users are subscribed on enrollment and may unsubscribe.
    OptOut,

    /// Users are subscribed on enrollment and cannot unsubscribe;
    /// no unsubscribe footer is attached to outgoing mail.
    Forced,

    /// No subscription management at all.
    None,
}

impl SubscriptionMode {
    /// True if enrollment should create a subscription automatically.
    pub fn subscribes_on_enrollment(&self) -> bool {
        matches!(self, SubscriptionMode::OptOut | SubscriptionMode::Forced)
    }

    /// True if outgoing mail should carry an unsubscribe footer.
    pub fn allows_unsubscribe(&self) -> bool {
        !matches!(self, SubscriptionMode::Forced)
    }
}

impl From<SubscriptionMode> for u8 {
    fn from(mode: SubscriptionMode) -> u8 {
        match mode {
            SubscriptionMode::OptIn => 0,
            SubscriptionMode::OptOut => 1,
            SubscriptionMode::Forced => 2,
            SubscriptionMode::None => 3,
        }
    }
}

impl TryFrom<u8> for SubscriptionMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SubscriptionMode::OptIn),
            1 => Ok(SubscriptionMode::OptOut),
            2 => Ok(SubscriptionMode::Forced),
            3 => Ok(SubscriptionMode::None),
            other => Err(format!("unknown subscription mode code: {}", other)),
        }
    }
}

/// A container of issues and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Newsletter {
    pub id: NewsletterId,

    /// Display name, used as the mail sender name.
    pub name: String,

    pub subscription_mode: SubscriptionMode,
}
