//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! UserId where an IssueId is expected) and make signatures self-documenting.
//! All of them serialize transparently as their underlying integer, which is
//! what the durable checkpoint and store formats expect.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a newsletter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NewsletterId(pub u64);

impl fmt::Display for NewsletterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "newsletter {}", self.0)
    }
}

impl From<u64> for NewsletterId {
    fn from(n: u64) -> Self {
        NewsletterId(n)
    }
}

/// Identifier of a single issue within a newsletter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub u64);

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "issue {}", self.0)
    }
}

impl From<u64> for IssueId {
    fn from(n: u64) -> Self {
        IssueId(n)
    }
}

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user {}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(n: u64) -> Self {
        UserId(n)
    }
}

/// Identifier of a subscription row (one per (user, newsletter) pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription {}", self.0)
    }
}

impl From<u64> for SubscriptionId {
    fn from(n: u64) -> Self {
        SubscriptionId(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn issue_id_serde_roundtrip(n: u64) {
            let id = IssueId(n);
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(&json, &n.to_string());
            let parsed: IssueId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn user_id_serde_roundtrip(n: u64) {
            let id = UserId(n);
            let json = serde_json::to_string(&id).unwrap();
            let parsed: UserId = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(id, parsed);
        }

        #[test]
        fn ordering_matches_underlying(a: u64, b: u64) {
            prop_assert_eq!(UserId(a) < UserId(b), a < b);
            prop_assert_eq!(IssueId(a) < IssueId(b), a < b);
        }
    }

    #[test]
    fn display_includes_kind() {
        assert_eq!(format!("{}", NewsletterId(3)), "newsletter 3");
        assert_eq!(format!("{}", SubscriptionId(9)), "subscription 9");
    }
}
