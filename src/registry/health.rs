//! Pure transition logic for the subscription health state machine.
//!
//! States: `Ok`, `Problematic`, `Blacklisted`, `Unsubscribed`.
//!
//! - `subscribe` on an `Unsubscribed` row reactivates it; on any other
//!   existing row it is an intentional no-op (idempotency for already
//!   active subscribers), never an error.
//! - `unsubscribe` is unconditional, including from `Blacklisted`.
//! - Administrative overrides may set any state directly.

use crate::types::SubscriptionHealth;

/// What a subscribe call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeTransition {
    /// The row was `Unsubscribed` and returns to `Ok`.
    Reactivate,

    /// The row is in an active state; nothing changes.
    NoChange,
}

/// Computes the effect of a subscribe call on an existing row.
pub fn on_subscribe(current: SubscriptionHealth) -> SubscribeTransition {
    match current {
        SubscriptionHealth::Unsubscribed => SubscribeTransition::Reactivate,
        SubscriptionHealth::Ok
        | SubscriptionHealth::Problematic
        | SubscriptionHealth::Blacklisted => SubscribeTransition::NoChange,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_reactivates_only_unsubscribed() {
        assert_eq!(
            on_subscribe(SubscriptionHealth::Unsubscribed),
            SubscribeTransition::Reactivate
        );
        for health in [
            SubscriptionHealth::Ok,
            SubscriptionHealth::Problematic,
            SubscriptionHealth::Blacklisted,
        ] {
            assert_eq!(on_subscribe(health), SubscribeTransition::NoChange);
        }
    }
}
