//! Recipient resolution: who is currently eligible to receive a
//! newsletter's mail.
//!
//! The join is: subscriptions with health `Ok` or `Problematic`, against
//! accounts that are confirmed and not soft-deleted. The result is sorted
//! by user id so the delivery loop visits recipients in a stable order.
//!
//! Resolution runs fresh on every pass: subscription health changes
//! between runs must be observed. The checkpoint tracks delivery progress,
//! not the recipient set; freezing the set per issue is the delivery
//! loop's job, not the resolver's.

use crate::store::{AccountStore, Result, SubscriptionStore};
use crate::types::{NewsletterId, Recipient, UserId};

/// Computes the set of recipients currently eligible for a newsletter.
pub fn resolve<S: SubscriptionStore + AccountStore>(
    store: &S,
    newsletter: NewsletterId,
) -> Result<Vec<Recipient>> {
    let mut recipients = Vec::new();

    for subscription in store.subscriptions_for_newsletter(newsletter)? {
        if !subscription.is_eligible() {
            continue;
        }
        let Some(account) = store.account(subscription.user_id)? else {
            continue;
        };
        if !account.is_mailable() {
            continue;
        }
        recipients.push(Recipient {
            user_id: account.id,
            email: account.email,
            display_name: account.display_name,
        });
    }

    recipients.sort_by_key(|recipient| recipient.user_id);
    Ok(recipients)
}

/// Re-checks a single tracked recipient's eligibility at send time,
/// returning their mailable identity if they still qualify.
///
/// A recipient frozen into an issue's status map may unsubscribe (or be
/// blacklisted, or lose their account) before their turn comes; they are
/// then skipped without being removed from the tracked map.
pub fn eligible_recipient<S: SubscriptionStore + AccountStore>(
    store: &S,
    user: UserId,
    newsletter: NewsletterId,
) -> Result<Option<Recipient>> {
    let Some(subscription) = store.subscription_for(user, newsletter)? else {
        return Ok(None);
    };
    if !subscription.is_eligible() {
        return Ok(None);
    }
    let Some(account) = store.account(user)? else {
        return Ok(None);
    };
    if !account.is_mailable() {
        return Ok(None);
    }
    Ok(Some(Recipient {
        user_id: account.id,
        email: account.email,
        display_name: account.display_name,
    }))
}
