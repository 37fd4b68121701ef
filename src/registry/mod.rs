//! The subscription registry: owns subscriber rows and their health state.
//!
//! All operations run against an injected [`SubscriptionStore`] (plus
//! [`AccountStore`]/[`IssueStore`] where needed), so registry behavior is
//! testable in isolation from the delivery loop.
//!
//! Beyond the core state machine this module carries the surrounding
//! system's lifecycle hooks: enrollment auto-subscribe for opt-out and
//! forced newsletters, row removal on account removal, bulk (cohort)
//! subscribe, and the sweep that expires accounts which never confirmed
//! their address.

use chrono::{DateTime, Duration, Utc};

use crate::store::{
    AccountStore, IssueStore, NewSubscription, Result, StoreError, SubscriptionStore,
};
use crate::types::{NewsletterId, SubscriptionHealth, SubscriptionId, UserId};

pub mod health;

pub use health::{SubscribeTransition, on_subscribe};

/// Outcome of a subscribe call.
///
/// `Unchanged` is a successful no-op, not an error: subscribing an already
/// active subscriber must be safe to repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// No row existed; one was created.
    Created(SubscriptionId),

    /// An `Unsubscribed` row was moved back to `Ok`.
    Reactivated(SubscriptionId),

    /// The row is already active; nothing was modified.
    Unchanged(SubscriptionId),
}

impl SubscribeOutcome {
    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            SubscribeOutcome::Created(id)
            | SubscribeOutcome::Reactivated(id)
            | SubscribeOutcome::Unchanged(id) => *id,
        }
    }
}

/// Subscribes a user to a newsletter with the default `Ok` health.
pub fn subscribe<S: SubscriptionStore>(
    store: &mut S,
    user: UserId,
    newsletter: NewsletterId,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<SubscribeOutcome> {
    subscribe_with_status(store, user, newsletter, actor, SubscriptionHealth::Ok, now)
}

/// Subscribes a user with an explicit initial health (used by guest signup,
/// which starts subscriptions out in a non-default state).
pub fn subscribe_with_status<S: SubscriptionStore>(
    store: &mut S,
    user: UserId,
    newsletter: NewsletterId,
    actor: UserId,
    status: SubscriptionHealth,
    now: DateTime<Utc>,
) -> Result<SubscribeOutcome> {
    if let Some(mut row) = store.subscription_for(user, newsletter)? {
        return match on_subscribe(row.health) {
            SubscribeTransition::Reactivate => {
                row.health = SubscriptionHealth::Ok;
                row.time_health_changed = now;
                row.subscribed_by = actor;
                store.update_subscription(&row)?;
                Ok(SubscribeOutcome::Reactivated(row.id))
            }
            SubscribeTransition::NoChange => Ok(SubscribeOutcome::Unchanged(row.id)),
        };
    }

    let id = store.insert_subscription(NewSubscription {
        user_id: user,
        newsletter_id: newsletter,
        health: status,
        time_subscribed: now,
        subscribed_by: actor,
    })?;
    Ok(SubscribeOutcome::Created(id))
}

/// Bulk (cohort) subscribe: creates rows for every user that lacks one.
///
/// Users that already hold a row in any state are left untouched, matching
/// the single-user idempotency rule. Returns the ids of the rows created.
pub fn subscribe_many<S: SubscriptionStore>(
    store: &mut S,
    users: &[UserId],
    newsletter: NewsletterId,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionId>> {
    let mut created = Vec::new();
    for &user in users {
        if store.subscription_for(user, newsletter)?.is_none() {
            let id = store.insert_subscription(NewSubscription {
                user_id: user,
                newsletter_id: newsletter,
                health: SubscriptionHealth::Ok,
                time_subscribed: now,
                subscribed_by: actor,
            })?;
            created.push(id);
        }
    }
    Ok(created)
}

/// Unconditionally moves a subscription to `Unsubscribed`.
///
/// Works from any state, including `Blacklisted`; the subscription is
/// re-enterable via [`subscribe`].
pub fn unsubscribe<S: SubscriptionStore>(
    store: &mut S,
    id: SubscriptionId,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut row = store
        .subscription(id)?
        .ok_or(StoreError::MissingSubscription(id))?;
    row.health = SubscriptionHealth::Unsubscribed;
    row.time_health_changed = now;
    row.unsubscribed_by = Some(actor);
    store.update_subscription(&row)
}

/// Administrative override to any health state.
///
/// Used by external bounce handling to mark rows `Problematic` or
/// `Blacklisted`.
pub fn set_health<S: SubscriptionStore>(
    store: &mut S,
    id: SubscriptionId,
    status: SubscriptionHealth,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut row = store
        .subscription(id)?
        .ok_or(StoreError::MissingSubscription(id))?;
    row.health = status;
    row.time_health_changed = now;
    if status == SubscriptionHealth::Unsubscribed {
        row.unsubscribed_by = Some(actor);
    }
    store.update_subscription(&row)
}

/// True if the user holds a row with health other than `Unsubscribed`.
pub fn is_subscribed<S: SubscriptionStore>(
    store: &S,
    user: UserId,
    newsletter: NewsletterId,
) -> Result<bool> {
    Ok(store
        .subscription_for(user, newsletter)?
        .is_some_and(|row| row.health != SubscriptionHealth::Unsubscribed))
}

/// Hard removal of one subscription row, health state included.
pub fn remove<S: SubscriptionStore>(store: &mut S, id: SubscriptionId) -> Result<()> {
    store.delete_subscription(id)
}

/// Hard removal of a user's row for one newsletter, if any.
pub fn remove_for_user<S: SubscriptionStore>(
    store: &mut S,
    user: UserId,
    newsletter: NewsletterId,
) -> Result<()> {
    if let Some(row) = store.subscription_for(user, newsletter)? {
        store.delete_subscription(row.id)?;
    }
    Ok(())
}

/// Enrollment hook: subscribes the user to every newsletter whose mode
/// auto-subscribes (`OptOut` or `Forced`) and where no row exists yet.
///
/// Returns the newly created subscription ids.
pub fn on_account_enrolled<S: SubscriptionStore + IssueStore>(
    store: &mut S,
    user: UserId,
    actor: UserId,
    now: DateTime<Utc>,
) -> Result<Vec<SubscriptionId>> {
    let mut created = Vec::new();
    for newsletter in store.newsletters()? {
        if newsletter.subscription_mode.subscribes_on_enrollment()
            && store.subscription_for(user, newsletter.id)?.is_none()
        {
            let id = store.insert_subscription(NewSubscription {
                user_id: user,
                newsletter_id: newsletter.id,
                health: SubscriptionHealth::Ok,
                time_subscribed: now,
                subscribed_by: actor,
            })?;
            created.push(id);
        }
    }
    Ok(created)
}

/// Removal hook: deletes all of a user's rows (last unenrolment or account
/// deletion). Returns how many rows were removed.
pub fn on_account_removed<S: SubscriptionStore>(store: &mut S, user: UserId) -> Result<usize> {
    store.delete_subscriptions_for_user(user)
}

/// Deletes accounts that never confirmed their address within the
/// activation window and hold at least one subscription, together with
/// their rows. Runs at the start of every delivery invocation, before the
/// lock is taken.
///
/// Returns the ids of the accounts removed.
pub fn prune_unconfirmed<S: SubscriptionStore + AccountStore>(
    store: &mut S,
    now: DateTime<Utc>,
    activation_timeout: Duration,
) -> Result<Vec<UserId>> {
    let mut removed = Vec::new();
    for account in store.accounts()? {
        if account.confirmed || now - account.created <= activation_timeout {
            continue;
        }
        if store.subscriptions_for_user(account.id)?.is_empty() {
            // Not ours to expire: the account never touched a newsletter.
            continue;
        }
        tracing::info!(user = %account.id, email = %account.email, "expiring unconfirmed account");
        store.delete_subscriptions_for_user(account.id)?;
        store.delete_account(account.id)?;
        removed.push(account.id);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Account, Newsletter, SubscriptionMode};

    const ADMIN: UserId = UserId(999);

    fn store_with_newsletter(mode: SubscriptionMode) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert_newsletter(Newsletter {
            id: NewsletterId(1),
            name: "Weekly".into(),
            subscription_mode: mode,
        });
        store
    }

    fn account(id: u64, confirmed: bool, created: DateTime<Utc>) -> Account {
        Account {
            id: UserId(id),
            email: format!("user{}@example.org", id),
            display_name: format!("User {}", id),
            confirmed,
            deleted: false,
            created,
        }
    }

    #[test]
    fn subscribe_creates_then_leaves_unchanged() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();

        let first = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now).unwrap();
        let id = match first {
            SubscribeOutcome::Created(id) => id,
            other => panic!("expected Created, got {:?}", other),
        };

        // Second call: no duplicate row, no state change.
        let second = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now).unwrap();
        assert_eq!(second, SubscribeOutcome::Unchanged(id));
        assert_eq!(store.subscriptions.len(), 1);
    }

    #[test]
    fn subscribe_reactivates_unsubscribed_row() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();

        let id = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now)
            .unwrap()
            .subscription_id();
        unsubscribe(&mut store, id, UserId(1), now).unwrap();

        let later = now + Duration::minutes(5);
        let outcome = subscribe(&mut store, UserId(1), NewsletterId(1), ADMIN, later).unwrap();
        assert_eq!(outcome, SubscribeOutcome::Reactivated(id));

        let row = store.subscription(id).unwrap().unwrap();
        assert_eq!(row.health, SubscriptionHealth::Ok);
        assert_eq!(row.time_health_changed, later);
        assert_eq!(row.subscribed_by, ADMIN);
    }

    #[test]
    fn unsubscribe_overrides_blacklisted() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();

        let id = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now)
            .unwrap()
            .subscription_id();
        set_health(&mut store, id, SubscriptionHealth::Blacklisted, ADMIN, now).unwrap();

        unsubscribe(&mut store, id, UserId(1), now).unwrap();
        let row = store.subscription(id).unwrap().unwrap();
        assert_eq!(row.health, SubscriptionHealth::Unsubscribed);
        assert_eq!(row.unsubscribed_by, Some(UserId(1)));
    }

    #[test]
    fn is_subscribed_excludes_unsubscribed_only() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();

        let id = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now)
            .unwrap()
            .subscription_id();
        assert!(is_subscribed(&store, UserId(1), NewsletterId(1)).unwrap());

        set_health(&mut store, id, SubscriptionHealth::Blacklisted, ADMIN, now).unwrap();
        assert!(is_subscribed(&store, UserId(1), NewsletterId(1)).unwrap());

        unsubscribe(&mut store, id, UserId(1), now).unwrap();
        assert!(!is_subscribed(&store, UserId(1), NewsletterId(1)).unwrap());
    }

    #[test]
    fn remove_deletes_the_row_outright() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();

        let id = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now)
            .unwrap()
            .subscription_id();
        remove(&mut store, id).unwrap();
        assert!(store.subscription(id).unwrap().is_none());

        // Unlike unsubscribe, a fresh subscribe now creates a new row.
        let outcome = subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now).unwrap();
        assert!(matches!(outcome, SubscribeOutcome::Created(_)));
    }

    #[test]
    fn remove_for_user_targets_one_newsletter() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        store.insert_newsletter(Newsletter {
            id: NewsletterId(2),
            name: "Second".into(),
            subscription_mode: SubscriptionMode::OptIn,
        });
        let now = Utc::now();

        subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now).unwrap();
        subscribe(&mut store, UserId(1), NewsletterId(2), UserId(1), now).unwrap();

        remove_for_user(&mut store, UserId(1), NewsletterId(1)).unwrap();
        assert!(
            store
                .subscription_for(UserId(1), NewsletterId(1))
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .subscription_for(UserId(1), NewsletterId(2))
                .unwrap()
                .is_some()
        );

        // Removing when no row exists is a no-op.
        remove_for_user(&mut store, UserId(1), NewsletterId(1)).unwrap();
    }

    #[test]
    fn subscribe_many_skips_existing_rows() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();

        let id = subscribe(&mut store, UserId(2), NewsletterId(1), UserId(2), now)
            .unwrap()
            .subscription_id();
        unsubscribe(&mut store, id, UserId(2), now).unwrap();

        let created = subscribe_many(
            &mut store,
            &[UserId(1), UserId(2), UserId(3)],
            NewsletterId(1),
            ADMIN,
            now,
        )
        .unwrap();

        // User 2 already holds a row (even though unsubscribed): skipped.
        assert_eq!(created.len(), 2);
        assert_eq!(
            store
                .subscription(id)
                .unwrap()
                .unwrap()
                .health,
            SubscriptionHealth::Unsubscribed
        );
    }

    #[test]
    fn enrollment_subscribes_forced_newsletters() {
        // Scenario: forced-mode newsletter, user enrolled after creation.
        let mut store = store_with_newsletter(SubscriptionMode::Forced);
        store.insert_newsletter(Newsletter {
            id: NewsletterId(2),
            name: "Opt-in letter".into(),
            subscription_mode: SubscriptionMode::OptIn,
        });
        let now = Utc::now();

        let created = on_account_enrolled(&mut store, UserId(3), ADMIN, now).unwrap();
        assert_eq!(created.len(), 1);

        let row = store
            .subscription_for(UserId(3), NewsletterId(1))
            .unwrap()
            .unwrap();
        assert_eq!(row.health, SubscriptionHealth::Ok);

        // The opt-in newsletter is untouched.
        assert!(
            store
                .subscription_for(UserId(3), NewsletterId(2))
                .unwrap()
                .is_none()
        );

        // Re-running the hook creates nothing new.
        let again = on_account_enrolled(&mut store, UserId(3), ADMIN, now).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn account_removal_deletes_all_rows() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        store.insert_newsletter(Newsletter {
            id: NewsletterId(2),
            name: "Second".into(),
            subscription_mode: SubscriptionMode::OptIn,
        });
        let now = Utc::now();

        subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now).unwrap();
        subscribe(&mut store, UserId(1), NewsletterId(2), UserId(1), now).unwrap();

        assert_eq!(on_account_removed(&mut store, UserId(1)).unwrap(), 2);
        assert!(store.subscriptions.is_empty());
    }

    #[test]
    fn prune_removes_expired_unconfirmed_subscribers() {
        let mut store = store_with_newsletter(SubscriptionMode::OptIn);
        let now = Utc::now();
        let timeout = Duration::days(7);

        // Expired, unconfirmed, subscribed: pruned.
        store.insert_account(account(1, false, now - Duration::days(10)));
        subscribe(&mut store, UserId(1), NewsletterId(1), UserId(1), now).unwrap();

        // Unconfirmed but still within the window: kept.
        store.insert_account(account(2, false, now - Duration::days(2)));
        subscribe(&mut store, UserId(2), NewsletterId(1), UserId(2), now).unwrap();

        // Confirmed long ago: kept.
        store.insert_account(account(3, true, now - Duration::days(100)));
        subscribe(&mut store, UserId(3), NewsletterId(1), UserId(3), now).unwrap();

        // Expired and unconfirmed but never subscribed: not ours, kept.
        store.insert_account(account(4, false, now - Duration::days(10)));

        let removed = prune_unconfirmed(&mut store, now, timeout).unwrap();
        assert_eq!(removed, vec![UserId(1)]);
        assert!(store.account(UserId(1)).unwrap().is_none());
        assert!(store.account(UserId(2)).unwrap().is_some());
        assert!(store.account(UserId(4)).unwrap().is_some());
        assert!(
            store
                .subscription_for(UserId(1), NewsletterId(1))
                .unwrap()
                .is_none()
        );
    }
}
