//! In-memory store, the substrate of every engine test and of the
//! file-backed [`JsonStore`](super::json::JsonStore).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AccountStore, IssueStore, NewSubscription, Result, StoreError, SubscriptionStore};
use crate::types::{
    Account, Issue, IssueId, Newsletter, NewsletterId, StatusMap, Subscription, SubscriptionId,
    UserId,
};

/// All records held in ordered maps. Serializable as a whole so the
/// file-backed store can persist it as one document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    pub newsletters: BTreeMap<NewsletterId, Newsletter>,
    pub issues: BTreeMap<IssueId, Issue>,
    pub subscriptions: BTreeMap<SubscriptionId, Subscription>,
    pub accounts: BTreeMap<UserId, Account>,

    /// Next subscription id to assign.
    next_subscription_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn insert_newsletter(&mut self, newsletter: Newsletter) {
        self.newsletters.insert(newsletter.id, newsletter);
    }

    pub fn insert_issue(&mut self, issue: Issue) {
        self.issues.insert(issue.id, issue);
    }

    pub fn insert_account(&mut self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn issue(&self, id: IssueId) -> Option<&Issue> {
        self.issues.get(&id)
    }
}

impl IssueStore for MemoryStore {
    fn newsletters(&self) -> Result<Vec<Newsletter>> {
        Ok(self.newsletters.values().cloned().collect())
    }

    fn newsletter(&self, id: NewsletterId) -> Result<Option<Newsletter>> {
        Ok(self.newsletters.get(&id).cloned())
    }

    fn issues(&self) -> Result<Vec<Issue>> {
        Ok(self.issues.values().cloned().collect())
    }

    fn write_issue_status(
        &mut self,
        issue: IssueId,
        statuses: &StatusMap,
        delivered: bool,
    ) -> Result<()> {
        let record = self
            .issues
            .get_mut(&issue)
            .ok_or(StoreError::MissingIssue(issue))?;
        record.status = Some(statuses.clone());
        record.delivered = delivered;
        Ok(())
    }
}

impl SubscriptionStore for MemoryStore {
    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(&id).cloned())
    }

    fn subscription_for(
        &self,
        user: UserId,
        newsletter: NewsletterId,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions
            .values()
            .find(|sub| sub.user_id == user && sub.newsletter_id == newsletter)
            .cloned())
    }

    fn subscriptions_for_newsletter(&self, newsletter: NewsletterId) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .values()
            .filter(|sub| sub.newsletter_id == newsletter)
            .cloned()
            .collect())
    }

    fn subscriptions_for_user(&self, user: UserId) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .values()
            .filter(|sub| sub.user_id == user)
            .cloned()
            .collect())
    }

    fn insert_subscription(&mut self, row: NewSubscription) -> Result<SubscriptionId> {
        if self
            .subscription_for(row.user_id, row.newsletter_id)?
            .is_some()
        {
            return Err(StoreError::DuplicateSubscription {
                user: row.user_id,
                newsletter: row.newsletter_id,
            });
        }

        self.next_subscription_id += 1;
        let id = SubscriptionId(self.next_subscription_id);
        self.subscriptions.insert(
            id,
            Subscription {
                id,
                user_id: row.user_id,
                newsletter_id: row.newsletter_id,
                health: row.health,
                time_subscribed: row.time_subscribed,
                time_health_changed: row.time_subscribed,
                subscribed_by: row.subscribed_by,
                unsubscribed_by: None,
            },
        );
        Ok(id)
    }

    fn update_subscription(&mut self, row: &Subscription) -> Result<()> {
        let existing = self
            .subscriptions
            .get_mut(&row.id)
            .ok_or(StoreError::MissingSubscription(row.id))?;
        *existing = row.clone();
        Ok(())
    }

    fn delete_subscription(&mut self, id: SubscriptionId) -> Result<()> {
        self.subscriptions
            .remove(&id)
            .ok_or(StoreError::MissingSubscription(id))?;
        Ok(())
    }

    fn delete_subscriptions_for_user(&mut self, user: UserId) -> Result<usize> {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, sub| sub.user_id != user);
        Ok(before - self.subscriptions.len())
    }
}

impl AccountStore for MemoryStore {
    fn account(&self, id: UserId) -> Result<Option<Account>> {
        Ok(self.accounts.get(&id).cloned())
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.values().cloned().collect())
    }

    fn delete_account(&mut self, id: UserId) -> Result<()> {
        self.accounts.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubscriptionHealth;
    use chrono::Utc;

    fn new_row(user: u64, newsletter: u64) -> NewSubscription {
        NewSubscription {
            user_id: UserId(user),
            newsletter_id: NewsletterId(newsletter),
            health: SubscriptionHealth::Ok,
            time_subscribed: Utc::now(),
            subscribed_by: UserId(user),
        }
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut store = MemoryStore::new();
        let a = store.insert_subscription(new_row(1, 1)).unwrap();
        let b = store.insert_subscription(new_row(2, 1)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let mut store = MemoryStore::new();
        store.insert_subscription(new_row(1, 1)).unwrap();

        let result = store.insert_subscription(new_row(1, 1));
        assert!(matches!(
            result,
            Err(StoreError::DuplicateSubscription { .. })
        ));

        // Same user, different newsletter is fine.
        store.insert_subscription(new_row(1, 2)).unwrap();
    }

    #[test]
    fn delete_for_user_removes_all_rows() {
        let mut store = MemoryStore::new();
        store.insert_subscription(new_row(1, 1)).unwrap();
        store.insert_subscription(new_row(1, 2)).unwrap();
        store.insert_subscription(new_row(2, 1)).unwrap();

        let removed = store.delete_subscriptions_for_user(UserId(1)).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.subscriptions.len(), 1);
    }

    #[test]
    fn write_issue_status_requires_existing_issue() {
        let mut store = MemoryStore::new();
        let result = store.write_issue_status(IssueId(1), &StatusMap::default(), false);
        assert!(matches!(result, Err(StoreError::MissingIssue(_))));
    }
}
