//! File-backed store: the in-memory document persisted as versioned JSON.
//!
//! The whole record set lives in one document at a well-known path,
//! written atomically (temp file + rename + fsync on file and directory)
//! after every mutation. The document carries a `schema_version` field for
//! forward-compatible migrations; the delivery checkpoint deliberately does
//! not (its shape is frozen for compatibility), so versioning lives here.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{
    AccountStore, IssueStore, MemoryStore, NewSubscription, Result, StoreError, SubscriptionStore,
};
use crate::persist::fsync::{fsync_dir, fsync_file};
use crate::types::{
    Account, Issue, IssueId, Newsletter, NewsletterId, StatusMap, Subscription, SubscriptionId,
    UserId,
};

/// Current document schema version. Increment on breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    schema_version: u32,
    records: MemoryStore,
}

/// A [`MemoryStore`] persisted to disk after every mutation.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    records: MemoryStore,
}

impl JsonStore {
    /// Opens the store, loading the document if it exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match std::fs::read(&path) {
            Ok(bytes) => {
                let document: Document = serde_json::from_slice(&bytes)?;
                if document.schema_version != SCHEMA_VERSION {
                    return Err(StoreError::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        got: document.schema_version,
                    });
                }
                document.records
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => MemoryStore::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(JsonStore { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read-only view of the underlying records.
    pub fn records(&self) -> &MemoryStore {
        &self.records
    }

    /// Mutates the records through `f` and persists the result.
    ///
    /// The mutation is applied to a scratch copy first so a failed persist
    /// leaves the in-memory view matching the on-disk document.
    pub fn mutate<T>(&mut self, f: impl FnOnce(&mut MemoryStore) -> Result<T>) -> Result<T> {
        let mut scratch = self.records.clone();
        let value = f(&mut scratch)?;
        self.persist(&scratch)?;
        self.records = scratch;
        Ok(value)
    }

    fn persist(&self, records: &MemoryStore) -> Result<()> {
        use std::fs::OpenOptions;
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let document = Document {
            schema_version: SCHEMA_VERSION,
            records: records.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            fsync_file(&file)?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }

        Ok(())
    }
}

impl IssueStore for JsonStore {
    fn newsletters(&self) -> Result<Vec<Newsletter>> {
        self.records.newsletters()
    }

    fn newsletter(&self, id: NewsletterId) -> Result<Option<Newsletter>> {
        self.records.newsletter(id)
    }

    fn issues(&self) -> Result<Vec<Issue>> {
        self.records.issues()
    }

    fn write_issue_status(
        &mut self,
        issue: IssueId,
        statuses: &StatusMap,
        delivered: bool,
    ) -> Result<()> {
        self.mutate(|records| records.write_issue_status(issue, statuses, delivered))
    }
}

impl SubscriptionStore for JsonStore {
    fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        self.records.subscription(id)
    }

    fn subscription_for(
        &self,
        user: UserId,
        newsletter: NewsletterId,
    ) -> Result<Option<Subscription>> {
        self.records.subscription_for(user, newsletter)
    }

    fn subscriptions_for_newsletter(&self, newsletter: NewsletterId) -> Result<Vec<Subscription>> {
        self.records.subscriptions_for_newsletter(newsletter)
    }

    fn subscriptions_for_user(&self, user: UserId) -> Result<Vec<Subscription>> {
        self.records.subscriptions_for_user(user)
    }

    fn insert_subscription(&mut self, row: NewSubscription) -> Result<SubscriptionId> {
        self.mutate(|records| records.insert_subscription(row))
    }

    fn update_subscription(&mut self, row: &Subscription) -> Result<()> {
        self.mutate(|records| records.update_subscription(row))
    }

    fn delete_subscription(&mut self, id: SubscriptionId) -> Result<()> {
        self.mutate(|records| records.delete_subscription(id))
    }

    fn delete_subscriptions_for_user(&mut self, user: UserId) -> Result<usize> {
        self.mutate(|records| records.delete_subscriptions_for_user(user))
    }
}

impl AccountStore for JsonStore {
    fn account(&self, id: UserId) -> Result<Option<Account>> {
        self.records.account(id)
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        self.records.accounts()
    }

    fn delete_account(&mut self, id: UserId) -> Result<()> {
        self.mutate(|records| records.delete_account(id))
    }
}
