//! Shared test fixtures: mock collaborators and store builders.

use std::cell::RefCell;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::mail::{Attachment, AttachmentSource, Clock, IssueRenderer, MailTransport, OutgoingEmail, RenderedIssue};
use crate::store::MemoryStore;
use crate::types::{
    Account, Issue, IssueId, Newsletter, NewsletterId, SubscriptionMode, UserId,
};

/// A clock pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Renders the issue's HTML content as both bodies, unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRenderer;

impl IssueRenderer for PassthroughRenderer {
    fn render(&self, issue: &Issue) -> RenderedIssue {
        RenderedIssue {
            plaintext: issue.html_content.clone(),
            html: issue.html_content.clone(),
        }
    }
}

/// One send captured by the recording transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub user_id: UserId,
    pub email: String,
    pub subject: String,
    pub plaintext: String,
    pub html: String,
    pub attachment_names: Vec<String>,
}

/// Records every send and fails the ones it was told to.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: RefCell<Vec<SentMail>>,
    failing: RefCell<HashSet<UserId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        RecordingTransport::default()
    }

    /// Makes every send to this user report failure.
    pub fn fail_user(&self, user: UserId) {
        self.failing.borrow_mut().insert(user);
    }

    /// Lets sends to this user succeed again.
    pub fn heal_user(&self, user: UserId) {
        self.failing.borrow_mut().remove(&user);
    }

    /// Everything sent, in send order.
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.borrow().clone()
    }

    /// User ids in send order.
    pub fn sent_user_ids(&self) -> Vec<UserId> {
        self.sent.borrow().iter().map(|mail| mail.user_id).collect()
    }
}

impl MailTransport for RecordingTransport {
    fn send(&self, email: &OutgoingEmail<'_>) -> bool {
        self.sent.borrow_mut().push(SentMail {
            user_id: email.recipient.user_id,
            email: email.recipient.email.clone(),
            subject: email.subject.to_string(),
            plaintext: email.plaintext.to_string(),
            html: email.html.to_string(),
            attachment_names: email
                .attachments
                .iter()
                .map(|a| a.filename.clone())
                .collect(),
        });
        !self.failing.borrow().contains(&email.recipient.user_id)
    }
}

/// Serves a fixed attachment list for one issue.
#[derive(Debug, Clone, Default)]
pub struct StaticAttachments {
    pub issue: Option<IssueId>,
    pub attachments: Vec<Attachment>,
}

impl AttachmentSource for StaticAttachments {
    fn attachments(&self, issue: IssueId) -> Vec<Attachment> {
        if self.issue == Some(issue) {
            self.attachments.clone()
        } else {
            Vec::new()
        }
    }
}

pub fn newsletter(id: u64, mode: SubscriptionMode) -> Newsletter {
    Newsletter {
        id: NewsletterId(id),
        name: format!("Newsletter {}", id),
        subscription_mode: mode,
    }
}

pub fn issue(id: u64, newsletter: u64, publish_on: DateTime<Utc>) -> Issue {
    Issue {
        id: IssueId(id),
        newsletter_id: NewsletterId(newsletter),
        title: format!("Issue {}", id),
        html_content: format!("<p>Contents of issue {}</p>", id),
        stylesheet_id: 0,
        publish_on,
        delivered: false,
        status: None,
    }
}

pub fn account(id: u64) -> Account {
    Account {
        id: UserId(id),
        email: format!("user{}@example.org", id),
        display_name: format!("User {}", id),
        confirmed: true,
        deleted: false,
        created: Utc::now(),
    }
}

/// A store holding one opt-in newsletter, one due issue, and the given
/// users subscribed with `Ok` health.
pub fn store_with_subscribers(issue_publish: DateTime<Utc>, users: &[u64]) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert_newsletter(newsletter(1, SubscriptionMode::OptIn));
    store.insert_issue(issue(1, 1, issue_publish));
    for &user in users {
        store.insert_account(account(user));
        crate::registry::subscribe(
            &mut store,
            UserId(user),
            NewsletterId(1),
            UserId(user),
            issue_publish,
        )
        .unwrap();
    }
    store
}
