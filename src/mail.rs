//! Trait seams for the external collaborators of a delivery pass.
//!
//! Rendering, attachment storage, the mail transport itself, and the clock
//! are all provided by the surrounding system. The delivery engine only
//! depends on these traits, which keeps the pass testable with mock
//! implementations and keeps templating/SMTP concerns out of this crate.

use chrono::{DateTime, Utc};

use crate::types::{Issue, IssueId, Recipient};

/// Placeholder substituted with the recipient's user id in unsubscribe
/// links. Rendering happens once per issue; the substitution happens once
/// per recipient, immediately before the send.
pub const RECIPIENT_TOKEN: &str = "{{recipient}}";

/// An issue rendered to its two mail bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedIssue {
    pub plaintext: String,
    pub html: String,
}

impl RenderedIssue {
    /// Substitutes the recipient token in both bodies.
    pub fn for_recipient(&self, recipient: &Recipient) -> RenderedIssue {
        let id = recipient.user_id.0.to_string();
        RenderedIssue {
            plaintext: self.plaintext.replace(RECIPIENT_TOKEN, &id),
            html: self.html.replace(RECIPIENT_TOKEN, &id),
        }
    }
}

/// One attachment resolved for an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A fully composed outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingEmail<'a> {
    pub recipient: &'a Recipient,

    /// Sender display name (the newsletter's name).
    pub sender_name: &'a str,

    /// The issue title.
    pub subject: &'a str,

    pub plaintext: &'a str,
    pub html: &'a str,
    pub attachments: &'a [Attachment],
}

/// Renders an issue's HTML content into mail bodies.
///
/// Implementations own templating and CSS inlining. Rendering is a pure
/// function of the issue content and its selected stylesheet.
pub trait IssueRenderer {
    fn render(&self, issue: &Issue) -> RenderedIssue;
}

/// Delivers one composed message.
///
/// Returns `true` on success. "Recipient has no valid address" and
/// "recipient is suspended" are clean `false`s, never errors: the engine
/// records them as failed sends and retries on a later pass.
pub trait MailTransport {
    fn send(&self, email: &OutgoingEmail<'_>) -> bool;
}

/// Resolves an issue's attachments, once per issue before the recipient
/// loop.
pub trait AttachmentSource {
    fn attachments(&self, issue: IssueId) -> Vec<Attachment>;
}

/// Source of the current time, injected so due-issue cutoffs are testable.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// An attachment source for issues that never carry attachments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAttachments;

impl AttachmentSource for NoAttachments {
    fn attachments(&self, _issue: IssueId) -> Vec<Attachment> {
        Vec::new()
    }
}
