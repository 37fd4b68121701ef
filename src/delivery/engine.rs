//! The delivery pass: one linear, lock-protected sweep over all due
//! issues.
//!
//! # Algorithm
//!
//! 1. Acquire the lock; if busy, exit cleanly (another pass is running).
//! 2. Load the checkpoint. Absent: this is a fresh pass, so enumerate due
//!    issues, freeze each one's recipient set, and persist the initial
//!    checkpoint before any send. Present: this is a resumed pass, so
//!    trust it as-is and never re-resolve recipients for tracked issues.
//! 3. Per issue: resolve attachments and render once; send to every
//!    tracked recipient whose status is not `Delivered`, saving the
//!    checkpoint after every attempt.
//! 4. Commit each issue's final status map and `delivered` flag.
//! 5. Delete the checkpoint.
//! 6. Release the lock, on failure paths too.
//!
//! # Delivery guarantee
//!
//! At-least-once, not exactly-once: the checkpoint is saved *after* the
//! transport reports, so a crash between "transport succeeded" and
//! "checkpoint written" re-sends that one recipient on resume. This is a
//! property of the design; fixing it would require a transport with
//! idempotent sends.

use thiserror::Error;

use super::run::DeliveryRun;
use crate::lock::{LockError, LockManager};
use crate::mail::{
    AttachmentSource, Clock, IssueRenderer, MailTransport, OutgoingEmail, RECIPIENT_TOKEN,
    RenderedIssue,
};
use crate::persist::{CheckpointError, CheckpointStore};
use crate::resolver;
use crate::store::{AccountStore, IssueStore, StoreError, SubscriptionStore};
use crate::types::{DeliveryStatus, Issue, Newsletter, StatusMap};

/// Errors fatal to a delivery pass.
///
/// Lock contention is not among them: a busy lock yields
/// [`PassOutcome::AlreadyRunning`]. Whatever the error, the checkpoint is
/// left as last written so the next invocation resumes instead of
/// restarting.
#[derive(Debug, Error)]
pub enum PassError {
    /// Lock marker IO failed (not contention).
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Checkpoint could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Durable storage failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for delivery pass operations.
pub type Result<T> = std::result::Result<T, PassError>;

/// What one invocation of the delivery loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass holds the lock; nothing was mutated.
    AlreadyRunning,

    /// The pass ran to completion.
    Completed(PassReport),
}

/// Pass-level counters. Callers see only these; per-recipient outcomes
/// are visible through the durable issue status, not the return value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Whether the pass resumed an interrupted predecessor.
    pub resumed: bool,

    /// Issues tracked by this pass.
    pub issues_tracked: usize,

    /// Issues whose every recipient reached `Delivered`.
    pub issues_completed: usize,

    /// Send attempts handed to the transport.
    pub sends_attempted: usize,

    /// Attempts the transport reported as failed.
    pub sends_failed: usize,

    /// Tracked recipients skipped because they were no longer eligible
    /// when their turn came.
    pub recipients_skipped: usize,
}

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Unsubscribe URL template appended as a footer to issues of
    /// newsletters that allow unsubscribing. Must contain
    /// [`RECIPIENT_TOKEN`], which is substituted per recipient. `None`
    /// disables the footer.
    pub unsubscribe_url: Option<String>,
}

/// One due issue bound to its newsletter, in delivery order.
struct PlannedIssue {
    issue: Issue,
    newsletter: Newsletter,
}

/// The delivery loop over injected dependencies.
///
/// The lock manager and checkpoint store are explicit collaborators, not
/// ambient singletons, so the loop is testable without touching the real
/// subsystem paths.
pub struct Engine<'a, S, R, T, A, C> {
    store: &'a mut S,
    renderer: &'a R,
    transport: &'a T,
    attachments: &'a A,
    clock: &'a C,
    lock: &'a LockManager,
    checkpoint: &'a CheckpointStore,
    config: EngineConfig,
}

impl<'a, S, R, T, A, C> Engine<'a, S, R, T, A, C>
where
    S: IssueStore + SubscriptionStore + AccountStore,
    R: IssueRenderer,
    T: MailTransport,
    A: AttachmentSource,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &'a mut S,
        renderer: &'a R,
        transport: &'a T,
        attachments: &'a A,
        clock: &'a C,
        lock: &'a LockManager,
        checkpoint: &'a CheckpointStore,
        config: EngineConfig,
    ) -> Self {
        Engine {
            store,
            renderer,
            transport,
            attachments,
            clock,
            lock,
            checkpoint,
            config,
        }
    }

    /// Runs one delivery pass.
    ///
    /// Delivery is at-least-once (see the module docs). A send failure for
    /// one recipient never aborts the pass; fatal storage errors do, with
    /// the checkpoint preserved for resume.
    pub fn run_pass(&mut self) -> Result<PassOutcome> {
        let handle = match self.lock.acquire() {
            Ok(handle) => handle,
            Err(LockError::Busy) => {
                tracing::debug!("delivery lock busy, skipping pass");
                return Ok(PassOutcome::AlreadyRunning);
            }
            Err(e) => return Err(e.into()),
        };

        let result = self.locked_pass();

        // Released on success and failure alike; the drop guard would
        // catch a panic, but an explicit release surfaces IO errors.
        if let Err(e) = self.lock.release(handle) {
            tracing::warn!(error = %e, "failed to release delivery lock after pass");
        }

        result
    }

    fn locked_pass(&mut self) -> Result<PassOutcome> {
        let now = self.clock.now();
        let mut report = PassReport::default();

        // Recover or initialize the run.
        let mut run = match self.checkpoint.load()? {
            Some(snapshot) => {
                tracing::info!("checkpoint found, resuming interrupted pass");
                DeliveryRun::from_checkpoint(snapshot)
            }
            None => DeliveryRun::fresh(),
        };
        report.resumed = run.resumed();

        let plan = self.collect_due_issues(now, &mut run)?;
        report.issues_tracked = plan.len();

        if !run.resumed() {
            // Nothing has been sent yet; persist the frozen recipient sets
            // so an interruption from here on resumes rather than
            // re-resolves.
            self.checkpoint.save(run.snapshot())?;
        }

        for planned in &plan {
            self.deliver_issue(planned, &mut run, &mut report)?;
        }

        // Commit final per-issue status durably, then (and only then)
        // drop the checkpoint.
        for planned in &plan {
            let issue_id = planned.issue.id;
            let Some(statuses) = run.statuses(issue_id) else {
                continue;
            };
            let complete = statuses.is_complete();
            self.store.write_issue_status(issue_id, statuses, complete)?;
            if complete {
                report.issues_completed += 1;
            }
        }

        self.checkpoint.clear()?;

        tracing::info!(
            issues = report.issues_tracked,
            completed = report.issues_completed,
            attempted = report.sends_attempted,
            failed = report.sends_failed,
            skipped = report.recipients_skipped,
            "delivery pass finished"
        );
        Ok(PassOutcome::Completed(report))
    }

    /// Enumerates due issues in delivery order (publish time ascending,
    /// ties by id) and freezes recipient sets for newly tracked ones.
    ///
    /// On a resumed run the checkpoint's recipient sets are authoritative;
    /// due issues are enumerated only to rebind issue metadata, and a
    /// tracked issue that has vanished from the store is dropped with a
    /// warning.
    fn collect_due_issues(
        &mut self,
        now: chrono::DateTime<chrono::Utc>,
        run: &mut DeliveryRun,
    ) -> Result<Vec<PlannedIssue>> {
        let mut due: Vec<Issue> = self
            .store
            .issues()?
            .into_iter()
            .filter(|issue| issue.is_due(now))
            .collect();
        due.sort_by_key(|issue| (issue.publish_on, issue.id));

        let mut plan = Vec::new();
        for issue in due {
            let Some(newsletter) = self.store.newsletter(issue.newsletter_id)? else {
                // Integrity failure: surface to the operator and move on.
                tracing::warn!(
                    issue = %issue.id,
                    newsletter = %issue.newsletter_id,
                    "issue references a missing newsletter, skipping"
                );
                continue;
            };

            if run.resumed() {
                if !run.tracks(issue.id) {
                    // Became due after the interrupted pass froze its set;
                    // picked up by the next fresh pass.
                    continue;
                }
            } else {
                let statuses = match &issue.status {
                    // A durable map from an earlier incomplete pass keeps
                    // its frozen recipient set.
                    Some(statuses) => statuses.clone(),
                    None => {
                        let recipients = resolver::resolve(self.store, newsletter.id)?;
                        StatusMap::unknown_for(recipients.into_iter().map(|r| r.user_id))
                    }
                };
                // Mirror the freeze durably before any send happens.
                self.store.write_issue_status(issue.id, &statuses, false)?;
                run.track(issue.id, statuses);
            }

            plan.push(PlannedIssue { issue, newsletter });
        }

        if run.resumed() {
            for tracked in run.issues() {
                if !plan.iter().any(|planned| planned.issue.id == tracked) {
                    tracing::warn!(issue = %tracked, "tracked issue no longer exists, dropping");
                    run.untrack(tracked);
                }
            }
        }

        Ok(plan)
    }

    fn deliver_issue(
        &mut self,
        planned: &PlannedIssue,
        run: &mut DeliveryRun,
        report: &mut PassReport,
    ) -> Result<()> {
        let issue = &planned.issue;
        let newsletter = &planned.newsletter;

        let pending = run.pending(issue.id);
        if pending.is_empty() {
            return Ok(());
        }

        tracing::info!(
            issue = %issue.id,
            newsletter = %newsletter.id,
            title = %issue.title,
            pending = pending.len(),
            "delivering issue"
        );

        // Attachments and rendering are resolved once per issue; only the
        // recipient token differs between sends.
        let attachments = self.attachments.attachments(issue.id);
        let mut rendered = self.renderer.render(issue);
        if newsletter.subscription_mode.allows_unsubscribe() {
            if let Some(url) = &self.config.unsubscribe_url {
                rendered = with_unsubscribe_footer(rendered, url);
            }
        }

        for user in pending {
            let recipient = match resolver::eligible_recipient(self.store, user, newsletter.id)? {
                Some(recipient) => recipient,
                None => {
                    // Unsubscribed (or otherwise ineligible) after the
                    // freeze: skip the send, keep the tracked entry.
                    tracing::debug!(issue = %issue.id, user = %user, "recipient no longer eligible, skipping");
                    report.recipients_skipped += 1;
                    continue;
                }
            };

            let personalized = rendered.for_recipient(&recipient);
            let email = OutgoingEmail {
                recipient: &recipient,
                sender_name: &newsletter.name,
                subject: &issue.title,
                plaintext: &personalized.plaintext,
                html: &personalized.html,
                attachments: &attachments,
            };

            let delivered = self.transport.send(&email);
            report.sends_attempted += 1;

            let status = if delivered {
                DeliveryStatus::Delivered
            } else {
                report.sends_failed += 1;
                tracing::warn!(issue = %issue.id, user = %user, email = %recipient.email, "send failed");
                DeliveryStatus::Failed
            };
            run.record(issue.id, user, status);

            // Persisted per attempt: a crash loses at most the outcome of
            // the one send in flight.
            self.checkpoint.save(run.snapshot())?;
        }

        Ok(())
    }
}

/// Appends the unsubscribe footer (with the recipient placeholder still
/// unsubstituted) to both rendered bodies.
fn with_unsubscribe_footer(rendered: RenderedIssue, url: &str) -> RenderedIssue {
    debug_assert!(url.contains(RECIPIENT_TOKEN));
    RenderedIssue {
        plaintext: format!("{}\n\nUnsubscribe from this newsletter: {}", rendered.plaintext, url),
        html: format!(
            "{}<p><a href=\"{}\">Unsubscribe from this newsletter</a></p>",
            rendered.html, url
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_is_appended_to_both_bodies() {
        let rendered = RenderedIssue {
            plaintext: "body".into(),
            html: "<p>body</p>".into(),
        };
        let url = format!("https://lists.example.org/unsub?user={}", RECIPIENT_TOKEN);
        let with_footer = with_unsubscribe_footer(rendered, &url);

        assert!(with_footer.plaintext.starts_with("body\n\n"));
        assert!(with_footer.plaintext.contains(&url));
        assert!(with_footer.html.starts_with("<p>body</p><p><a href="));
        assert!(with_footer.html.contains(&url));
    }
}
