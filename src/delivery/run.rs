//! The in-flight state of one delivery pass.
//!
//! [`DeliveryRun`] is the explicit value object threaded through the pass:
//! the tracked issue set with its per-recipient statuses, plus whether the
//! pass resumed an interrupted predecessor. It is serialized only at the
//! designated persistence point (the checkpoint), never carried in ambient
//! state.
//!
//! INVARIANT: an issue's recipient set is frozen when it is first tracked
//! and never re-resolved afterwards. Recovery trusts the checkpoint, not a
//! fresh resolution.

use crate::persist::CheckpointSnapshot;
use crate::types::{DeliveryStatus, IssueId, StatusMap, UserId};

/// Tracked issues and their per-recipient delivery statuses for one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRun {
    snapshot: CheckpointSnapshot,
    resumed: bool,
}

impl DeliveryRun {
    /// Starts a fresh pass with no tracked issues yet.
    pub fn fresh() -> Self {
        DeliveryRun {
            snapshot: CheckpointSnapshot::new(),
            resumed: false,
        }
    }

    /// Resumes a pass from a recovered checkpoint, trusting it as-is.
    pub fn from_checkpoint(snapshot: CheckpointSnapshot) -> Self {
        DeliveryRun {
            snapshot,
            resumed: true,
        }
    }

    /// True if this pass continues an interrupted one.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Freezes an issue's recipient set into the run.
    pub fn track(&mut self, issue: IssueId, statuses: StatusMap) {
        self.snapshot.track(issue, statuses);
    }

    pub fn tracks(&self, issue: IssueId) -> bool {
        self.snapshot.issue(issue).is_some()
    }

    pub fn statuses(&self, issue: IssueId) -> Option<&StatusMap> {
        self.snapshot.issue(issue)
    }

    /// Records one send attempt's outcome.
    pub fn record(&mut self, issue: IssueId, user: UserId, status: DeliveryStatus) {
        self.snapshot.record(issue, user, status);
    }

    /// Tracked recipients of an issue that still need a send attempt, in
    /// stable order. `Failed` entries are included (retried); `Delivered`
    /// ones are not.
    pub fn pending(&self, issue: IssueId) -> Vec<UserId> {
        self.snapshot
            .issue(issue)
            .map(|statuses| statuses.undelivered().collect())
            .unwrap_or_default()
    }

    /// True iff every tracked recipient of the issue is `Delivered`.
    pub fn issue_complete(&self, issue: IssueId) -> bool {
        self.snapshot
            .issue(issue)
            .is_some_and(StatusMap::is_complete)
    }

    /// Drops a tracked issue (integrity failure: the issue vanished from
    /// the store mid-flight).
    pub fn untrack(&mut self, issue: IssueId) {
        self.snapshot.0.remove(&issue);
    }

    /// Tracked issue ids, in id order.
    pub fn issues(&self) -> Vec<IssueId> {
        self.snapshot.issues().map(|(id, _)| id).collect()
    }

    /// The persistable view of this run.
    pub fn snapshot(&self) -> &CheckpointSnapshot {
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked_run() -> DeliveryRun {
        let mut run = DeliveryRun::fresh();
        run.track(
            IssueId(1),
            [
                (UserId(1), DeliveryStatus::Delivered),
                (UserId(2), DeliveryStatus::Failed),
                (UserId(3), DeliveryStatus::Unknown),
            ]
            .into_iter()
            .collect(),
        );
        run
    }

    #[test]
    fn pending_includes_failed_and_unknown() {
        let run = tracked_run();
        assert_eq!(run.pending(IssueId(1)), vec![UserId(2), UserId(3)]);
        assert_eq!(run.pending(IssueId(99)), Vec::<UserId>::new());
    }

    #[test]
    fn recording_progress_completes_the_issue() {
        let mut run = tracked_run();
        assert!(!run.issue_complete(IssueId(1)));

        run.record(IssueId(1), UserId(2), DeliveryStatus::Delivered);
        run.record(IssueId(1), UserId(3), DeliveryStatus::Delivered);
        assert!(run.issue_complete(IssueId(1)));
        assert!(run.pending(IssueId(1)).is_empty());
    }

    #[test]
    fn resume_preserves_prior_statuses() {
        let run = tracked_run();
        let resumed = DeliveryRun::from_checkpoint(run.snapshot().clone());

        assert!(resumed.resumed());
        assert!(!run.resumed());
        assert_eq!(
            resumed.statuses(IssueId(1)).unwrap().get(UserId(1)),
            Some(DeliveryStatus::Delivered)
        );
        assert_eq!(resumed.pending(IssueId(1)), vec![UserId(2), UserId(3)]);
    }

    #[test]
    fn untrack_removes_the_issue() {
        let mut run = tracked_run();
        run.untrack(IssueId(1));
        assert!(!run.tracks(IssueId(1)));
        assert!(run.snapshot().is_empty());
    }
}
