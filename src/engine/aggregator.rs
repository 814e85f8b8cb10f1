//! Folds outcomes into the final run report.

use chrono::{DateTime, Utc};

use crate::types::{EntryFailure, Outcome, OutcomeStatus, RunReport};

/// Running totals for one run.
///
/// Counts are taken when an outcome is recorded, so the final report is
/// independent of how outcomes were interleaved.
#[derive(Debug)]
pub struct OutcomeAggregator {
    succeeded: u64,
    failed: u64,
    skipped: u64,
    failures: Vec<Outcome>,
    entry_failures: Vec<EntryFailure>,
    interrupted: bool,
    started_at: DateTime<Utc>,
}

impl Default for OutcomeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeAggregator {
    pub fn new() -> Self {
        Self::started_at(Utc::now())
    }

    pub fn started_at(started_at: DateTime<Utc>) -> Self {
        OutcomeAggregator {
            succeeded: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            entry_failures: Vec::new(),
            interrupted: false,
            started_at,
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        match outcome.status {
            OutcomeStatus::Success => self.succeeded += 1,
            OutcomeStatus::Failed => {
                self.failed += 1;
                self.failures.push(outcome);
            }
            OutcomeStatus::SkippedDryRun | OutcomeStatus::SkippedCancelled => self.skipped += 1,
        }
    }

    pub fn record_entry_failure(&mut self, failure: EntryFailure) {
        self.entry_failures.push(failure);
    }

    /// Notes that work was left undone because the run was cancelled.
    pub fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Targets recorded so far.
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    pub fn finish(self) -> RunReport {
        RunReport {
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            failures: self.failures,
            entry_failures: self.entry_failures,
            aborted: self.interrupted,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Folds a completed collection of outcomes into a report.
pub fn fold(outcomes: impl IntoIterator<Item = Outcome>) -> RunReport {
    let mut aggregator = OutcomeAggregator::new();
    for outcome in outcomes {
        aggregator.record(outcome);
    }
    aggregator.finish()
}
