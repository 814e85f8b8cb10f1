//! Per-target outcomes and the final run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::MappingEntry;
use super::target::Target;

/// What happened to a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    /// Dry run: no mutation was issued.
    SkippedDryRun,
    /// Enumerated, but the run was cancelled before the mutation was dispatched.
    SkippedCancelled,
}

impl OutcomeStatus {
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            OutcomeStatus::SkippedDryRun | OutcomeStatus::SkippedCancelled
        )
    }
}

/// The result of one (target, mapping entry) attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub target: Target,
    pub status: OutcomeStatus,
    pub detail: Option<String>,
}

impl Outcome {
    pub fn success(target: Target) -> Self {
        Outcome {
            target,
            status: OutcomeStatus::Success,
            detail: None,
        }
    }

    pub fn failed(target: Target, detail: impl Into<String>) -> Self {
        Outcome {
            target,
            status: OutcomeStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped_dry_run(target: Target, detail: impl Into<String>) -> Self {
        Outcome {
            target,
            status: OutcomeStatus::SkippedDryRun,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped_cancelled(target: Target) -> Self {
        Outcome {
            target,
            status: OutcomeStatus::SkippedCancelled,
            detail: Some("run cancelled before dispatch".to_string()),
        }
    }
}

/// Where an entry-level failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum FailureStage {
    /// A token the entry depends on could not be resolved. No search was made.
    Resolution { token: String },
    /// Paging the owned targets failed. Targets yielded before the failure
    /// were still processed.
    Enumeration,
}

/// A failure that applies to a whole mapping entry rather than one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFailure {
    pub entry: MappingEntry,
    #[serde(flatten)]
    pub stage: FailureStage,
    pub detail: String,
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            FailureStage::Resolution { token } => {
                write!(f, "{}: cannot resolve '{}': {}", self.entry, token, self.detail)
            }
            FailureStage::Enumeration => {
                write!(f, "{}: enumeration stopped: {}", self.entry, self.detail)
            }
        }
    }
}

/// Final, immutable summary of a run.
///
/// `failures` is in completion order, which depends on scheduling and is
/// not stable between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub failures: Vec<Outcome>,
    pub entry_failures: Vec<EntryFailure>,
    /// True when the run was cancelled before all entries were processed.
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Total number of targets that received an outcome.
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    /// True when any target or entry failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || !self.entry_failures.is_empty()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.aborted {
            ExitStatus::Aborted
        } else if self.has_failures() {
            ExitStatus::CompletedWithFailures
        } else {
            ExitStatus::Success
        }
    }
}

/// Process exit status a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Success,
    CompletedWithFailures,
    /// Configuration was invalid; no remote call was made.
    ConfigError,
    /// Cancelled before completion; the report covers what finished.
    Aborted,
    ConnectionFailed,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::CompletedWithFailures => 1,
            ExitStatus::ConfigError => 2,
            ExitStatus::Aborted => 3,
            ExitStatus::ConnectionFailed => 10,
        }
    }
}
