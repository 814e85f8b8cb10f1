//! Core domain types for ownership reassignment.
//!
//! Identifiers are newtypes so that account ids, issue keys and filter ids
//! cannot be confused at call sites.

pub mod identity;
pub mod ids;
pub mod outcome;
pub mod target;

pub use identity::{MappingEntry, ResolvedIdentity};
pub use ids::{AccountId, FilterId, IssueKey, SpaceKey};
pub use outcome::{EntryFailure, ExitStatus, FailureStage, Outcome, OutcomeStatus, RunReport};
pub use target::{ScopeFilter, SpaceType, Target, TargetKind, UserField};
