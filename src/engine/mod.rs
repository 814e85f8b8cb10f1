//! The reassignment engine.
//!
//! A run goes through three phases:
//! 1. resolve every distinct token in the mapping table (cached, concurrent)
//! 2. for each entry whose tokens both resolved, enumerate the old owner's targets
//! 3. dispatch one mutation per target and fold the outcomes into a report
//!
//! All remote calls share a single [`ConcurrencyGate`].

mod aggregator;
mod enumerator;
mod executor;
mod gate;
mod resolver;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use aggregator::{OutcomeAggregator, fold};
pub use enumerator::TargetEnumerator;
pub use executor::{ReassignmentExecutor, RemapOptions, ResolvedEntry};
pub use gate::ConcurrencyGate;
pub use resolver::{IdentityResolver, Resolution};

use crate::mapping::distinct_tokens;
use crate::remote::{OwnershipService, ResolveError};
use crate::types::{MappingEntry, RunReport};

/// Executes a full reassignment run.
///
/// Never fails as a whole: every problem is reported per target or per entry.
/// When `cancel` fires the report covers whatever completed and is marked
/// aborted.
#[instrument(skip_all, fields(kind = %options.kind, entries = entries.len(), dry_run = options.dry_run))]
pub async fn run_remap<S: OwnershipService>(
    service: Arc<S>,
    gate: Arc<ConcurrencyGate>,
    entries: Vec<MappingEntry>,
    options: RemapOptions,
    cancel: CancellationToken,
) -> RunReport {
    let mut aggregator = OutcomeAggregator::started_at(Utc::now());

    let resolver = IdentityResolver::new(service.clone(), gate.clone());
    let tokens = distinct_tokens(&entries);
    info!(tokens = tokens.len(), "Resolving identities");

    let resolved = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        resolved = resolver.resolve_all(tokens) => Some(resolved),
    };
    let Some(resolved) = resolved else {
        warn!("Run cancelled during identity resolution");
        aggregator.mark_interrupted();
        return aggregator.finish();
    };

    let entries = entries
        .into_iter()
        .map(|entry| ResolvedEntry {
            old: lookup(&resolved, &entry.old),
            new: lookup(&resolved, &entry.new),
            entry,
        })
        .collect();

    let report = ReassignmentExecutor::new(service, gate, options, cancel)
        .execute(entries, aggregator)
        .await;

    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        entry_failures = report.entry_failures.len(),
        aborted = report.aborted,
        "Run finished"
    );
    report
}

fn lookup(resolved: &HashMap<String, Resolution>, token: &str) -> Resolution {
    resolved
        .get(token)
        .cloned()
        .unwrap_or_else(|| {
            Err(ResolveError::NotFound {
                token: token.to_string(),
            })
        })
}
