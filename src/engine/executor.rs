//! Dispatch of ownership mutations.
//!
//! Entries are processed concurrently. Within an entry, every target is
//! enumerated before the first mutation is dispatched: searches page by offset
//! over the old owner's current holdings, and each mutation removes a target
//! from that set, so paging while mutating would skip targets. Each target then
//! becomes one mutation task on the shared gate, with a bounded number queued
//! at a time.
//!
//! Every enumerated target produces exactly one outcome, including after
//! cancellation: targets that had not reached the remote service finish as
//! `SkippedCancelled`.

use std::pin::pin;
use std::sync::Arc;

use futures::stream::{self, FuturesUnordered, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::aggregator::OutcomeAggregator;
use super::enumerator::TargetEnumerator;
use super::gate::ConcurrencyGate;
use super::resolver::Resolution;
use crate::remote::OwnershipService;
use crate::types::{
    EntryFailure, FailureStage, MappingEntry, Outcome, OutcomeStatus, ResolvedIdentity, RunReport,
    ScopeFilter, Target, TargetKind,
};

/// Options for one reassignment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapOptions {
    pub kind: TargetKind,
    pub scope: Option<ScopeFilter>,
    /// Enumerate and report, but never mutate.
    pub dry_run: bool,
}

impl RemapOptions {
    pub fn new(kind: TargetKind) -> Self {
        RemapOptions {
            kind,
            scope: None,
            dry_run: false,
        }
    }

    pub fn with_scope(mut self, scope: Option<ScopeFilter>) -> Self {
        self.scope = scope;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// A mapping entry together with the resolution of both its tokens.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub entry: MappingEntry,
    pub old: Resolution,
    pub new: Resolution,
}

/// Runs the mutation phase for a set of resolved entries.
pub struct ReassignmentExecutor<S> {
    service: Arc<S>,
    gate: Arc<ConcurrencyGate>,
    options: RemapOptions,
    cancel: CancellationToken,
}

impl<S: OwnershipService> ReassignmentExecutor<S> {
    pub fn new(
        service: Arc<S>,
        gate: Arc<ConcurrencyGate>,
        options: RemapOptions,
        cancel: CancellationToken,
    ) -> Self {
        ReassignmentExecutor {
            service,
            gate,
            options,
            cancel,
        }
    }

    /// Processes every entry and records into `aggregator`.
    ///
    /// Returns when all enumerated targets have an outcome. Entries do not
    /// affect each other: a failure in one never stops the rest.
    #[instrument(skip_all, fields(kind = %self.options.kind, dry_run = self.options.dry_run, entries = entries.len()))]
    pub async fn execute(&self, entries: Vec<ResolvedEntry>, aggregator: OutcomeAggregator) -> RunReport {
        let aggregator = Mutex::new(aggregator);
        let enumerator = TargetEnumerator::new(
            self.service.clone(),
            self.gate.clone(),
            self.options.kind,
            self.options.scope.clone(),
        );

        stream::iter(entries)
            .for_each_concurrent(self.gate.max_concurrency(), |entry| {
                self.process_entry(entry, &enumerator, &aggregator)
            })
            .await;

        aggregator.into_inner().finish()
    }

    #[instrument(skip_all, fields(entry = %resolved.entry))]
    async fn process_entry(
        &self,
        resolved: ResolvedEntry,
        enumerator: &TargetEnumerator<S>,
        aggregator: &Mutex<OutcomeAggregator>,
    ) {
        if self.cancel.is_cancelled() {
            debug!("Run cancelled; entry not started");
            aggregator.lock().await.mark_interrupted();
            return;
        }

        let ResolvedEntry { entry, old, new } = resolved;
        let (old, new) = match (old, new) {
            (Ok(old), Ok(new)) => (old, new),
            (old, new) => {
                let mut aggregator = aggregator.lock().await;
                for (token, result) in [(&entry.old, old), (&entry.new, new)] {
                    if let Err(e) = result {
                        warn!(token = %token, error = %e, "Skipping entry: identity unresolved");
                        aggregator.record_entry_failure(EntryFailure {
                            entry: entry.clone(),
                            stage: FailureStage::Resolution {
                                token: token.clone(),
                            },
                            detail: e.to_string(),
                        });
                    }
                }
                return;
            }
        };

        if old.account_id == new.account_id {
            info!(account = %old.account_id, "Old and new resolve to the same account; nothing to move");
        }
        info!(from = %old, to = %new, "Reassigning");

        let (targets, enumeration_cut) = self
            .collect_targets(&entry, &old, enumerator, aggregator)
            .await;
        let enumerated = targets.len();

        let window = self.gate.max_concurrency() * 2;
        let mut queue = targets.into_iter();
        let mut pending = FuturesUnordered::new();
        let mut cancelled_targets: usize = 0;

        loop {
            while pending.len() < window && !self.cancel.is_cancelled() {
                match queue.next() {
                    Some(target) => pending.push(self.reassign(target, &old, &new)),
                    None => break,
                }
            }
            let Some(outcome) = pending.next().await else {
                break;
            };
            if outcome.status == OutcomeStatus::SkippedCancelled {
                cancelled_targets += 1;
            }
            aggregator.lock().await.record(outcome);
        }

        let mut aggregator = aggregator.lock().await;
        for target in queue {
            cancelled_targets += 1;
            aggregator.record(Outcome::skipped_cancelled(target));
        }
        if enumeration_cut || cancelled_targets > 0 {
            info!(enumerated, cancelled_targets, "Run cancelled; entry left unfinished");
            aggregator.mark_interrupted();
        } else {
            info!(enumerated, "Entry finished");
        }
    }

    /// Pulls every target the old owner holds before anything is changed.
    ///
    /// Returns the targets gathered and whether cancellation stopped
    /// enumeration early. A page failure is recorded as an entry failure and
    /// the targets from earlier pages are still returned.
    async fn collect_targets(
        &self,
        entry: &MappingEntry,
        old: &ResolvedIdentity,
        enumerator: &TargetEnumerator<S>,
        aggregator: &Mutex<OutcomeAggregator>,
    ) -> (Vec<Target>, bool) {
        let mut stream = pin!(enumerator.enumerate(old.account_id.clone()));
        let mut targets = Vec::new();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!(enumerated = targets.len(), "Run cancelled during enumeration");
                    return (targets, true);
                }

                next = stream.next() => match next {
                    Some(Ok(target)) => targets.push(target),
                    Some(Err(e)) => {
                        aggregator.lock().await.record_entry_failure(EntryFailure {
                            entry: entry.clone(),
                            stage: FailureStage::Enumeration,
                            detail: e.to_string(),
                        });
                        return (targets, false);
                    }
                    None => return (targets, false),
                },
            }
        }
    }

    /// Produces the outcome for one target.
    async fn reassign(&self, target: Target, old: &ResolvedIdentity, new: &ResolvedIdentity) -> Outcome {
        if self.options.dry_run {
            debug!(%target, to = %new, "Dry run");
            return Outcome::skipped_dry_run(target, format!("would reassign to {}", new));
        }

        self.gate
            .dispatch(async {
                // Cancellation may have arrived while this task waited for a slot.
                if self.cancel.is_cancelled() {
                    return Outcome::skipped_cancelled(target);
                }
                match self
                    .service
                    .set_owner(&target, &old.account_id, &new.account_id)
                    .await
                {
                    Ok(()) => {
                        debug!(%target, "Reassigned");
                        Outcome::success(target)
                    }
                    Err(e) => {
                        warn!(%target, error = %e, "Reassignment failed");
                        Outcome::failed(target, e.to_string())
                    }
                }
            })
            .await
    }
}
