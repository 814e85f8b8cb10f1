//! Lazy enumeration of owned targets across pages.

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tracing::{trace, warn};

use super::gate::ConcurrencyGate;
use crate::remote::{OwnershipService, PageCursor, RemoteError};
use crate::types::{AccountId, ScopeFilter, Target, TargetKind};

/// Where the next page fetch starts.
enum Cursor {
    First,
    Next(PageCursor),
    Done,
}

struct PageState {
    owner: AccountId,
    cursor: Cursor,
    page: usize,
}

/// Produces the targets of one kind owned by an account.
///
/// Each call to [`TargetEnumerator::enumerate`] starts a fresh, finite stream.
/// Pages are fetched through the gate only when the consumer asks for more.
pub struct TargetEnumerator<S> {
    service: Arc<S>,
    gate: Arc<ConcurrencyGate>,
    kind: TargetKind,
    scope: Option<ScopeFilter>,
}

impl<S: OwnershipService> TargetEnumerator<S> {
    pub fn new(
        service: Arc<S>,
        gate: Arc<ConcurrencyGate>,
        kind: TargetKind,
        scope: Option<ScopeFilter>,
    ) -> Self {
        // Only issue searches can be scoped to a project.
        let scope = match kind {
            TargetKind::Issue { .. } => scope,
            TargetKind::Filter | TargetKind::Space => {
                if scope.is_some() {
                    warn!(%kind, "Scope filter ignored for this target kind");
                }
                None
            }
        };
        TargetEnumerator {
            service,
            gate,
            kind,
            scope,
        }
    }

    /// Streams targets in the order the service returns them.
    ///
    /// A page failure is yielded as the final item; targets from earlier pages
    /// have already been yielded by then.
    pub fn enumerate(
        &self,
        owner: AccountId,
    ) -> impl Stream<Item = Result<Target, RemoteError>> + '_ {
        let start = PageState {
            owner,
            cursor: Cursor::First,
            page: 0,
        };
        stream::unfold(start, move |state| self.next_page(state))
            .map(|page| {
                let items: Vec<_> = match page {
                    Ok(targets) => targets.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .flatten()
    }

    async fn next_page(
        &self,
        state: PageState,
    ) -> Option<(Result<Vec<Target>, RemoteError>, PageState)> {
        let PageState {
            owner,
            cursor,
            page,
        } = state;
        let current = match cursor {
            Cursor::Done => return None,
            Cursor::First => None,
            Cursor::Next(cursor) => Some(cursor),
        };

        let result = self
            .gate
            .dispatch(self.service.search_owned_targets(
                self.kind,
                &owner,
                self.scope.as_ref(),
                current.as_ref(),
            ))
            .await;

        match result {
            Ok(found) => {
                trace!(%owner, page, items = found.items.len(), "Fetched page");
                let cursor = match found.next_cursor {
                    Some(next) if Some(&next) == current.as_ref() => {
                        warn!(%owner, page, "Service returned the same cursor twice; stopping");
                        Cursor::Done
                    }
                    Some(next) => Cursor::Next(next),
                    None => Cursor::Done,
                };
                let state = PageState {
                    owner,
                    cursor,
                    page: page + 1,
                };
                Some((Ok(found.items), state))
            }
            Err(e) => {
                warn!(%owner, page, error = %e, "Enumeration stopped");
                let state = PageState {
                    owner,
                    cursor: Cursor::Done,
                    page,
                };
                Some((Err(e), state))
            }
        }
    }
}
