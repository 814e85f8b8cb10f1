//! Shared test utilities: an in-memory ownership service and arbitrary
//! generators for property-based testing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;

use crate::remote::{OwnershipService, PageCursor, RemoteError, RemoteErrorKind, ResolveError, TargetPage};
use crate::types::{AccountId, ResolvedIdentity, ScopeFilter, Target, TargetKind, UserField};

/// In-memory [`OwnershipService`] with scripted failures and call counters.
///
/// Configure with the `with_*` builders, then share behind an `Arc`.
#[derive(Default)]
pub struct FakeService {
    identities: HashMap<String, Result<ResolvedIdentity, ResolveError>>,
    owned: Mutex<HashMap<(TargetKind, AccountId), Vec<Target>>>,
    live_ownership: bool,
    page_size: Option<usize>,
    failing_pages: HashMap<AccountId, (usize, RemoteError)>,
    failing_mutations: HashMap<Target, RemoteError>,
    latency: Duration,

    resolve_calls: Mutex<HashMap<String, usize>>,
    search_calls: AtomicUsize,
    last_scope: Mutex<Option<ScopeFilter>>,
    mutations: Mutex<Vec<(Target, AccountId, AccountId)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Counts a call as in flight until dropped.
struct InFlight<'a> {
    service: &'a FakeService,
}

impl<'a> InFlight<'a> {
    fn enter(service: &'a FakeService) -> Self {
        let now = service.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        service.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight { service }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.service.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an account reachable by `token` and by its own account id.
    pub fn with_user(mut self, token: &str, account: &str, name: &str) -> Self {
        let account_id = AccountId::new(account);
        self.identities.insert(
            token.to_string(),
            Ok(ResolvedIdentity::new(token, account_id.clone(), name)),
        );
        self.identities
            .entry(account.to_string())
            .or_insert_with(|| Ok(ResolvedIdentity::new(account, account_id, name)));
        self
    }

    pub fn with_resolve_error(mut self, token: &str, error: ResolveError) -> Self {
        self.identities.insert(token.to_string(), Err(error));
        self
    }

    pub fn with_owned(mut self, kind: TargetKind, account: &str, targets: Vec<Target>) -> Self {
        self.owned
            .get_mut()
            .unwrap()
            .entry((kind, AccountId::new(account)))
            .or_default()
            .extend(targets);
        self
    }

    /// Makes a successful `set_owner` move the target to the new owner, so
    /// later searches see the change like the real service does.
    pub fn with_live_ownership(mut self) -> Self {
        self.live_ownership = true;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Makes the search for `account` fail on page `page` (0-based).
    pub fn with_failing_page(mut self, account: &str, page: usize, error: RemoteError) -> Self {
        self.failing_pages.insert(AccountId::new(account), (page, error));
        self
    }

    pub fn with_failing_mutation(mut self, target: Target, error: RemoteError) -> Self {
        self.failing_mutations.insert(target, error);
        self
    }

    /// Delay applied to every call, so concurrent calls overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn resolve_count(&self, token: &str) -> usize {
        self.resolve_calls
            .lock()
            .unwrap()
            .get(token)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_resolve_calls(&self) -> usize {
        self.resolve_calls.lock().unwrap().values().sum()
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn last_scope(&self) -> Option<ScopeFilter> {
        self.last_scope.lock().unwrap().clone()
    }

    /// Every `set_owner` call made, in call order.
    pub fn mutations(&self) -> Vec<(Target, AccountId, AccountId)> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    /// Targets `account` currently holds.
    pub fn owned_by(&self, kind: TargetKind, account: &str) -> Vec<Target> {
        self.owned
            .lock()
            .unwrap()
            .get(&(kind, AccountId::new(account)))
            .cloned()
            .unwrap_or_default()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl OwnershipService for FakeService {
    async fn resolve_identity(&self, token: &str) -> Result<ResolvedIdentity, ResolveError> {
        let _guard = InFlight::enter(self);
        *self
            .resolve_calls
            .lock()
            .unwrap()
            .entry(token.to_string())
            .or_default() += 1;
        self.simulate_latency().await;

        self.identities
            .get(token)
            .cloned()
            .unwrap_or_else(|| {
                Err(ResolveError::NotFound {
                    token: token.to_string(),
                })
            })
    }

    async fn search_owned_targets(
        &self,
        kind: TargetKind,
        owner: &AccountId,
        scope: Option<&ScopeFilter>,
        cursor: Option<&PageCursor>,
    ) -> Result<TargetPage, RemoteError> {
        let _guard = InFlight::enter(self);
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_scope.lock().unwrap() = scope.cloned();
        self.simulate_latency().await;

        let page: usize = match cursor {
            Some(cursor) => cursor
                .as_str()
                .parse()
                .map_err(|_| RemoteError::new(RemoteErrorKind::Rejected, "bad cursor"))?,
            None => 0,
        };
        if let Some((failing, error)) = self.failing_pages.get(owner)
            && *failing == page
        {
            return Err(error.clone());
        }

        let owned = self.owned.lock().unwrap();
        let all = owned
            .get(&(kind, owner.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let size = self.page_size.unwrap_or(all.len().max(1));
        let start = (page * size).min(all.len());
        let end = (start + size).min(all.len());
        let next_cursor = (end < all.len()).then(|| PageCursor::new((page + 1).to_string()));

        Ok(TargetPage {
            items: all[start..end].to_vec(),
            next_cursor,
        })
    }

    async fn set_owner(
        &self,
        target: &Target,
        previous: &AccountId,
        new_owner: &AccountId,
    ) -> Result<(), RemoteError> {
        let _guard = InFlight::enter(self);
        self.mutations
            .lock()
            .unwrap()
            .push((target.clone(), previous.clone(), new_owner.clone()));
        self.simulate_latency().await;

        if let Some(error) = self.failing_mutations.get(target) {
            return Err(error.clone());
        }
        if self.live_ownership {
            let kind = target.kind();
            let mut owned = self.owned.lock().unwrap();
            if let Some(held) = owned.get_mut(&(kind, previous.clone())) {
                held.retain(|t| t != target);
            }
            owned
                .entry((kind, new_owner.clone()))
                .or_default()
                .push(target.clone());
        }
        Ok(())
    }
}

// ─── Generators ───

pub fn arb_remote_error_kind() -> impl Strategy<Value = RemoteErrorKind> {
    prop_oneof![
        Just(RemoteErrorKind::Unauthorized),
        Just(RemoteErrorKind::RateLimited),
        Just(RemoteErrorKind::NotFound),
        Just(RemoteErrorKind::ServerError),
        Just(RemoteErrorKind::NetworkFailure),
        Just(RemoteErrorKind::Rejected),
    ]
}

pub fn arb_remote_error() -> impl Strategy<Value = RemoteError> {
    (arb_remote_error_kind(), "[a-zA-Z0-9 ]{1,40}").prop_map(|(kind, message)| RemoteError::new(kind, message))
}

pub fn arb_user_field() -> impl Strategy<Value = UserField> {
    prop_oneof![Just(UserField::Assignee), Just(UserField::Reporter)]
}
