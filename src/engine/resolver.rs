//! Identity resolution with a run-scoped cache.
//!
//! Each distinct token is looked up at most once per run. Concurrent requests
//! for the same token share one in-flight lookup: the first caller performs it
//! and the rest await its result.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use super::gate::ConcurrencyGate;
use crate::remote::{OwnershipService, ResolveError};
use crate::types::ResolvedIdentity;

/// The cached outcome of one token lookup.
pub type Resolution = Result<ResolvedIdentity, ResolveError>;

/// Resolves mapping-table tokens to canonical accounts.
///
/// The cache lives exactly as long as the resolver, which is created at run
/// start and dropped with the run.
pub struct IdentityResolver<S> {
    service: Arc<S>,
    gate: Arc<ConcurrencyGate>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Resolution>>>>,
}

impl<S: OwnershipService> IdentityResolver<S> {
    pub fn new(service: Arc<S>, gate: Arc<ConcurrencyGate>) -> Self {
        IdentityResolver {
            service,
            gate,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves one token, performing the remote lookup only on first use.
    pub async fn resolve(&self, token: &str) -> Resolution {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache.entry(token.to_string()).or_default().clone()
        };

        cell.get_or_init(|| async {
            debug!(token, "Resolving identity");
            let result = self
                .gate
                .dispatch(self.service.resolve_identity(token))
                .await;
            match &result {
                Ok(identity) => debug!(token, account = %identity.account_id, "Resolved"),
                Err(e) => warn!(token, error = %e, "Identity could not be resolved"),
            }
            result
        })
        .await
        .clone()
    }

    /// Resolves every token concurrently. One failure never stops the others.
    pub async fn resolve_all(
        &self,
        tokens: impl IntoIterator<Item = String>,
    ) -> HashMap<String, Resolution> {
        let lookups = tokens.into_iter().map(|token| async move {
            let resolution = self.resolve(&token).await;
            (token, resolution)
        });
        join_all(lookups).await.into_iter().collect()
    }

    /// Number of distinct tokens seen so far.
    pub async fn cached_tokens(&self) -> usize {
        self.cache.lock().await.len()
    }
}
