//! The capability set the engine depends on.
//!
//! The engine never talks HTTP itself. It calls these three operations, which
//! the Atlassian client implements for real and `test_utils::FakeService`
//! implements for tests.

use std::future::Future;

use serde::{Deserialize, Serialize};

use super::error::{RemoteError, ResolveError};
use crate::types::{AccountId, ResolvedIdentity, ScopeFilter, Target, TargetKind};

/// Opaque pagination cursor returned by a search page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(pub String);

impl PageCursor {
    pub fn new(s: impl Into<String>) -> Self {
        PageCursor(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of owned targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPage {
    pub items: Vec<Target>,
    /// `None` on the last page.
    pub next_cursor: Option<PageCursor>,
}

impl TargetPage {
    pub fn last(items: Vec<Target>) -> Self {
        TargetPage {
            items,
            next_cursor: None,
        }
    }
}

/// Remote operations needed to reassign ownership.
///
/// Implementations must translate every transport or status failure into the
/// [`RemoteError`]/[`ResolveError`] taxonomy before returning.
///
/// # Example (mock for testing)
///
/// ```ignore
/// struct NobodyOwnsAnything;
///
/// impl OwnershipService for NobodyOwnsAnything {
///     async fn resolve_identity(&self, token: &str) -> Result<ResolvedIdentity, ResolveError> {
///         Err(ResolveError::NotFound { token: token.to_string() })
///     }
///
///     async fn search_owned_targets(&self, ..) -> Result<TargetPage, RemoteError> {
///         Ok(TargetPage::last(vec![]))
///     }
///
///     async fn set_owner(&self, ..) -> Result<(), RemoteError> {
///         Ok(())
///     }
/// }
/// ```
pub trait OwnershipService: Send + Sync {
    /// Translates an email, username or account id into a canonical account.
    fn resolve_identity(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<ResolvedIdentity, ResolveError>> + Send;

    /// Fetches one page of targets of `kind` currently owned by `owner`.
    ///
    /// Pass `None` as the cursor for the first page.
    fn search_owned_targets(
        &self,
        kind: TargetKind,
        owner: &AccountId,
        scope: Option<&ScopeFilter>,
        cursor: Option<&PageCursor>,
    ) -> impl Future<Output = Result<TargetPage, RemoteError>> + Send;

    /// Moves ownership of `target` from `previous` to `new_owner`.
    ///
    /// Issues and filters only need the new owner; spaces use `previous` to
    /// find which permissions to move.
    fn set_owner(
        &self,
        target: &Target,
        previous: &AccountId,
        new_owner: &AccountId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
