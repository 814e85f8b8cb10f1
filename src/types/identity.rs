//! Mapping-table rows and their resolved forms.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::AccountId;

/// One `old -> new` row of user input.
///
/// Both sides are opaque identity tokens (email, username, or account id).
/// The engine never interprets their shape; it only hands them to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingEntry {
    pub old: String,
    pub new: String,
}

impl MappingEntry {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        MappingEntry {
            old: old.into(),
            new: new.into(),
        }
    }
}

impl fmt::Display for MappingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.old, self.new)
    }
}

/// A mapping-table token translated into the remote service's canonical account.
///
/// Created once per distinct token per run and cached by the resolver for the
/// run's duration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    /// The token as it appeared in the mapping table.
    pub token: String,
    pub account_id: AccountId,
    pub display_name: String,
}

impl ResolvedIdentity {
    pub fn new(
        token: impl Into<String>,
        account_id: AccountId,
        display_name: impl Into<String>,
    ) -> Self {
        ResolvedIdentity {
            token: token.into(),
            account_id,
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for ResolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.account_id)
    }
}
