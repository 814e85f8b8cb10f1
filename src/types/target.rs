//! Targets: the remote-owned records subject to reassignment.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{FilterId, IssueKey, SpaceKey};

/// The issue user field that carries ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserField {
    #[default]
    Assignee,
    Reporter,
}

impl UserField {
    /// Returns the field id used in queries and edit payloads.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            UserField::Assignee => "assignee",
            UserField::Reporter => "reporter",
        }
    }
}

impl fmt::Display for UserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api_str())
    }
}

/// Wiki space flavour. Personal spaces are renamed when they change hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    #[default]
    Global,
    Personal,
}

impl SpaceType {
    /// Parses the wiki's `type` field. Anything but `personal` is global.
    pub fn from_api(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("personal") {
            SpaceType::Personal
        } else {
            SpaceType::Global
        }
    }

    pub fn as_api_str(&self) -> &'static str {
        match self {
            SpaceType::Global => "global",
            SpaceType::Personal => "personal",
        }
    }
}

/// Which kind of record a run reassigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    Issue { field: UserField },
    Filter,
    Space,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Issue { field } => write!(f, "issues ({})", field),
            TargetKind::Filter => f.write_str("filters"),
            TargetKind::Space => f.write_str("spaces"),
        }
    }
}

/// Optional narrowing of the search. Only issues honour a project scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "key", rename_all = "snake_case")]
pub enum ScopeFilter {
    Project(String),
}

/// A record being reassigned.
///
/// Each variant carries only the handle needed to address it in a mutation
/// call; richer metadata is never fetched up front.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Target {
    Issue { key: IssueKey, field: UserField },
    Filter { id: FilterId },
    Space {
        id: String,
        key: SpaceKey,
        space_type: SpaceType,
    },
}

impl Target {
    pub fn issue(key: impl Into<String>, field: UserField) -> Self {
        Target::Issue {
            key: IssueKey::new(key),
            field,
        }
    }

    pub fn filter(id: impl Into<String>) -> Self {
        Target::Filter {
            id: FilterId::new(id),
        }
    }

    pub fn space(id: impl Into<String>, key: impl Into<String>, space_type: SpaceType) -> Self {
        Target::Space {
            id: id.into(),
            key: SpaceKey::new(key),
            space_type,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Issue { field, .. } => TargetKind::Issue { field: *field },
            Target::Filter { .. } => TargetKind::Filter,
            Target::Space { .. } => TargetKind::Space,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Issue { key, field } => write!(f, "{} ({})", key, field),
            Target::Filter { id } => write!(f, "{}", id),
            Target::Space { key, .. } => write!(f, "{}", key),
        }
    }
}
