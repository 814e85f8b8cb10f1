//! Runtime configuration.
//!
//! Settings are read from `REMAP_*` environment variables, backed by a dotenv
//! file (`--env-file`, or `.env` in the working directory when present). Everything is validated before the first remote
//! call: a [`ConfigError`] means the run never starts.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

pub const BASE_URL_VAR: &str = "REMAP_BASE_URL";
pub const EMAIL_VAR: &str = "REMAP_EMAIL";
pub const API_TOKEN_VAR: &str = "REMAP_API_TOKEN";
pub const CONCURRENCY_VAR: &str = "REMAP_CONCURRENCY";
pub const STAGGER_VAR: &str = "REMAP_STAGGER_MS";
pub const PAGE_SIZE_VAR: &str = "REMAP_PAGE_SIZE";

/// Default number of concurrent in-flight remote calls.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Upper bound on concurrency; the service throttles well before this.
pub const MAX_CONCURRENCY: usize = 20;

/// Default stagger step between simultaneously released dispatches.
pub const DEFAULT_STAGGER_MS: u64 = 100;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Env file consulted when none is named explicitly.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: {name} is not set")]
    MissingCredential { name: &'static str },

    #[error("invalid mapping table: {reason}")]
    InvalidMapping { reason: String },

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Validated runtime settings.
#[derive(Clone)]
pub struct Settings {
    /// Site URL, e.g. `https://example.atlassian.net`.
    pub base_url: String,
    /// Account email the API token belongs to.
    pub email: String,
    pub api_token: String,
    /// Maximum concurrent in-flight remote calls (1..=20).
    pub concurrency: usize,
    /// Stagger step; see `engine::ConcurrencyGate`.
    pub stagger_unit: Duration,
    /// Page size requested from search endpoints.
    pub page_size: u32,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &"[secure]")
            .field("concurrency", &self.concurrency)
            .field("stagger_unit", &self.stagger_unit)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl Settings {
    /// Reads settings from the process environment, falling back to
    /// `env_file` (or [`DEFAULT_ENV_FILE`]) for variables the environment does
    /// not set.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file_vars = env_file_vars(env_file, Path::new(DEFAULT_ENV_FILE))?;

        Self::from_lookup(|name| {
            std::env::var(name)
                .ok()
                .or_else(|| file_vars.get(name).cloned())
        })
    }

    /// Builds settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential { name })
        };

        let base_url = required(BASE_URL_VAR)?;
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidSetting {
                name: BASE_URL_VAR,
                reason: format!("'{}' is not an http(s) URL", base_url),
            });
        }
        let email = required(EMAIL_VAR)?;
        let api_token = required(API_TOKEN_VAR)?;

        let concurrency = match lookup(CONCURRENCY_VAR) {
            Some(raw) => parse_number(CONCURRENCY_VAR, &raw)?,
            None => DEFAULT_CONCURRENCY,
        };
        let stagger_ms = match lookup(STAGGER_VAR) {
            Some(raw) => parse_number(STAGGER_VAR, &raw)?,
            None => DEFAULT_STAGGER_MS,
        };
        let page_size = match lookup(PAGE_SIZE_VAR) {
            Some(raw) => parse_number(PAGE_SIZE_VAR, &raw)?,
            None => DEFAULT_PAGE_SIZE,
        };
        if page_size == 0 {
            return Err(ConfigError::InvalidSetting {
                name: PAGE_SIZE_VAR,
                reason: "must be at least 1".to_string(),
            });
        }

        Settings {
            base_url,
            email,
            api_token,
            concurrency: DEFAULT_CONCURRENCY,
            stagger_unit: Duration::from_millis(stagger_ms),
            page_size,
        }
        .with_concurrency(concurrency)
    }

    /// Overrides the concurrency limit, validating its range.
    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(ConfigError::InvalidSetting {
                name: CONCURRENCY_VAR,
                reason: format!("{} is outside 1..={}", concurrency, MAX_CONCURRENCY),
            });
        }
        self.concurrency = concurrency;
        Ok(self)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidSetting {
            name,
            reason: format!("'{}': {}", raw, e),
        })
}

/// Reads `explicit` if given, otherwise `fallback` when it exists. A missing
/// fallback yields no variables; a missing explicit file is an error.
fn env_file_vars(
    explicit: Option<&Path>,
    fallback: &Path,
) -> Result<HashMap<String, String>, ConfigError> {
    match explicit {
        Some(path) => read_env_file(path),
        None if fallback.is_file() => read_env_file(fallback),
        None => Ok(HashMap::new()),
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let invalid = |e: dotenvy::Error| ConfigError::InvalidSetting {
        name: "env file",
        reason: format!("{}: {}", path.display(), e),
    };
    dotenvy::from_path_iter(path)
        .map_err(invalid)?
        .map(|item| item.map_err(invalid))
        .collect()
}
