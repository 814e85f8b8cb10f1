//! Remote capability boundary.
//!
//! This module provides:
//! - `OwnershipService`, the three operations the engine needs
//! - the `RemoteError`/`ResolveError` taxonomy every failure is translated into
//! - `AtlassianClient`, the reqwest-backed implementation

mod capability;
mod client;
mod error;


pub use capability::{OwnershipService, PageCursor, TargetPage};
pub use client::AtlassianClient;
pub use error::{RemoteError, RemoteErrorKind, ResolveError};
