//! Owner Remap - bulk reassignment of issue, filter and space ownership
//! between accounts on an Atlassian site.
//!
//! This library provides the domain types, the remote capability boundary and
//! the concurrent reassignment engine used by the `owner-remap` binary.

pub mod config;
pub mod engine;
pub mod mapping;
pub mod remote;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
