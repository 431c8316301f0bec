#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Caller identity for apikit services.
//!
//! Every engine call receives a [`CallerContext`] explicitly; nothing here is
//! stored process-wide.

pub mod access;
pub mod context;
pub mod permission;

pub use access::AccessLevel;
pub use context::{CallerContext, CallerContextBuilder, UserType};
pub use permission::{Permission, PermissionError};

/// Numeric identifier of a stored object (users, groups, entities).
pub type Id = i64;
