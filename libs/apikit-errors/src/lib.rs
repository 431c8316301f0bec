//! Error vocabulary shared by apikit crates.
//!
//! - [`ErrorCode`]: the numeric API error codes returned to clients
//! - [`ErrDef`]: static catalog entries mapping a code to HTTP metadata
//! - [`Problem`]: RFC 9457 problem details (pure data model)
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod problem;

pub use catalog::{ErrDef, ErrorCode};
pub use problem::Problem;
