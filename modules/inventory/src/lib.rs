#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Host inventory served through the apikit engine.
//!
//! Host groups grant rights to user groups; hosts, items, tags and inventory
//! records inherit access through their host groups. Scripts may be bound to a
//! host group, and network maps use the owner + share model.

pub mod caller;
pub mod catalog;
pub mod hosts;
pub mod schema;

pub use caller::load_caller;
pub use catalog::build_api;
pub use hosts::{HostCreate, HostService, HostTag, HostUpdate};
pub use schema::init;
