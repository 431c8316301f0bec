#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Relational query composition for entity APIs.
//!
//! An [`Api`] holds [`EntityDef`]s. A call to [`Api::get`] normalizes the
//! caller's options against the entity's [`OptionSchema`], assembles a
//! [`ClauseSet`] from predicate contributions, filter and search bags and the
//! caller's permission [`Scope`], executes it in LIST, COUNT or GROUP_COUNT
//! mode, hydrates requested relations with one batched fetch per relation
//! kind and shapes the result.
//!
//! Writes go through [`write`] inside [`DbHandle::with_tx`].

pub mod clause;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod finalize;
pub mod hydrate;
pub mod options;
pub mod predicate;
pub mod relation;
pub mod runner;
pub mod scope;
pub mod service;
pub mod value;
pub mod write;

pub use clause::ClauseSet;
pub use config::{ApiConfig, DbConfig, QueryConfig};
pub use db::{ConnectOpts, DbHandle};
pub use error::{ApiError, ApiResult, DbError};
pub use executor::Mode;
pub use finalize::GetResult;
pub use hydrate::{Attachment, HydrationStep, LoadCtx, RelatedStep};
pub use options::{OptionSchema, Output, QueryOptions, SortDir};
pub use predicate::{PredicateCtx, id_in, linked_id_in};
pub use relation::RelationMap;
#[cfg(any(test, feature = "test-support"))]
pub use runner::RecordingRunner;
pub use runner::{QueryRunner, SqliteRunner};
pub use scope::{AclPolicy, GroupAclPath, Scope, ShareAcl, ShareTable};
pub use service::{Api, EntityDef};
pub use value::{Fragment, Id, ResultSet, Row, SqlValue, Statement};

pub use apikit_security::{AccessLevel, CallerContext, UserType};
