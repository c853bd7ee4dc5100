//! gitea-mirror - a resilient batch engine for mirroring GitHub repositories
//! into Gitea.
//!
//! A batch takes a list of items, runs a caller-supplied operation on each
//! one with bounded concurrency and per-item retries, and records progress in
//! a durable job record so that a crash loses at most one checkpoint interval
//! of work.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - database backends for sea-orm.
//! - `migrate` - enables [`connect_and_migrate`] and the bundled migrations.
//! - `gitea` - the reqwest-based Gitea client in [`gitea`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gitea_mirror::batch::{BatchConfig, BatchEngine};
//! use gitea_mirror::store::SqlJobStore;
//! use gitea_mirror::{JobType, RepositoryRef, connect_and_migrate};
//!
//! let db = Arc::new(connect_and_migrate("sqlite://gitea-mirror.db?mode=rwc").await?);
//! let engine = BatchEngine::new(Arc::new(SqlJobStore::new(db)));
//!
//! let repos = vec![RepositoryRef::new("tokio-rs", "tokio")];
//! let outcome = engine
//!     .run(repos, |repo| async move { mirror(repo).await }, BatchConfig::new("alice", JobType::Mirror))
//!     .await?;
//! println!("{}", outcome.message);
//! ```

pub mod batch;
pub mod db;
pub mod entity;
pub mod events;
pub mod item;
pub mod key_cache;
pub mod retry;
pub mod store;

#[cfg(feature = "gitea")]
pub mod gitea;

#[cfg(feature = "gitea")]
pub mod http;

#[cfg(feature = "gitea")]
pub mod rate_limit;

#[cfg(feature = "migrate")]
pub mod migration;

pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use entity::prelude::*;
pub use item::{ItemError, MirrorItem, OrganizationRef, RepositoryRef};
pub use store::{JobStore, SqlJobStore, StoreError};
