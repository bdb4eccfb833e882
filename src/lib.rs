//! # Keel
//!
//! Keeps an encrypted local store consistent with an independently mutated
//! identity graph, and repairs transfer state left behind by an unclean
//! shutdown. Usable both as a library and through the `keel` binary.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! keel = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use keel::config::StoreConfig;
//! use keel::identity::JsonSnapshotService;
//! use keel::runtime::Runtime;
//! use keel::store::SqlCipher;
//!
//! let service = Arc::new(JsonSnapshotService::load("snapshot.json".as_ref())?);
//! let runtime = Runtime::start(StoreConfig::default(), Arc::new(SqlCipher), service).await?;
//! let report = runtime.recovery_report().await;
//! runtime.shutdown().await;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the CLI module. Disable with `default-features = false`.
//! - `sqlcipher`: Links SQLCipher so the store is encrypted at rest.

pub mod blob;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod discussion;
pub mod error;
pub mod events;
pub mod identity;
pub mod names;
pub mod reconcile;
pub mod recovery;
pub mod runtime;
pub mod store;
pub mod types;
