#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Metaserver - bootstrap layer of a catalog metadata server
//!
//! Before a catalog server accepts any remote calls it must hold a single
//! connection to its backing relational store, and the store's catalog schema
//! must be in a known state. This crate provides that bootstrap:
//!
//! - a fresh store (no catalog tables) is provisioned with the full schema,
//! - a consistent store (all catalog tables) is accepted unchanged,
//! - an inconsistent store (some catalog tables) is refused; it needs an
//!   operator, and no repair is attempted.
//!
//! # Architecture
//!
//! - **[`database`]**: store connection and schema bootstrap
//!   - `StoreHandle`: the single owned store connection
//!   - `SchemaDefinitions`: the eleven catalog tables and their FK edges
//!   - `SchemaConsistencyChecker`: FRESH / CONSISTENT / INCONSISTENT
//!   - `SchemaProvisioner`: table creation in foreign-key order
//!
//! - **[`server`]**: RPC listener and the `MetaServer` lifecycle
//!
//! - **[`config`]**: configuration file loading
//!
//! - **[`error`]**: the fatal bootstrap error taxonomy
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use metaserver::MetaServer;
//! use tokio_util::sync::CancellationToken;
//!
//! let server = MetaServer::new("/etc/metaserver.toml");
//! match server.start(metaserver::DEFAULT_RPC_PORT).await {
//!     Ok(()) => server.block_until_termination(CancellationToken::new()).await,
//!     Err(e) => {
//!         eprintln!("{}: {}", e.classification(), e);
//!         server.stop().await;
//!     }
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod server;

// =============================================================================
// Configuration
// =============================================================================

pub use config::MetaConfig;

// =============================================================================
// Errors
// =============================================================================

pub use error::{BootstrapError, ConfigError, SchemaError, StoreError};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

pub use database::{
    ensure_catalog_schema, CatalogStatus, ConsistencyOutcome, RequiredTable,
    SchemaConsistencyChecker, SchemaDefinitions, SchemaProvisioner, StoreHandle,
};

// =============================================================================
// Server Module
// =============================================================================

pub use server::{MetaServer, ServerConfig, ServerState, StatusSnapshot, DEFAULT_RPC_PORT};
