//! Core database infrastructure
//!
//! This module provides the store bootstrap components:
//! - `StoreHandle`: the single owned connection to the backing store
//! - `SchemaDefinitions`: declarative catalog tables and their FK edges
//! - `SchemaConsistencyChecker`: read-only classification of the store
//! - `SchemaProvisioner`: creation of the full catalog on a fresh store

mod connection;
mod consistency;
mod provision;
mod schema;

pub use connection::{
    ResultRow, StoreDriver, StoreHandle, DEFAULT_BUSY_TIMEOUT, IN_MEMORY_HOST,
};
pub use consistency::{ConsistencyOutcome, SchemaConsistencyChecker, OBSERVED_TABLES_QUERY};
pub use provision::SchemaProvisioner;
pub use schema::{
    topological_order, ColumnDef, ColumnType, ForeignKey, RequiredTable, SchemaDefinitions,
};

use crate::error::BootstrapError;
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// Operator-visible status of the catalog schema after bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CatalogStatus {
    /// Fresh store, all catalog tables created
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "META_TABLE_ALREADY_EXISTS")]
    AlreadyExists,
    #[serde(rename = "META_TABLE_BROKEN")]
    Broken,
    #[serde(rename = "META_TABLE_CREATE_FAIL")]
    CreateFail,
}

impl fmt::Display for CatalogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            CatalogStatus::Ok => "OK",
            CatalogStatus::AlreadyExists => "META_TABLE_ALREADY_EXISTS",
            CatalogStatus::Broken => "META_TABLE_BROKEN",
            CatalogStatus::CreateFail => "META_TABLE_CREATE_FAIL",
        };
        write!(f, "{}", code)
    }
}

impl CatalogStatus {
    /// Status reported for a failed bootstrap, if the failure concerns the schema
    pub fn from_error(err: &BootstrapError) -> Option<Self> {
        match err {
            BootstrapError::Consistency { .. } => Some(CatalogStatus::Broken),
            BootstrapError::Provisioning { .. } | BootstrapError::Schema(_) => {
                Some(CatalogStatus::CreateFail)
            }
            _ => None,
        }
    }
}

/// Verify the catalog schema and provision it on a fresh store
///
/// Runs the consistency check exactly once. A fresh store is provisioned, a
/// consistent store is left untouched, and an inconsistent store is refused
/// without any repair attempt.
pub fn ensure_catalog_schema(store: &StoreHandle) -> Result<CatalogStatus, BootstrapError> {
    let outcome = SchemaConsistencyChecker::new(store).check()?;
    info!("catalog schema check: {}", outcome);

    match outcome {
        ConsistencyOutcome::Fresh => {
            if let Err(e) = SchemaProvisioner::new(store).provision() {
                error!("catalog table creation failed: {}", e);
                return Err(e);
            }
            info!("catalog table create status: {}", CatalogStatus::Ok);
            Ok(CatalogStatus::Ok)
        }
        ConsistencyOutcome::Consistent => {
            info!("catalog table status: {}", CatalogStatus::AlreadyExists);
            Ok(CatalogStatus::AlreadyExists)
        }
        ConsistencyOutcome::Inconsistent { present, missing } => {
            warn!(
                "catalog table status: {}; refusing to serve",
                CatalogStatus::Broken
            );
            Err(BootstrapError::Consistency { present, missing })
        }
    }
}
