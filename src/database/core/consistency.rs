//! Catalog schema consistency check
//!
//! Classifies the tables currently present in the store against the fixed
//! catalog table set. The check is read-only.

use crate::database::core::connection::StoreHandle;
use crate::database::core::schema::SchemaDefinitions;
use crate::error::StoreError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Enumerates user tables, skipping the engine's own `sqlite_` tables
pub const OBSERVED_TABLES_QUERY: &str = "SELECT name FROM sqlite_master \
     WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

/// Classification of the store's catalog tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsistencyOutcome {
    /// No catalog table is present
    Fresh,

    /// Every catalog table is present
    Consistent,

    /// Some but not all catalog tables are present
    Inconsistent {
        present: Vec<String>,
        missing: Vec<String>,
    },
}

impl ConsistencyOutcome {
    /// Classify an observed table set against the catalog table names
    pub fn classify(observed: &BTreeSet<String>) -> Self {
        let (present, missing): (Vec<&str>, Vec<&str>) = SchemaDefinitions::table_names()
            .into_iter()
            .partition(|name| observed.contains(*name));

        if present.is_empty() {
            ConsistencyOutcome::Fresh
        } else if missing.is_empty() {
            ConsistencyOutcome::Consistent
        } else {
            ConsistencyOutcome::Inconsistent {
                present: present.into_iter().map(String::from).collect(),
                missing: missing.into_iter().map(String::from).collect(),
            }
        }
    }
}

impl fmt::Display for ConsistencyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyOutcome::Fresh => write!(f, "fresh"),
            ConsistencyOutcome::Consistent => write!(f, "consistent"),
            ConsistencyOutcome::Inconsistent { .. } => write!(f, "inconsistent"),
        }
    }
}

/// Read-only classifier of the store's catalog schema
pub struct SchemaConsistencyChecker<'a> {
    store: &'a StoreHandle,
}

impl<'a> SchemaConsistencyChecker<'a> {
    pub fn new(store: &'a StoreHandle) -> Self {
        Self { store }
    }

    /// Names of all user tables currently in the store
    pub fn observed_tables(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .store
            .query(OBSERVED_TABLES_QUERY, 1)?
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    /// Run the single enumeration query and classify its result
    pub fn check(&self) -> Result<ConsistencyOutcome, StoreError> {
        let observed = self.observed_tables()?;
        Ok(ConsistencyOutcome::classify(&observed))
    }
}
