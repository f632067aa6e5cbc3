//! Database module
//!
//! This module provides the store side of the metaserver bootstrap.
//!
//! # Architecture
//!
//! ```text
//! database/
//! └── core/             # Foundation
//!     ├── connection    # StoreHandle, the single owned store connection
//!     ├── schema        # declarative catalog tables and FK ordering
//!     ├── consistency   # FRESH / CONSISTENT / INCONSISTENT classification
//!     └── provision     # ordered catalog table creation
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use metaserver::database::{ensure_catalog_schema, StoreHandle};
//!
//! let store = StoreHandle::new();
//! store.connect("sqlite", "/var/lib/metaserver/catalog.sqlite3", "meta", "")?;
//!
//! // Provisions a fresh store, accepts a consistent one, refuses a broken one
//! let status = ensure_catalog_schema(&store)?;
//! println!("catalog status: {}", status);
//!
//! store.close();
//! ```

pub mod core;

pub use core::{
    ensure_catalog_schema, topological_order, CatalogStatus, ColumnDef, ColumnType,
    ConsistencyOutcome, ForeignKey, RequiredTable, ResultRow, SchemaConsistencyChecker,
    SchemaDefinitions, SchemaProvisioner, StoreDriver, StoreHandle, DEFAULT_BUSY_TIMEOUT,
    IN_MEMORY_HOST, OBSERVED_TABLES_QUERY,
};
