//! Error types for the metaserver bootstrap
//!
//! Every error raised between binding the RPC listener and reaching the
//! serving state is fatal. `BootstrapError` carries the classification that
//! the entry point reports before terminating the process.

use thiserror::Error;

/// Errors raised by the backing store handle
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or opened
    #[error("failed to connect to store '{host}': {reason}")]
    Connection { host: String, reason: String },

    /// The requested driver is not available in this build
    #[error("unsupported store driver '{0}'")]
    UnsupportedDriver(String),

    /// `connect` was called on a handle that is already open
    #[error("store handle is already connected")]
    AlreadyConnected,

    /// A statement was issued on a closed or never-opened handle
    #[error("store handle is not connected")]
    NotConnected,

    /// A statement failed to execute
    #[error("failed to execute statement: {0}")]
    Execution(#[from] rusqlite::Error),

    /// A query returned a different number of columns than requested
    #[error("query returned {actual} columns, expected {expected}")]
    ColumnCount { expected: usize, actual: usize },
}

impl StoreError {
    /// Whether this error belongs to the connection class rather than execution
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            StoreError::Connection { .. }
                | StoreError::UnsupportedDriver(_)
                | StoreError::AlreadyConnected
        )
    }
}

/// Errors in the declarative catalog schema itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A foreign key names a table that is not part of the catalog
    #[error("table '{table}' references unknown table '{target}'")]
    UnknownReference { table: String, target: String },

    /// The foreign-key graph is not a DAG
    #[error("foreign-key cycle among tables: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Errors raised while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read or is missing required keys
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal errors of the server bootstrap sequence
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The RPC port could not be bound
    #[error("failed to bind RPC server at {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Connection(StoreError),

    /// Only part of the catalog schema is present in the store
    #[error(
        "catalog schema is broken: present [{}], missing [{}]; operator intervention required",
        .present.join(", "),
        .missing.join(", ")
    )]
    Consistency {
        present: Vec<String>,
        missing: Vec<String>,
    },

    /// A table creation step failed; earlier tables are left in place
    #[error(
        "failed to create catalog table '{table}' (already created: [{}]): {reason}",
        .created.join(", ")
    )]
    Provisioning {
        table: String,
        created: Vec<String>,
        reason: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A store statement outside table creation failed
    #[error(transparent)]
    Store(StoreError),

    /// Lifecycle misuse or a failed runtime task
    #[error("{0}")]
    Runtime(String),
}

impl BootstrapError {
    /// Operator-facing error class
    pub fn classification(&self) -> &'static str {
        match self {
            BootstrapError::Config(_) => "ConfigError",
            BootstrapError::Listen { .. } => "ListenError",
            BootstrapError::Connection(_) => "ConnectionError",
            BootstrapError::Consistency { .. } => "ConsistencyError",
            BootstrapError::Provisioning { .. } | BootstrapError::Schema(_) => "ProvisioningError",
            BootstrapError::Store(_) => "ExecutionError",
            BootstrapError::Runtime(_) => "RuntimeError",
        }
    }
}

impl From<StoreError> for BootstrapError {
    fn from(err: StoreError) -> Self {
        if err.is_connection() {
            BootstrapError::Connection(err)
        } else {
            BootstrapError::Store(err)
        }
    }
}
