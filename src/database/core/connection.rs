//! Store connection management
//!
//! `StoreHandle` owns the single physical connection to the backing store.
//! It is constructed explicitly, shared by reference (or `Arc`) with every
//! component that needs the store, and closed exactly once at shutdown.

use crate::error::StoreError;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Host value that opens a private in-memory store
pub const IN_MEMORY_HOST: &str = ":memory:";

/// A single result row, one text value per column
pub type ResultRow = Vec<String>;

/// Store engines this build can connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDriver {
    Sqlite,
}

impl FromStr for StoreDriver {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" | "org.sqlite.jdbc" => Ok(StoreDriver::Sqlite),
            _ => Err(StoreError::UnsupportedDriver(s.to_string())),
        }
    }
}

impl fmt::Display for StoreDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreDriver::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Lock wait applied when no explicit store timeout is given
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Owned handle to the backing relational store
///
/// The connection sits behind a mutex so that `close()` may be called from a
/// different thread than `connect()` (e.g. a signal-handling task).
#[derive(Default)]
pub struct StoreHandle {
    conn: Mutex<Option<Connection>>,
}

impl StoreHandle {
    /// Create a handle that is not yet connected
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the physical connection
    ///
    /// `host` is the database file path, or `:memory:` for an in-memory store.
    /// SQLite performs no authentication, so `user` and `password` are only
    /// carried for interface compatibility.
    pub fn connect(
        &self,
        driver: &str,
        host: &str,
        user: &str,
        password: &str,
    ) -> Result<(), StoreError> {
        self.connect_with_timeout(driver, host, user, password, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open the physical connection; statements give up after `busy_timeout`
    /// when the store is locked by another process
    pub fn connect_with_timeout(
        &self,
        driver: &str,
        host: &str,
        user: &str,
        _password: &str,
        busy_timeout: Duration,
    ) -> Result<(), StoreError> {
        let driver: StoreDriver = driver.parse()?;

        let mut guard = self.lock();
        if guard.is_some() {
            return Err(StoreError::AlreadyConnected);
        }

        let conn = match host {
            IN_MEMORY_HOST => Connection::open_in_memory(),
            path => Connection::open(path),
        }
        .map_err(|e| StoreError::Connection {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        Self::configure(&conn, host, busy_timeout).map_err(|e| StoreError::Connection {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        debug!(%driver, host, user, "store connection opened");
        *guard = Some(conn);
        Ok(())
    }

    /// Apply connection settings
    fn configure(conn: &Connection, host: &str, busy_timeout: Duration) -> rusqlite::Result<()> {
        conn.busy_timeout(busy_timeout)?;

        // WAL only applies to file-backed stores
        if host != IN_MEMORY_HOST {
            let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        }

        conn.execute("PRAGMA foreign_keys=ON", [])?;
        Ok(())
    }

    /// Run a query and collect every row as text values
    ///
    /// Fails if the statement yields a column count other than
    /// `expected_columns`. NULL values are returned as empty strings.
    pub fn query(&self, sql: &str, expected_columns: usize) -> Result<Vec<ResultRow>, StoreError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StoreError::NotConnected)?;

        let mut stmt = conn.prepare(sql)?;
        let actual = stmt.column_count();
        if actual != expected_columns {
            return Err(StoreError::ColumnCount {
                expected: expected_columns,
                actual,
            });
        }

        let mut rows = stmt.query([])?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(expected_columns);
            for idx in 0..expected_columns {
                values.push(value_to_string(row.get_ref(idx)?));
            }
            result.push(values);
        }
        Ok(result)
    }

    /// Execute a statement and return the number of affected rows
    ///
    /// DDL statements report zero affected rows on success.
    pub fn update(&self, sql: &str) -> Result<usize, StoreError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(StoreError::NotConnected)?;

        // sqlite3_changes() keeps the last DML count across DDL, so only
        // trust it when the running total moved
        let before = total_changes(conn)?;
        let changed = conn.execute(sql, [])?;
        if total_changes(conn)? == before {
            Ok(0)
        } else {
            Ok(changed)
        }
    }

    /// Whether the physical connection is currently open
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Close the physical connection
    ///
    /// Safe to call on a closed or never-opened handle. Returns whether a
    /// connection was actually closed by this call.
    pub fn close(&self) -> bool {
        let Some(conn) = self.lock().take() else {
            return false;
        };

        if let Err((_, e)) = conn.close() {
            // The connection is dropped either way
            tracing::warn!("error while closing store connection: {}", e);
        }
        info!("store connection closed");
        true
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        // A panic while holding the lock cannot leave the Option half-written
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn total_changes(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT total_changes()", [], |row| row.get(0))
}

fn value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn open_in_memory() -> StoreHandle {
        let store = StoreHandle::new();
        store
            .connect("sqlite", IN_MEMORY_HOST, "meta", "secret")
            .unwrap();
        store
    }

    #[test]
    fn test_driver_parse() {
        assert_eq!("sqlite".parse::<StoreDriver>().unwrap(), StoreDriver::Sqlite);
        assert_eq!(
            "org.sqlite.JDBC".parse::<StoreDriver>().unwrap(),
            StoreDriver::Sqlite
        );
        assert!(matches!(
            "org.postgresql.Driver".parse::<StoreDriver>(),
            Err(StoreError::UnsupportedDriver(_))
        ));
    }

    #[test]
    fn test_connect_unsupported_driver() {
        let store = StoreHandle::new();
        let err = store
            .connect("oracle", IN_MEMORY_HOST, "meta", "secret")
            .unwrap_err();
        assert!(err.is_connection());
        assert!(!store.is_connected());
    }

    #[test]
    fn test_connect_unreachable_path() {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("missing").join("meta.db");
        let store = StoreHandle::new();
        let err = store
            .connect("sqlite", host.to_str().unwrap(), "meta", "secret")
            .unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }));
    }

    #[test]
    fn test_connect_twice() {
        let store = open_in_memory();
        let err = store
            .connect("sqlite", IN_MEMORY_HOST, "meta", "secret")
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyConnected));
    }

    #[test]
    fn test_update_and_query() {
        let store = open_in_memory();
        assert_eq!(
            store
                .update("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .update("INSERT INTO t (id, name) VALUES (1, 'a'), (2, NULL)")
                .unwrap(),
            2
        );

        let rows = store.query("SELECT id, name FROM t ORDER BY id", 2).unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["1".to_string(), "a".to_string()],
                vec!["2".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn test_ddl_after_insert_reports_zero() {
        let store = open_in_memory();
        store.update("CREATE TABLE scratch (x INT)").unwrap();
        assert_eq!(
            store.update("INSERT INTO scratch VALUES (1), (2)").unwrap(),
            2
        );
        assert_eq!(store.update("CREATE TABLE other (y INT)").unwrap(), 0);
        assert_eq!(store.update("DELETE FROM scratch WHERE x = 9").unwrap(), 0);
        assert_eq!(store.update("DELETE FROM scratch").unwrap(), 2);
    }

    #[test]
    fn test_query_column_count_mismatch() {
        let store = open_in_memory();
        let err = store.query("SELECT 1, 2", 1).unwrap_err();
        assert!(matches!(
            err,
            StoreError::ColumnCount {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let store = open_in_memory();
        let rows = store.query("PRAGMA foreign_keys", 1).unwrap();
        assert_eq!(rows, vec![vec!["1".to_string()]]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let never_opened = StoreHandle::new();
        assert!(!never_opened.close());

        let store = open_in_memory();
        assert!(store.close());
        assert!(!store.close());
        assert!(matches!(
            store.update("SELECT 1"),
            Err(StoreError::NotConnected)
        ));
    }

    #[test]
    fn test_close_from_other_thread() {
        let store = Arc::new(open_in_memory());
        let remote = Arc::clone(&store);
        let closed = std::thread::spawn(move || remote.close()).join().unwrap();
        assert!(closed);
        assert!(!store.is_connected());
    }
}
