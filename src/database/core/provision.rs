//! Catalog schema provisioning
//!
//! Creates every catalog table on a store that holds none of them. Tables are
//! created one statement at a time in foreign-key order. There is no rollback:
//! if a creation fails, the tables created before it remain, and the next
//! consistency check will classify the store as inconsistent.

use crate::database::core::connection::StoreHandle;
use crate::database::core::schema::SchemaDefinitions;
use crate::error::BootstrapError;
use tracing::{debug, info};

/// Creates the full catalog schema on a fresh store
pub struct SchemaProvisioner<'a> {
    store: &'a StoreHandle,
}

impl<'a> SchemaProvisioner<'a> {
    pub fn new(store: &'a StoreHandle) -> Self {
        Self { store }
    }

    /// Create all catalog tables
    ///
    /// Returns the created table names in creation order. Any failed or
    /// unexpected creation status aborts with `BootstrapError::Provisioning`.
    pub fn provision(&self) -> Result<Vec<&'static str>, BootstrapError> {
        let statements = SchemaDefinitions::create_statements()?;
        let mut created = Vec::with_capacity(statements.len());

        for (table, sql) in statements {
            debug!("creating catalog table {}: {}", table, sql);
            match self.store.update(&sql) {
                Ok(0) => created.push(table),
                Ok(affected) => {
                    return Err(BootstrapError::Provisioning {
                        table: table.to_string(),
                        created: created.iter().map(|t| t.to_string()).collect(),
                        reason: format!("unexpected status {} from table creation", affected),
                    });
                }
                Err(e) => {
                    return Err(BootstrapError::Provisioning {
                        table: table.to_string(),
                        created: created.iter().map(|t| t.to_string()).collect(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!("created {} catalog tables", created.len());
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::connection::IN_MEMORY_HOST;
    use crate::database::core::consistency::{ConsistencyOutcome, SchemaConsistencyChecker};

    fn create_test_store() -> StoreHandle {
        let store = StoreHandle::new();
        store
            .connect("sqlite", IN_MEMORY_HOST, "meta", "secret")
            .unwrap();
        store
    }

    #[test]
    fn test_provision_fresh_store() {
        let store = create_test_store();
        let checker = SchemaConsistencyChecker::new(&store);
        assert_eq!(checker.check().unwrap(), ConsistencyOutcome::Fresh);

        let created = SchemaProvisioner::new(&store).provision().unwrap();
        assert_eq!(created.len(), 11);

        assert_eq!(checker.check().unwrap(), ConsistencyOutcome::Consistent);
    }

    #[test]
    fn test_provisioned_foreign_keys() {
        let store = create_test_store();
        SchemaProvisioner::new(&store).provision().unwrap();

        let rows = store
            .query("SELECT \"table\" FROM pragma_foreign_key_list('colmodel') ORDER BY \"table\"", 1)
            .unwrap();
        let targets: Vec<&str> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(targets, vec!["dbmodel", "tblmodel"]);

        // Enforced: a row pointing at a missing user is rejected
        assert!(store
            .update("INSERT INTO dbmodel (dbname, userid, locationurl) VALUES ('db', 42, '/tmp')")
            .is_err());
        store
            .update("INSERT INTO usermodel (password, username, createtime, lastvisittime) VALUES ('pw', 'alice', 0, 0)")
            .unwrap();
        store
            .update("INSERT INTO dbmodel (dbname, userid, locationurl) VALUES ('db', 1, '/tmp')")
            .unwrap();
    }

    #[test]
    fn test_provision_failure_is_reported() {
        let store = create_test_store();
        // A view is not a table, so the store still classifies as fresh,
        // but creating tblmodel collides with it
        store
            .update("CREATE VIEW tblmodel AS SELECT 1 AS tblid")
            .unwrap();
        let checker = SchemaConsistencyChecker::new(&store);
        assert_eq!(checker.check().unwrap(), ConsistencyOutcome::Fresh);

        let err = SchemaProvisioner::new(&store).provision().unwrap_err();
        match err {
            BootstrapError::Provisioning { table, created, .. } => {
                assert_eq!(table, "tblmodel");
                assert_eq!(created, vec!["vermodel", "usermodel", "dbmodel"]);
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }

        // Created tables are not rolled back
        assert!(matches!(
            checker.check().unwrap(),
            ConsistencyOutcome::Inconsistent { .. }
        ));
    }

    #[test]
    fn test_provision_closed_store() {
        let store = StoreHandle::new();
        let err = SchemaProvisioner::new(&store).provision().unwrap_err();
        match err {
            BootstrapError::Provisioning { table, created, .. } => {
                assert_eq!(table, "vermodel");
                assert!(created.is_empty());
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }
    }
}
