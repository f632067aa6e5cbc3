//! Catalog schema definitions
//!
//! The catalog schema is a fixed set of eleven tables. Each table is declared
//! once here with its columns and foreign-key edges; creation order and DDL
//! are derived from these declarations rather than written out by hand.

use crate::error::SchemaError;
use std::collections::{BTreeSet, HashMap};

/// Abstract column types of the catalog tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key
    Serial,
    Int,
    Varchar(u32),
    Bytes,
}

impl ColumnType {
    /// SQLite rendering of the column type
    pub fn to_sql(self) -> String {
        match self {
            ColumnType::Serial => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
            ColumnType::Bytes => "BLOB".to_string(),
        }
    }
}

/// Foreign-key reference to a column of another catalog table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub references: Option<ForeignKey>,
}

const fn col(name: &'static str, column_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        column_type,
        references: None,
    }
}

const fn fk(name: &'static str, table: &'static str, column: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        column_type: ColumnType::Int,
        references: Some(ForeignKey { table, column }),
    }
}

/// One of the tables that together make up a valid catalog schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTable {
    /// Logical name (e.g. `table-privilege`)
    pub logical_name: &'static str,
    /// Physical table name in the store
    pub name: &'static str,
    /// Declaration position, used to break ordering ties
    pub ordinal: usize,
    pub columns: &'static [ColumnDef],
}

impl RequiredTable {
    /// Names of the tables this table references, without duplicates
    pub fn references(&self) -> BTreeSet<&'static str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.map(|r| r.table))
            .collect()
    }

    /// `CREATE TABLE` statement for this table
    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", c.name, c.column_type.to_sql());
                if let Some(r) = c.references {
                    def.push_str(&format!(" REFERENCES {}({})", r.table, r.column));
                }
                def
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({});", self.name, columns)
    }
}

use ColumnType::{Bytes, Int, Serial, Varchar};

/// Schema definitions for all catalog tables
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    pub const VERSION: RequiredTable = RequiredTable {
        logical_name: "version",
        name: "vermodel",
        ordinal: 0,
        columns: &[col("verid", Int)],
    };

    pub const USER: RequiredTable = RequiredTable {
        logical_name: "user",
        name: "usermodel",
        ordinal: 1,
        columns: &[
            col("userid", Serial),
            col("password", Varchar(50)),
            col("username", Varchar(50)),
            col("createtime", Int),
            col("lastvisittime", Int),
        ],
    };

    pub const DATABASE: RequiredTable = RequiredTable {
        logical_name: "database",
        name: "dbmodel",
        ordinal: 2,
        columns: &[
            col("dbid", Serial),
            col("dbname", Varchar(20)),
            fk("userid", "usermodel", "userid"),
            col("locationurl", Varchar(200)),
        ],
    };

    pub const TABLE: RequiredTable = RequiredTable {
        logical_name: "table",
        name: "tblmodel",
        ordinal: 3,
        columns: &[
            col("tblid", Serial),
            fk("dbid", "dbmodel", "dbid"),
            col("tblname", Varchar(50)),
            col("tbltype", Int),
            fk("userid", "usermodel", "userid"),
            col("createtime", Int),
            col("lastaccesstime", Int),
            col("locationUrl", Varchar(100)),
            col("storageformatid", Int),
            col("fiberColId", Int),
            col("fiberfuncid", Int),
        ],
    };

    pub const COLUMN: RequiredTable = RequiredTable {
        logical_name: "column",
        name: "colmodel",
        ordinal: 4,
        columns: &[
            col("colid", Serial),
            col("colIndex", Int),
            fk("dbid", "dbmodel", "dbid"),
            fk("tblid", "tblmodel", "tblid"),
            col("colName", Varchar(50)),
            col("colType", Varchar(50)),
            col("dataType", Varchar(50)),
        ],
    };

    pub const DATABASE_PARAMETER: RequiredTable = RequiredTable {
        logical_name: "database-parameter",
        name: "dbparammodel",
        ordinal: 5,
        columns: &[
            fk("dbid", "dbmodel", "dbid"),
            col("paramkey", Varchar(100)),
            col("paramvalue", Varchar(200)),
        ],
    };

    pub const TABLE_PARAMETER: RequiredTable = RequiredTable {
        logical_name: "table-parameter",
        name: "tblparammodel",
        ordinal: 6,
        columns: &[
            fk("tblid", "tblmodel", "tblid"),
            col("paramkey", Varchar(100)),
            col("paramvalue", Varchar(200)),
        ],
    };

    pub const TABLE_PRIVILEGE: RequiredTable = RequiredTable {
        logical_name: "table-privilege",
        name: "tblprivmodel",
        ordinal: 7,
        columns: &[
            col("tblprivid", Serial),
            fk("tblid", "tblmodel", "tblid"),
            fk("userid", "usermodel", "userid"),
            col("privtype", Int),
            col("granttime", Int),
        ],
    };

    pub const STORAGE_FORMAT: RequiredTable = RequiredTable {
        logical_name: "storage-format",
        name: "storageformatmodel",
        ordinal: 8,
        columns: &[
            col("storageformatid", Serial),
            col("storageformatname", Varchar(50)),
            col("compression", Varchar(50)),
            col("serialformat", Varchar(50)),
        ],
    };

    pub const FIBER_FUNCTION: RequiredTable = RequiredTable {
        logical_name: "fiber-function",
        name: "fiberfuncmodel",
        ordinal: 9,
        columns: &[
            col("fiberfuncid", Serial),
            col("fiberfuncname", Varchar(50)),
            col("fiberfunccontent", Bytes),
        ],
    };

    pub const BLOCK_INDEX: RequiredTable = RequiredTable {
        logical_name: "block-index",
        name: "blockindex",
        ordinal: 10,
        columns: &[
            col("blockindexid", Serial),
            fk("tblid", "tblmodel", "tblid"),
            col("fibervalue", Int),
            col("timebegin", Int),
            col("timeend", Int),
            col("timezone", Varchar(50)),
            col("blockpath", Varchar(100)),
        ],
    };

    /// Every catalog table, in declaration order
    pub const ALL: &'static [RequiredTable] = &[
        Self::VERSION,
        Self::USER,
        Self::DATABASE,
        Self::TABLE,
        Self::COLUMN,
        Self::DATABASE_PARAMETER,
        Self::TABLE_PARAMETER,
        Self::TABLE_PRIVILEGE,
        Self::STORAGE_FORMAT,
        Self::FIBER_FUNCTION,
        Self::BLOCK_INDEX,
    ];

    /// Physical names of all catalog tables
    pub fn table_names() -> BTreeSet<&'static str> {
        Self::ALL.iter().map(|t| t.name).collect()
    }

    /// Catalog tables ordered so that every referenced table precedes its referrers
    pub fn provisioning_order() -> Result<Vec<RequiredTable>, SchemaError> {
        topological_order(Self::ALL)
    }

    /// `CREATE TABLE` statements in provisioning order
    pub fn create_statements() -> Result<Vec<(&'static str, String)>, SchemaError> {
        Ok(Self::provisioning_order()?
            .into_iter()
            .map(|t| (t.name, t.create_statement()))
            .collect())
    }
}

/// Stable topological sort over foreign-key edges
///
/// Tables with no outstanding references are emitted lowest ordinal first.
/// Self-references do not constrain the order.
pub fn topological_order(tables: &[RequiredTable]) -> Result<Vec<RequiredTable>, SchemaError> {
    let known: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(idx, t)| (t.name, idx))
        .collect();

    // pending[i] = number of distinct tables i still waits for
    let mut pending = vec![0usize; tables.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    for (idx, table) in tables.iter().enumerate() {
        for target in table.references() {
            if target == table.name {
                continue;
            }
            let target_idx = *known
                .get(target)
                .ok_or_else(|| SchemaError::UnknownReference {
                    table: table.name.to_string(),
                    target: target.to_string(),
                })?;
            pending[idx] += 1;
            dependents[target_idx].push(idx);
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = tables
        .iter()
        .enumerate()
        .filter(|(idx, _)| pending[*idx] == 0)
        .map(|(idx, t)| (t.ordinal, idx))
        .collect();

    let mut order = Vec::with_capacity(tables.len());
    while let Some((_, idx)) = ready.pop_first() {
        order.push(tables[idx]);
        for &dep in &dependents[idx] {
            pending[dep] -= 1;
            if pending[dep] == 0 {
                ready.insert((tables[dep].ordinal, dep));
            }
        }
    }

    if order.len() != tables.len() {
        let mut stuck: Vec<String> = tables
            .iter()
            .enumerate()
            .filter(|(idx, _)| pending[*idx] > 0)
            .map(|(_, t)| t.name.to_string())
            .collect();
        stuck.sort();
        return Err(SchemaError::Cycle(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eleven_tables() {
        let names = SchemaDefinitions::table_names();
        assert_eq!(names.len(), 11);
        for expected in [
            "vermodel",
            "usermodel",
            "dbmodel",
            "tblmodel",
            "colmodel",
            "dbparammodel",
            "tblparammodel",
            "tblprivmodel",
            "storageformatmodel",
            "fiberfuncmodel",
            "blockindex",
        ] {
            assert!(names.contains(expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_ordinals_match_declaration() {
        for (idx, table) in SchemaDefinitions::ALL.iter().enumerate() {
            assert_eq!(table.ordinal, idx);
        }
    }

    #[test]
    fn test_foreign_key_edges() {
        let refs = |t: RequiredTable| t.references().into_iter().collect::<Vec<_>>();
        assert!(refs(SchemaDefinitions::VERSION).is_empty());
        assert_eq!(refs(SchemaDefinitions::DATABASE), vec!["usermodel"]);
        assert_eq!(
            refs(SchemaDefinitions::TABLE),
            vec!["dbmodel", "usermodel"]
        );
        assert_eq!(refs(SchemaDefinitions::COLUMN), vec!["dbmodel", "tblmodel"]);
        assert_eq!(refs(SchemaDefinitions::BLOCK_INDEX), vec!["tblmodel"]);
    }

    #[test]
    fn test_provisioning_order_has_no_forward_reference() {
        let order = SchemaDefinitions::provisioning_order().unwrap();
        assert_eq!(order.len(), 11);

        let mut created = BTreeSet::new();
        for table in &order {
            for target in table.references() {
                assert!(
                    created.contains(target),
                    "{} created before its reference {}",
                    table.name,
                    target
                );
            }
            created.insert(table.name);
        }
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let order: Vec<_> = SchemaDefinitions::provisioning_order()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        let declared: Vec<_> = SchemaDefinitions::ALL.iter().map(|t| t.name).collect();
        assert_eq!(order, declared);
    }

    #[test]
    fn test_topological_order_reorders() {
        // Referrer declared first must still come after its target
        const CHILD: RequiredTable = RequiredTable {
            logical_name: "child",
            name: "child",
            ordinal: 0,
            columns: &[fk("parent_id", "parent", "id")],
        };
        const PARENT: RequiredTable = RequiredTable {
            logical_name: "parent",
            name: "parent",
            ordinal: 1,
            columns: &[col("id", Serial)],
        };
        let order: Vec<_> = topological_order(&[CHILD, PARENT])
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(order, vec!["parent", "child"]);
    }

    #[test]
    fn test_topological_order_cycle() {
        const A: RequiredTable = RequiredTable {
            logical_name: "a",
            name: "a",
            ordinal: 0,
            columns: &[fk("b_id", "b", "id")],
        };
        const B: RequiredTable = RequiredTable {
            logical_name: "b",
            name: "b",
            ordinal: 1,
            columns: &[fk("a_id", "a", "id")],
        };
        assert_eq!(
            topological_order(&[A, B]).unwrap_err(),
            SchemaError::Cycle(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_topological_order_unknown_reference() {
        const ORPHAN: RequiredTable = RequiredTable {
            logical_name: "orphan",
            name: "orphan",
            ordinal: 0,
            columns: &[fk("ghost_id", "ghost", "id")],
        };
        assert!(matches!(
            topological_order(&[ORPHAN]),
            Err(SchemaError::UnknownReference { .. })
        ));
    }

    #[test]
    fn test_create_statement_rendering() {
        assert_eq!(
            SchemaDefinitions::DATABASE.create_statement(),
            "CREATE TABLE dbmodel (dbid INTEGER PRIMARY KEY AUTOINCREMENT, dbname VARCHAR(20), \
             userid INT REFERENCES usermodel(userid), locationurl VARCHAR(200));"
        );
        assert_eq!(
            SchemaDefinitions::VERSION.create_statement(),
            "CREATE TABLE vermodel (verid INT);"
        );
    }
}
