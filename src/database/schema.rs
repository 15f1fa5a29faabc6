/*!
 * Schema snapshots of user databases.
 *
 * A snapshot lists every user table with its columns and row count, and
 * carries a version derived from the schema DDL so callers can tell whether
 * the structure changed between two reads.
 */

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Column description taken from `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub primary_key: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub row_count: i64,
}

/// Point-in-time view of a database's structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Hex SHA-256 of the schema DDL
    pub version: String,
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Quote an identifier for interpolation into SQL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Hash every schema object's DDL in a stable order
pub fn schema_version(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(
        "SELECT type, name, COALESCE(sql, '') FROM sqlite_master ORDER BY type, name",
    )?;
    let mut hasher = Sha256::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let kind: String = row.get(0)?;
        let name: String = row.get(1)?;
        let sql: String = row.get(2)?;
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(sql.as_bytes());
        hasher.update([0u8]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Read a full snapshot of the user tables
pub fn read_snapshot(conn: &Connection) -> rusqlite::Result<SchemaSnapshot> {
    let table_names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )?;
        let names = stmt.query_map([], |row| row.get(0))?;
        names.collect::<rusqlite::Result<_>>()?
    };

    let mut tables = Vec::with_capacity(table_names.len());
    for name in table_names {
        let quoted = quote_identifier(&name);

        let columns = {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted))?;
            let columns = stmt.query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get(1)?,
                    data_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    not_null: row.get::<_, i64>(3)? != 0,
                    default_value: row.get(4)?,
                    primary_key: row.get::<_, i64>(5)? != 0,
                })
            })?;
            columns.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let row_count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", quoted), [], |row| row.get(0))?;

        tables.push(TableSchema {
            name,
            columns,
            row_count,
        });
    }

    Ok(SchemaSnapshot {
        version: schema_version(conn)?,
        tables,
    })
}
