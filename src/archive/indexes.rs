//! Secondary index drop and rebuild around a bulk restore.
//!
//! Only indexes with stored DDL are touched. SQLite's automatic indexes
//! (`sqlite_autoindex_*`, from PRIMARY KEY and UNIQUE constraints) have no
//! DDL and back constraints the restore relies on, so they stay.

use rusqlite::{params, Connection};

use crate::error::{Error, Result};

/// An index captured before being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexSnapshot {
    /// Table the index belongs to
    pub table_name: String,
    /// Index name
    pub index_name: String,
    /// The exact `CREATE INDEX` statement
    pub original_ddl: String,
}

/// Secondary indexes on `table`, in name order.
pub fn list_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'index' AND tbl_name = ?1
         ORDER BY name",
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    let mut snapshots = Vec::new();
    for row in rows {
        let (name, sql) = row?;
        let Some(sql) = sql else { continue };
        if name.starts_with("sqlite_autoindex") {
            continue;
        }
        snapshots.push(IndexSnapshot {
            table_name: table.to_string(),
            index_name: name,
            original_ddl: sql,
        });
    }
    Ok(snapshots)
}

/// Drop every secondary index on `table`, returning what was dropped.
pub fn drop_all_secondary_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexSnapshot>> {
    let snapshots = list_indexes(conn, table)?;
    for snapshot in &snapshots {
        let sql = format!("DROP INDEX \"{}\"", snapshot.index_name.replace('"', "\"\""));
        conn.execute_batch(&sql).map_err(|e| Error::IndexDropFailed {
            index: snapshot.index_name.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!("Dropped index {} on {}", snapshot.index_name, table);
    }
    Ok(snapshots)
}

/// Replay captured DDL verbatim.
pub fn recreate_indexes(conn: &Connection, snapshots: &[IndexSnapshot]) -> Result<()> {
    for snapshot in snapshots {
        conn.execute_batch(&snapshot.original_ddl)
            .map_err(|e| Error::IndexRebuildFailed {
                index: snapshot.index_name.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(
            "Rebuilt index {} on {}",
            snapshot.index_name,
            snapshot.table_name
        );
    }
    Ok(())
}
