//! # Database
//!
//! SQLite handle shared between the application and the backup engine.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DATABASE OPERATIONS                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                    │
//! │  │ Archive manager │  One pass at a time                                │
//! │  └────────┬────────┘                                                    │
//! │           │ write_pass(|tx| ...)                                        │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                    │
//! │  │    Database     │  BEGIN IMMEDIATE                                   │
//! │  │   (this file)   │  commit on Ok, rollback on Err                     │
//! │  └────────┬────────┘                                                    │
//! │           │ Store::new(&tx)                                             │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                    │
//! │  │     Store       │  Typed rows, row-by-row enumeration                │
//! │  └────────┬────────┘                                                    │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                    │
//! │  │   SQLite DB     │  In-memory for tests and validation                │
//! │  │                 │  File for production                               │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::sync::Arc;

use super::schema;
use super::store::Store;
use crate::error::{Error, Result};

/// The main database handle
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct Database {
    /// The underlying SQLite connection
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        Self::open_blocking(path)
    }

    /// Synchronous form of [`Database::open`], for callers already on a
    /// blocking thread
    pub fn open_blocking(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version: {}", v);
            }
        }

        Ok(())
    }

    /// Run `f` against the connection without a transaction
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` against a typed store without a transaction
    pub fn with_store<T>(&self, f: impl FnOnce(&Store<'_>) -> Result<T>) -> Result<T> {
        self.with_connection(|conn| f(&Store::new(conn)))
    }

    /// Run `f` inside one immediate write transaction.
    ///
    /// Commits when `f` returns `Ok`; any `Err` rolls everything back.
    pub fn write_pass<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| Error::DatabaseError(format!("Failed to commit: {}", e)))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::error!("Rollback after {} failed: {}", err, rollback);
                }
                Err(err)
            }
        }
    }
}
