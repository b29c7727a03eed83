//! SQLite persistence for workflows, their update logs and user accounts.
//!
//! Workflow updates are a compare-and-swap on `version` executed inside an
//! `IMMEDIATE` transaction, so two writers racing on the same document are
//! serialized by SQLite and exactly one of them sees its expected version.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// Shared handle to the workflow store. `Send + Sync`; wrap it in an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

fn configure(conn: &Connection, wal: bool) -> Result<(), DatabaseError> {
    if wal {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
    Ok(())
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening workflow store");

        let conn = Connection::open(path)?;
        configure(&conn, true)?;
        debug!("workflow store opened (WAL)");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private in-memory store; gone when dropped.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, false)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date. Safe to call on every start.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        info!("workflow store schema is current");
        Ok(())
    }

    /// Lock the connection. A poisoned lock is recovered; SQLite state is
    /// consistent because every write goes through a transaction.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("workflow store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in an `IMMEDIATE` transaction: committed on `Ok`, rolled back
    /// on `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
