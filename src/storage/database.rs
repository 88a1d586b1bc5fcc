//! `SQLite` connection holding the queue envelope and the eviction log.
//!
//! Writes go through [`Database::write`] so a queue mutation and the
//! evictions it produces commit together or not at all.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction};

use crate::error::OutboundError;

use super::migrations;

/// How long a writer waits on a lock held by another process (a `watch`
/// running next to a one-shot command).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database file with durable commits.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, configured or
    /// migrated.
    pub fn open_at(path: &Path) -> Result<Self, OutboundError> {
        let conn = Connection::open(path).map_err(|e| {
            OutboundError::Database(format!("Failed to open {}: {e}", path.display()))
        })?;

        // A commit must be on disk before the caller is told it succeeded.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .and_then(|_| conn.pragma_update(None, "synchronous", "FULL"))
            .and_then(|()| conn.busy_timeout(BUSY_TIMEOUT))
            .map_err(|e| OutboundError::Database(format!("Failed to configure journal: {e}")))?;

        Self::with_connection(conn)
    }

    /// Open a throwaway database for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn open_in_memory() -> Result<Self, OutboundError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OutboundError::Database(format!("Failed to open in-memory database: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, OutboundError> {
        migrations::run(&conn)?;
        Ok(Self { conn })
    }

    /// Connection for reads.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one transaction and commit it.
    ///
    /// Nothing is committed if `f` fails. Every failure is reported as
    /// [`OutboundError::StorageWrite`].
    ///
    /// # Errors
    ///
    /// Returns an error if `f` fails or the commit fails.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, OutboundError>,
    ) -> Result<T, OutboundError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| OutboundError::StorageWrite(format!("Failed to begin transaction: {e}")))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| OutboundError::StorageWrite(format!("Failed to commit: {e}")))?;
        Ok(value)
    }
}
