//! Schema migrations, tracked with `PRAGMA user_version`.
//!
//! Entry `n` of `MIGRATIONS` upgrades the schema from version `n` to
//! `n + 1`. Each step runs in its own transaction together with the version
//! bump, so a failed step leaves the database at the previous version.

use rusqlite::Connection;

use crate::error::OutboundError;

/// Schema steps, oldest first.
const MIGRATIONS: &[&str] = &[
    // v1: queue envelope and eviction log
    r"
    CREATE TABLE IF NOT EXISTS queue_state (
        slot INTEGER PRIMARY KEY CHECK (slot = 1),
        format_version INTEGER NOT NULL,
        body TEXT NOT NULL,
        written_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS evictions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_id TEXT NOT NULL,
        entity TEXT NOT NULL,
        operation TEXT NOT NULL,
        target TEXT,
        class TEXT NOT NULL,
        reason TEXT NOT NULL,
        caused_by TEXT,
        payload TEXT NOT NULL,
        enqueued_at TEXT NOT NULL,
        evicted_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_evictions_evicted ON evictions(evicted_at);
    ",
    // v2: write counter for concurrent writers
    r"
    ALTER TABLE queue_state ADD COLUMN revision INTEGER NOT NULL DEFAULT 0;
    ",
];

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const CURRENT_VERSION: i32 = MIGRATIONS.len() as i32;

/// Read `user_version`; 0 for a new database.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn get_version(conn: &Connection) -> Result<i32, OutboundError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| OutboundError::Database(format!("Failed to get schema version: {e}")))
}

/// Apply every step above the database's current version.
///
/// # Errors
///
/// Returns an error if the database was created by a newer build or a
/// step fails.
pub fn run(conn: &Connection) -> Result<(), OutboundError> {
    let current = get_version(conn)?;

    if current > CURRENT_VERSION {
        return Err(OutboundError::Database(format!(
            "schema v{current} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    for (version, sql) in (1_i32..).zip(MIGRATIONS).filter(|(v, _)| *v > current) {
        tracing::debug!(version, "applying schema migration");

        let tx = conn
            .unchecked_transaction()
            .and_then(|tx| {
                tx.execute_batch(sql)?;
                tx.pragma_update(None, "user_version", version)?;
                Ok(tx)
            })
            .map_err(|e| OutboundError::Database(format!("Migration v{version} failed: {e}")))?;

        tx.commit()
            .map_err(|e| OutboundError::Database(format!("Migration v{version} failed: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);

        conn.execute(
            "INSERT INTO queue_state (slot, format_version, body, written_at)
             VALUES (1, 1, '{\"version\":1,\"items\":[]}', '2025-01-01T10:00:00Z')",
            [],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO evictions (item_id, entity, operation, class, reason, payload, enqueued_at, evicted_at)
             VALUES ('local-1', 'inspection', 'create', 'validation', 'bad date', '{}',
                     '2025-01-01T10:00:00Z', '2025-01-01T10:05:00Z')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_v1_row_gets_revision_zero() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0]).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO queue_state (slot, format_version, body, written_at)
             VALUES (1, 1, '{\"version\":1,\"items\":[]}', '2025-01-01T10:00:00Z')",
            [],
        )
        .unwrap();

        run(&conn).unwrap();

        let revision: i64 = conn
            .query_row("SELECT revision FROM queue_state WHERE slot = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(revision, 0);
        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_queue_state_is_single_row() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();

        let second = conn.execute(
            "INSERT INTO queue_state (slot, format_version, body, written_at)
             VALUES (2, 1, '{}', '2025-01-01T10:00:00Z')",
            [],
        );
        assert!(second.is_err());
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run(&conn).unwrap();
        run(&conn).unwrap();

        assert_eq!(get_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1).unwrap();

        assert!(matches!(run(&conn), Err(OutboundError::Database(_))));
    }

    #[test]
    fn test_get_version_new_database() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(get_version(&conn).unwrap(), 0);
    }
}
