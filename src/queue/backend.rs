//! Durable storage behind the queue store.
//!
//! The queue is persisted as one versioned JSON envelope. Evictions are
//! appended to a separate log in the same transaction that removes them
//! from the queue.
//!
//! Every write bumps a revision counter and only lands if the envelope is
//! still at the revision the writer read, so two processes sharing the
//! database never overwrite each other's changes blindly.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::item::{EntityKind, OperationKind, Payload};
use crate::error::OutboundError;
use crate::remote::FailureClass;
use crate::storage::Database;

/// Persisted queue envelope as read from or written to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredQueue {
    pub format_version: i64,
    /// Write counter. On save, the revision the new body was derived from.
    pub revision: i64,
    pub body: String,
}

/// A permanently failed operation, kept until the user dismisses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionRecord {
    /// Log row id; `None` until persisted.
    pub id: Option<i64>,
    pub item_id: String,
    pub entity: EntityKind,
    pub operation: OperationKind,
    pub target: Option<String>,
    pub class: FailureClass,
    pub reason: String,
    /// Item whose eviction took this one down with it.
    pub caused_by: Option<String>,
    pub payload: Payload,
    pub enqueued_at: DateTime<Utc>,
    pub evicted_at: DateTime<Utc>,
}

/// Storage seam for [`QueueStore`](super::QueueStore).
///
/// `save` must be atomic: either the new envelope and all eviction records
/// are durable, or nothing changed.
#[cfg_attr(test, mockall::automock)]
pub trait QueueBackend: Send {
    /// Read the persisted envelope, `None` if nothing was ever written.
    fn load(&self) -> Result<Option<StoredQueue>, OutboundError>;

    /// Replace the persisted envelope and append eviction records.
    ///
    /// Returns the new revision, or `None` without writing anything if the
    /// stored revision is no longer `state.revision`.
    fn save(
        &self,
        state: &StoredQueue,
        evicted: &[EvictionRecord],
    ) -> Result<Option<i64>, OutboundError>;

    /// Eviction log, oldest first.
    fn evictions(&self) -> Result<Vec<EvictionRecord>, OutboundError>;

    /// Remove one eviction record, or all of them when `id` is `None`.
    fn dismiss(&self, id: Option<i64>) -> Result<usize, OutboundError>;
}

/// [`QueueBackend`] on top of the outbound `SQLite` database.
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}

impl QueueBackend for SqliteBackend {
    fn load(&self) -> Result<Option<StoredQueue>, OutboundError> {
        let conn = self.db.connection();

        let result = conn.query_row(
            "SELECT format_version, revision, body FROM queue_state WHERE slot = 1",
            [],
            |row| {
                Ok(StoredQueue {
                    format_version: row.get(0)?,
                    revision: row.get(1)?,
                    body: row.get(2)?,
                })
            },
        );

        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(OutboundError::Database(format!("Failed to load queue: {e}"))),
        }
    }

    fn save(
        &self,
        state: &StoredQueue,
        evicted: &[EvictionRecord],
    ) -> Result<Option<i64>, OutboundError> {
        let write_err = |e: rusqlite::Error| OutboundError::StorageWrite(e.to_string());
        let next_revision = state.revision + 1;

        self.db.write(|tx| {
            let written = tx
                .execute(
                    r"INSERT INTO queue_state (slot, format_version, revision, body, written_at)
                      VALUES (1, ?1, ?2, ?3, ?4)
                      ON CONFLICT(slot) DO UPDATE SET
                        format_version = excluded.format_version,
                        revision = excluded.revision,
                        body = excluded.body,
                        written_at = excluded.written_at
                      WHERE queue_state.revision = ?5",
                    params![
                        state.format_version,
                        next_revision,
                        state.body,
                        Utc::now().to_rfc3339(),
                        state.revision,
                    ],
                )
                .map_err(write_err)?;

            if written == 0 {
                return Ok(None);
            }

            for record in evicted {
                let payload = serde_json::to_string(&record.payload)
                    .map_err(|e| OutboundError::StorageWrite(e.to_string()))?;
                tx.execute(
                    r"INSERT INTO evictions (item_id, entity, operation, target, class, reason,
                                             caused_by, payload, enqueued_at, evicted_at)
                      VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        record.item_id,
                        record.entity.as_str(),
                        record.operation.as_str(),
                        record.target,
                        record.class.as_str(),
                        record.reason,
                        record.caused_by,
                        payload,
                        record.enqueued_at.to_rfc3339(),
                        record.evicted_at.to_rfc3339(),
                    ],
                )
                .map_err(write_err)?;
            }

            Ok(Some(next_revision))
        })
    }

    fn evictions(&self) -> Result<Vec<EvictionRecord>, OutboundError> {
        let conn = self.db.connection();

        let mut stmt = conn
            .prepare(
                r"SELECT id, item_id, entity, operation, target, class, reason,
                         caused_by, payload, enqueued_at, evicted_at
                  FROM evictions
                  ORDER BY id ASC",
            )
            .map_err(|e| OutboundError::Database(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| OutboundError::Database(format!("Failed to query evictions: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| OutboundError::Database(e.to_string()))?);
        }

        Ok(records)
    }

    fn dismiss(&self, id: Option<i64>) -> Result<usize, OutboundError> {
        let conn = self.db.connection();

        let rows = match id {
            Some(id) => conn.execute("DELETE FROM evictions WHERE id = ?1", [id]),
            None => conn.execute("DELETE FROM evictions", []),
        }
        .map_err(|e| OutboundError::StorageWrite(format!("Failed to dismiss eviction: {e}")))?;

        Ok(rows)
    }
}

fn row_to_record(row: &Row<'_>) -> Result<EvictionRecord, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let entity_str: String = row.get(2)?;
    let operation_str: String = row.get(3)?;
    let class_str: String = row.get(5)?;
    let payload_str: String = row.get(8)?;
    let enqueued_at_str: String = row.get(9)?;
    let evicted_at_str: String = row.get(10)?;

    let entity = EntityKind::new(entity_str).map_err(|e| conversion_error(2, e))?;
    let operation = OperationKind::from_name(&operation_str).ok_or_else(|| {
        conversion_error(3, OutboundError::Database(format!("unknown operation {operation_str}")))
    })?;
    let class = FailureClass::from_name(&class_str).ok_or_else(|| {
        conversion_error(5, OutboundError::Database(format!("unknown class {class_str}")))
    })?;
    let payload: Payload = serde_json::from_str(&payload_str).map_err(|e| conversion_error(8, e))?;

    Ok(EvictionRecord {
        id: Some(id),
        item_id: row.get(1)?,
        entity,
        operation,
        target: row.get(4)?,
        class,
        reason: row.get(6)?,
        caused_by: row.get(7)?,
        payload,
        enqueued_at: parse_timestamp(9, &enqueued_at_str)?,
        evicted_at: parse_timestamp(10, &evicted_at_str)?,
    })
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_timestamp(column: usize, s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}
