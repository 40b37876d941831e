//! Event Store Repository
//!
//! Core implementation of the append-only event log: atomic, version-checked
//! appends and the read paths (single-aggregate stream, and the four
//! cross-aggregate sweeps used by projections and operational tooling).

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::codec;
use crate::domain::OperationContext;

use super::envelope::{EventEnvelope, EventStream};
use super::EventStoreError;

/// One event to append, scoped to a single aggregate and the version the
/// caller believes is currently persisted for it. `expected_version =
/// -1` means "this aggregate must not already exist".
#[derive(Debug)]
pub struct AggregateOperation {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub expected_version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub checksum: String,
    pub metadata: serde_json::Value,
}

impl AggregateOperation {
    pub fn new<E: Serialize>(
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: i64,
        event_type: &str,
        event: &E,
    ) -> Result<Self, EventStoreError> {
        Self::with_metadata(
            aggregate_type,
            aggregate_id,
            expected_version,
            event_type,
            event,
            serde_json::json!({}),
        )
    }

    pub fn with_metadata<E: Serialize>(
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: i64,
        event_type: &str,
        event: &E,
        metadata: serde_json::Value,
    ) -> Result<Self, EventStoreError> {
        let (event_data, checksum) = codec::encode_event(event)?;
        Ok(Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            expected_version,
            event_type: event_type.to_string(),
            event_data,
            checksum,
            metadata,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    global_sequence: i64,
    aggregate_type: String,
    aggregate_id: Uuid,
    version: i64,
    event_type: String,
    event_data: serde_json::Value,
    metadata: serde_json::Value,
    context: serde_json::Value,
    checksum: String,
    correlation_id: Option<Uuid>,
    causation_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    idempotency_key: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for EventEnvelope {
    fn from(row: EventRow) -> Self {
        EventEnvelope {
            id: row.id,
            global_sequence: row.global_sequence,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            version: row.version,
            event_type: row.event_type,
            event_data: row.event_data,
            metadata: row.metadata,
            context: row.context,
            checksum: row.checksum,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            tenant_id: row.tenant_id,
            idempotency_key: row.idempotency_key,
            created_at: row.created_at,
        }
    }
}

const EVENT_COLUMNS: &str = r#"
    id, global_sequence, aggregate_type, aggregate_id, version, event_type,
    event_data, metadata, context, checksum, correlation_id, causation_id,
    tenant_id, idempotency_key, created_at
"#;

/// Aggregate statistics summary, as returned by `get_statistics`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EventStoreStatistics {
    pub total_events: i64,
    pub total_aggregates: i64,
    pub current_global_sequence: i64,
    pub events_by_type: Vec<(String, i64)>,
}

/// Event Store: the append-only log of domain events.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // append_events, with retry on concurrency conflict
    // =========================================================================

    pub async fn append_events(
        &self,
        operations: Vec<AggregateOperation>,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        const MAX_RETRIES: u32 = 3;

        for attempt in 0..MAX_RETRIES {
            let mut tx = self.pool.begin().await?;
            match Self::append_events_in_tx(&mut tx, &operations, idempotency_key, context).await
            {
                Ok(envelopes) => {
                    tx.commit().await?;
                    return Ok(envelopes);
                }
                Err(EventStoreError::ConcurrencyConflict { .. }) if attempt < MAX_RETRIES - 1 => {
                    drop(tx);
                    let delay = Duration::from_millis(50 * (attempt as u64 + 1));
                    tokio::time::sleep(delay).await;
                    tracing::warn!(
                        "concurrency conflict appending events, retrying (attempt {}/{})",
                        attempt + 1,
                        MAX_RETRIES
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EventStoreError::MaxRetriesExceeded)
    }

    /// Backwards-compatible name for callers that appended before the
    /// outbox existed. Same semantics as `append_events`.
    pub async fn append_atomic(
        &self,
        operations: Vec<AggregateOperation>,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<Vec<Uuid>, EventStoreError> {
        let envelopes = self.append_events(operations, idempotency_key, context).await?;
        Ok(envelopes.into_iter().map(|e| e.id).collect())
    }

    /// Append within a transaction the caller already owns, so the
    /// outbox insert (done by `TransactionCoordinator`/`Outbox`) commits
    /// or rolls back atomically with the events themselves. Does not
    /// commit or roll back the transaction.
    pub(crate) async fn append_events_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        operations: &[AggregateOperation],
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let context_json = serde_json::to_value(context)?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = Self::check_idempotency_key(tx, key).await? {
                let envelope = Self::load_one(tx, existing).await?;
                return Ok(vec![envelope]);
            }
        }

        let mut envelopes = Vec::with_capacity(operations.len());

        for (idx, op) in operations.iter().enumerate() {
            let current_version = Self::get_current_version_tx(tx, op.aggregate_id).await?;

            if current_version != op.expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: op.aggregate_id,
                    expected: op.expected_version,
                    actual: current_version,
                });
            }

            let new_version = op.expected_version + 1;
            let idem_key = if idx == 0 { idempotency_key } else { None };
            let size = serde_json::to_vec(&op.event_data).map(|b| b.len() as i32).unwrap_or(0);

            let insert_result: Result<EventRow, sqlx::Error> = sqlx::query_as(&format!(
                r#"
                INSERT INTO events (
                    aggregate_type, aggregate_id, version, event_type,
                    event_data, metadata, context, checksum, event_size_bytes,
                    correlation_id, causation_id, tenant_id, idempotency_key
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                RETURNING {EVENT_COLUMNS}
                "#
            ))
            .bind(&op.aggregate_type)
            .bind(op.aggregate_id)
            .bind(new_version)
            .bind(&op.event_type)
            .bind(&op.event_data)
            .bind(&op.metadata)
            .bind(&context_json)
            .bind(&op.checksum)
            .bind(size)
            .bind(context.correlation_id)
            .bind(None::<Uuid>)
            .bind(None::<Uuid>)
            .bind(idem_key)
            .fetch_one(&mut **tx)
            .await;

            // Two appenders can both pass the `SELECT MAX(version)` check above
            // under READ COMMITTED and then race here; exactly one INSERT wins
            // and the other hits the `(aggregate_type, aggregate_id, version)`
            // unique index. Translate that race loss into the same
            // `ConcurrencyConflict` the version check above returns, rather
            // than letting a raw unique-violation escape as a `Database` error
            // - the loser needs `actual` so it can reload and retry.
            let row = match insert_result {
                Ok(row) => row,
                Err(sqlx::Error::Database(db_err))
                    if db_err.constraint() == Some("idx_events_aggregate_version") =>
                {
                    let actual = Self::get_current_version_tx(tx, op.aggregate_id).await?;
                    return Err(EventStoreError::ConcurrencyConflict {
                        aggregate_id: op.aggregate_id,
                        expected: op.expected_version,
                        actual,
                    });
                }
                Err(e) => return Err(e.into()),
            };

            envelopes.push(EventEnvelope::from(row));
        }

        if let Some(key) = idempotency_key {
            Self::complete_idempotency_key(tx, key, envelopes[0].id).await?;
        }

        Ok(envelopes)
    }

    async fn load_one(
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
    ) -> Result<EventEnvelope, EventStoreError> {
        let row: EventRow = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    async fn get_current_version_tx(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(result.unwrap_or(-1))
    }

    async fn check_idempotency_key(
        tx: &mut Transaction<'_, Postgres>,
        key: Uuid,
    ) -> Result<Option<Uuid>, EventStoreError> {
        let result: Option<(String, Option<Uuid>)> = sqlx::query_as(
            r#"
            SELECT processing_status, event_id
            FROM idempotency_keys
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        match result {
            Some((status, Some(event_id))) if status == "completed" => Ok(Some(event_id)),
            Some((status, _)) if status == "processing" => {
                Err(EventStoreError::IdempotencyKeyExists(key))
            }
            Some(_) => Ok(None),
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO idempotency_keys (key, request_hash, processing_status, processing_started_at)
                    VALUES ($1, '', 'processing', NOW())
                    "#,
                )
                .bind(key)
                .execute(&mut **tx)
                .await?;
                Ok(None)
            }
        }
    }

    async fn complete_idempotency_key(
        tx: &mut Transaction<'_, Postgres>,
        key: Uuid,
        event_id: Uuid,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'completed', event_id = $2
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current persisted version of an aggregate, or `-1` if it has no
    /// events at all.
    pub async fn get_aggregate_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        Ok(result.unwrap_or(-1))
    }

    /// All events for one aggregate, in version order, optionally
    /// starting after `from_version` (used when resuming from a
    /// snapshot).
    pub async fn load_event_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<EventStream, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            "#
        ))
        .bind(aggregate_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(EventStream {
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            envelopes: rows.into_iter().map(EventEnvelope::from).collect(),
        })
    }

    /// All events for an aggregate, unconditionally (debugging/auditing).
    pub async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE aggregate_id = $1
            ORDER BY version ASC
            "#
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventEnvelope::from).collect())
    }

    /// Stream every event in the log, oldest first. Used by full
    /// rebuilds and ad hoc projections - not the hot path.
    pub fn stream_all_events(
        &self,
    ) -> impl Stream<Item = Result<EventEnvelope, EventStoreError>> + '_ {
        use futures::StreamExt;
        sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY global_sequence ASC"
        ))
        .fetch(&self.pool)
        .map(|r| r.map(EventEnvelope::from).map_err(EventStoreError::from))
    }

    pub fn stream_events_by_type(
        &self,
        event_type: &str,
    ) -> impl Stream<Item = Result<EventEnvelope, EventStoreError>> + '_ {
        use futures::StreamExt;
        sqlx::query_as::<_, EventRow>(&format!(
            r#"SELECT {EVENT_COLUMNS} FROM events WHERE event_type = $1 ORDER BY global_sequence ASC"#
        ))
        .bind(event_type.to_string())
        .fetch(&self.pool)
        .map(|r| r.map(EventEnvelope::from).map_err(EventStoreError::from))
    }

    pub fn stream_events_by_aggregate_type(
        &self,
        aggregate_type: &str,
    ) -> impl Stream<Item = Result<EventEnvelope, EventStoreError>> + '_ {
        use futures::StreamExt;
        sqlx::query_as::<_, EventRow>(&format!(
            r#"SELECT {EVENT_COLUMNS} FROM events WHERE aggregate_type = $1 ORDER BY global_sequence ASC"#
        ))
        .bind(aggregate_type.to_string())
        .fetch(&self.pool)
        .map(|r| r.map(EventEnvelope::from).map_err(EventStoreError::from))
    }

    pub fn stream_events_by_time_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Stream<Item = Result<EventEnvelope, EventStoreError>> + '_ {
        use futures::StreamExt;
        sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM events
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY global_sequence ASC
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch(&self.pool)
        .map(|r| r.map(EventEnvelope::from).map_err(EventStoreError::from))
    }

    pub async fn get_current_global_sequence(&self) -> Result<i64, EventStoreError> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT MAX(global_sequence) FROM events")
            .fetch_optional(&self.pool)
            .await?
            .flatten();
        Ok(seq.unwrap_or(0))
    }

    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    pub async fn get_statistics(&self) -> Result<EventStoreStatistics, EventStoreError> {
        let total_events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        let total_aggregates: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT aggregate_id) FROM events")
                .fetch_one(&self.pool)
                .await?;
        let current_global_sequence = self.get_current_global_sequence().await?;
        let events_by_type_rows = sqlx::query(
            "SELECT event_type, COUNT(*) AS n FROM events GROUP BY event_type ORDER BY n DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        let events_by_type = events_by_type_rows
            .into_iter()
            .map(|row| (row.get::<String, _>("event_type"), row.get::<i64, _>("n")))
            .collect();

        Ok(EventStoreStatistics {
            total_events,
            total_aggregates,
            current_global_sequence,
            events_by_type,
        })
    }
}
