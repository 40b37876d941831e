//! Outbox repository
//!
//! Grounded on the transactional-outbox reference crate's
//! `OutboxRepository` trait (insert / get_unpublished / mark_published /
//! mark_failed / pending_stats), adapted to this crate's richer state
//! machine: an explicit `DEAD_LETTER` terminal status, per-partition
//! ordering via `partition_key`, and a separate due-for-retry query
//! keyed on `next_retry_at` rather than re-scanning every failed row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::entry::{NewOutboxEntry, OutboxEntry, OutboxStatistics, OutboxStatus};
use super::error::OutboxError;

#[derive(sqlx::FromRow)]
struct OutboxRow {
    outbox_id: i64,
    event_id: Uuid,
    aggregate_id: Uuid,
    aggregate_type: String,
    aggregate_version: i64,
    global_sequence: i64,
    event_type: String,
    event_data: serde_json::Value,
    metadata: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    retry_count: i32,
    max_retries: i32,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    priority: i16,
    partition_key: Option<String>,
    correlation_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
}

impl From<OutboxRow> for OutboxEntry {
    fn from(r: OutboxRow) -> Self {
        OutboxEntry {
            outbox_id: r.outbox_id,
            event_id: r.event_id,
            aggregate_id: r.aggregate_id,
            aggregate_type: r.aggregate_type,
            aggregate_version: r.aggregate_version,
            global_sequence: r.global_sequence,
            event_type: r.event_type,
            event_data: r.event_data,
            metadata: r.metadata,
            status: OutboxStatus::from(r.status),
            created_at: r.created_at,
            processed_at: r.processed_at,
            updated_at: r.updated_at,
            retry_count: r.retry_count,
            max_retries: r.max_retries,
            last_error: r.last_error,
            next_retry_at: r.next_retry_at,
            priority: r.priority,
            partition_key: r.partition_key,
            correlation_id: r.correlation_id,
            tenant_id: r.tenant_id,
        }
    }
}

const OUTBOX_COLUMNS: &str = r#"
    outbox_id, event_id, aggregate_id, aggregate_type, aggregate_version,
    global_sequence, event_type, event_data, metadata,
    status, created_at, processed_at, updated_at, retry_count, max_retries,
    last_error, next_retry_at, priority, partition_key, correlation_id, tenant_id
"#;

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(&self, entry: &NewOutboxEntry) -> Result<i64, OutboxError>;

    /// Claim up to `limit` pending entries, ordered by priority then
    /// age, and mark them PROCESSING in the same statement so two
    /// dispatcher instances never pick up the same row.
    async fn claim_pending_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError>;

    /// Same as `claim_pending_batch` but for FAILED entries whose
    /// `next_retry_at` has elapsed.
    async fn claim_retry_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError>;

    async fn mark_completed(&self, outbox_id: i64) -> Result<(), OutboxError>;

    async fn mark_failed(
        &self,
        outbox_id: i64,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    async fn mark_dead_letter(&self, outbox_id: i64, error: &str) -> Result<(), OutboxError>;

    /// Reset entries stuck in PROCESSING back to PENDING if they haven't
    /// been touched since `before` - a worker that claimed a batch and then
    /// crashed or was killed before `mark_completed`/`mark_failed` leaves
    /// its rows there forever otherwise. Returns the number reset.
    async fn reset_stale_processing(&self, before: DateTime<Utc>) -> Result<u64, OutboxError>;

    async fn cleanup_completed_before(&self, before: DateTime<Utc>) -> Result<u64, OutboxError>;

    async fn get_dead_letter_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError>;

    async fn get_statistics(&self) -> Result<OutboxStatistics, OutboxError>;
}

#[derive(Debug, Clone)]
pub struct SqlxOutboxRepository {
    pool: PgPool,
}

impl SqlxOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue within a transaction the caller already owns - this is
    /// how `TransactionCoordinator` keeps the outbox insert in the same
    /// commit as the event append it's reporting on.
    pub(crate) async fn enqueue_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewOutboxEntry,
    ) -> Result<i64, OutboxError> {
        let outbox_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_outbox (
                event_id, aggregate_id, aggregate_type, aggregate_version,
                global_sequence, event_type, event_data, metadata,
                max_retries, priority, partition_key, correlation_id, tenant_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING outbox_id
            "#,
        )
        .bind(entry.event_id)
        .bind(entry.aggregate_id)
        .bind(&entry.aggregate_type)
        .bind(entry.aggregate_version)
        .bind(entry.global_sequence)
        .bind(&entry.event_type)
        .bind(&entry.event_data)
        .bind(&entry.metadata)
        .bind(entry.max_retries)
        .bind(entry.priority)
        .bind(&entry.partition_key)
        .bind(entry.correlation_id)
        .bind(entry.tenant_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(outbox_id)
    }
}

#[async_trait]
impl OutboxRepository for SqlxOutboxRepository {
    async fn enqueue(&self, entry: &NewOutboxEntry) -> Result<i64, OutboxError> {
        let mut tx = self.pool.begin().await?;
        let id = Self::enqueue_in_tx(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn claim_pending_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            UPDATE event_outbox
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE outbox_id IN (
                SELECT outbox_id FROM event_outbox
                WHERE status = 'PENDING'
                ORDER BY priority ASC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxEntry::from).collect())
    }

    async fn claim_retry_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            UPDATE event_outbox
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE outbox_id IN (
                SELECT outbox_id FROM event_outbox
                WHERE status = 'FAILED' AND next_retry_at <= NOW()
                ORDER BY priority ASC, next_retry_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxEntry::from).collect())
    }

    async fn mark_completed(&self, outbox_id: i64) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE event_outbox
            SET status = 'COMPLETED', processed_at = NOW(), updated_at = NOW()
            WHERE outbox_id = $1
            "#,
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        outbox_id: i64,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE event_outbox
            SET status = 'FAILED', retry_count = retry_count + 1,
                last_error = $2, next_retry_at = $3, updated_at = NOW()
            WHERE outbox_id = $1
            "#,
        )
        .bind(outbox_id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_dead_letter(&self, outbox_id: i64, error: &str) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE event_outbox
            SET status = 'DEAD_LETTER', retry_count = retry_count + 1,
                last_error = $2, updated_at = NOW()
            WHERE outbox_id = $1
            "#,
        )
        .bind(outbox_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_stale_processing(&self, before: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE event_outbox
            SET status = 'PENDING', updated_at = NOW()
            WHERE status = 'PROCESSING' AND updated_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_completed_before(&self, before: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            "DELETE FROM event_outbox WHERE status = 'COMPLETED' AND processed_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_dead_letter_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS} FROM event_outbox
            WHERE status = 'DEAD_LETTER'
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxEntry::from).collect())
    }

    async fn get_statistics(&self) -> Result<OutboxStatistics, OutboxError> {
        let row: (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING'),
                COUNT(*) FILTER (WHERE status = 'PROCESSING'),
                COUNT(*) FILTER (WHERE status = 'COMPLETED'),
                COUNT(*) FILTER (WHERE status = 'FAILED'),
                COUNT(*) FILTER (WHERE status = 'DEAD_LETTER'),
                COUNT(*) FILTER (WHERE status = 'CANCELLED')
            FROM event_outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStatistics {
            pending: row.0,
            processing: row.1,
            completed: row.2,
            failed: row.3,
            dead_letter: row.4,
            cancelled: row.5,
        })
    }
}
