//! SnapshotStore
//!
//! Bounds replay cost by periodically persisting an aggregate's folded
//! state. `event_snapshots` holds the latest snapshot per aggregate (the
//! hot path `AggregateReplay` reads on every load); `event_snapshot_history`
//! is the append-only ledger that backs retention and listing, since a
//! single-row-per-aggregate table can't answer "what did we have before
//! version N" once it's been overwritten.

mod error;

pub use error::SnapshotError;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::aggregate::Aggregate;

#[derive(Debug, Clone)]
pub struct Snapshot<A> {
    pub version: i64,
    pub state: A,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotMeta {
    pub version: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotStatistics {
    pub total_snapshots_in_history: i64,
    pub aggregates_with_snapshots: i64,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: PgPool,
}

impl SnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a snapshot of `aggregate` at its current version, writing
    /// both the latest-snapshot row and a history row in one transaction.
    pub async fn save_snapshot<A>(&self, aggregate: &A) -> Result<(), SnapshotError>
    where
        A: Aggregate + Serialize,
    {
        let state = serde_json::to_value(aggregate)?;
        let checksum = crate::codec::checksum(&serde_json::to_vec(&state)?);
        let aggregate_type = A::aggregate_type();
        let aggregate_id = aggregate.id();
        let version = aggregate.version();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO event_snapshots (aggregate_type, aggregate_id, version, state, checksum)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_type, aggregate_id)
            DO UPDATE SET version = $3, state = $4, checksum = $5, created_at = NOW()
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(version)
        .bind(&state)
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO event_snapshot_history (aggregate_type, aggregate_id, version, state, checksum)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(version)
        .bind(&state)
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            aggregate_type,
            %aggregate_id,
            version,
            "snapshot saved"
        );

        Ok(())
    }

    pub async fn load_latest_snapshot<A>(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<Snapshot<A>>, SnapshotError>
    where
        A: Aggregate + DeserializeOwned,
    {
        let row: Option<(i64, serde_json::Value, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT version, state, checksum, created_at
            FROM event_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(A::aggregate_type())
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((version, state, checksum, created_at)) => Ok(Some(Snapshot {
                version,
                state: serde_json::from_value(state)?,
                checksum,
                created_at,
            })),
            None => Ok(None),
        }
    }

    pub async fn load_snapshot_at_or_before_version<A>(
        &self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<Option<Snapshot<A>>, SnapshotError>
    where
        A: Aggregate + DeserializeOwned,
    {
        let row: Option<(i64, serde_json::Value, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT version, state, checksum, created_at
            FROM event_snapshot_history
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND version <= $3
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(A::aggregate_type())
        .bind(aggregate_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((version, state, checksum, created_at)) => Ok(Some(Snapshot {
                version,
                state: serde_json::from_value(state)?,
                checksum,
                created_at,
            })),
            None => Ok(None),
        }
    }

    pub async fn delete_snapshots_older_than(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<u64, SnapshotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_snapshot_history
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND created_at < $3
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Keep only the `keep_n` most recent history rows for an aggregate.
    pub async fn keep_latest_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        keep_n: i64,
    ) -> Result<u64, SnapshotError> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_snapshot_history
            WHERE snapshot_id IN (
                SELECT snapshot_id FROM event_snapshot_history
                WHERE aggregate_type = $1 AND aggregate_id = $2
                ORDER BY version DESC
                OFFSET $3
            )
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(keep_n)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_snapshots(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        from_version: Option<i64>,
        to_version: Option<i64>,
    ) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        let rows: Vec<(i64, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT version, checksum, created_at
            FROM event_snapshot_history
            WHERE aggregate_type = $1 AND aggregate_id = $2
              AND ($3::BIGINT IS NULL OR version >= $3)
              AND ($4::BIGINT IS NULL OR version <= $4)
            ORDER BY version DESC
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(from_version)
        .bind(to_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(version, checksum, created_at)| SnapshotMeta {
                version,
                checksum,
                created_at,
            })
            .collect())
    }

    pub async fn get_statistics(&self) -> Result<SnapshotStatistics, SnapshotError> {
        let total_snapshots_in_history: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_snapshot_history")
                .fetch_one(&self.pool)
                .await?;
        let aggregates_with_snapshots: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_snapshots")
                .fetch_one(&self.pool)
                .await?;

        Ok(SnapshotStatistics {
            total_snapshots_in_history,
            aggregates_with_snapshots,
        })
    }
}
