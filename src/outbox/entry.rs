//! Outbox entry shape and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of one outbox entry, stored as the `status` text column.
/// Mirrors the `processing_status` convention already used by
/// `idempotency::IdempotencyStatus` - a small closed set of strings with
/// a `From<String>`/`Display` pair instead of a Postgres enum type, so a
/// new terminal state doesn't require an `ALTER TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLetter,
    Cancelled,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Completed => "COMPLETED",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::DeadLetter => "DEAD_LETTER",
            OutboxStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboxStatus::Completed | OutboxStatus::DeadLetter | OutboxStatus::Cancelled
        )
    }
}

impl From<String> for OutboxStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PENDING" => OutboxStatus::Pending,
            "PROCESSING" => OutboxStatus::Processing,
            "COMPLETED" => OutboxStatus::Completed,
            "FAILED" => OutboxStatus::Failed,
            "DEAD_LETTER" => OutboxStatus::DeadLetter,
            "CANCELLED" => OutboxStatus::Cancelled,
            other => panic!("unknown outbox status in database: {other}"),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An outbox row as read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub outbox_id: i64,
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_version: i64,
    pub global_sequence: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub priority: i16,
    pub partition_key: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
}

/// What the caller supplies to enqueue a new entry. Usually built
/// straight from an `EventEnvelope` the event store just appended - see
/// `Outbox::entry_for_envelope`.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_version: i64,
    pub global_sequence: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub priority: i16,
    pub partition_key: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub max_retries: i32,
}

impl NewOutboxEntry {
    pub fn from_envelope(envelope: &crate::event_store::EventEnvelope) -> Self {
        Self {
            event_id: envelope.id,
            aggregate_id: envelope.aggregate_id,
            aggregate_type: envelope.aggregate_type.clone(),
            aggregate_version: envelope.version,
            global_sequence: envelope.global_sequence,
            event_type: envelope.event_type.clone(),
            event_data: envelope.event_data.clone(),
            metadata: envelope.metadata.clone(),
            priority: 5,
            partition_key: Some(envelope.aggregate_id.to_string()),
            correlation_id: envelope.correlation_id,
            tenant_id: envelope.tenant_id,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboxStatistics {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub cancelled: i64,
}
