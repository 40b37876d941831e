//! Event envelopes
//!
//! The shape an event takes once it's left the aggregate and entered the
//! log: the raw event payload plus everything the store and its readers
//! need that the event itself doesn't carry - identity, ordering,
//! checksum, and the ambient correlation/causation/tenant fields from
//! `LoggingContext`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event as stored in and read back from the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub global_sequence: i64,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub metadata: serde_json::Value,
    pub context: serde_json::Value,
    pub checksum: String,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub idempotency_key: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An ordered run of envelopes for one aggregate, as returned by
/// `EventStore::load_event_stream` - the unit `AggregateReplay` folds
/// over to rebuild state.
#[derive(Debug, Clone, Default)]
pub struct EventStream {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub envelopes: Vec<EventEnvelope>,
}

impl EventStream {
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }

    pub fn latest_version(&self) -> i64 {
        self.envelopes.last().map(|e| e.version).unwrap_or(-1)
    }
}
