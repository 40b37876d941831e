//! Outbox publisher
//!
//! The message bus itself is out of scope (see `Non-goals`): this trait
//! is the seam a real publisher (Kafka, SNS, whatever this deployment
//! uses) plugs into. `LoggingPublisher` is the in-tree default so the
//! dispatcher has something to drive in tests and in the demo binary
//! without a broker - grounded on the same trait split the
//! transactional-outbox reference crate uses for its `KafkaOutboxPublisher`.

use async_trait::async_trait;

use super::entry::OutboxEntry;
use super::error::OutboxError;

#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), OutboxError>;
}

/// Publishes by logging at info level. Stands in for a real broker
/// client until one is wired in; never fails, so it's also useful for
/// exercising the dispatcher's claim/complete loop in isolation.
///
/// Still resolves each entry's destination via `Config::resolve_destination`
/// so the `publisher.destinationPrefix`/`destinationMappings` knobs show up
/// in the log even without a broker behind them - a real publisher plugged
/// in later resolves the destination the same way before handing off to
/// its client.
#[derive(Debug, Default, Clone)]
pub struct LoggingPublisher {
    config: Option<crate::config::Config>,
}

impl LoggingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            config: Some(config.clone()),
        }
    }
}

#[async_trait]
impl OutboxPublisher for LoggingPublisher {
    async fn publish(&self, entry: &OutboxEntry) -> Result<(), OutboxError> {
        let destination = self
            .config
            .as_ref()
            .map(|c| c.resolve_destination(&entry.event_type))
            .unwrap_or_else(|| entry.event_type.clone());
        tracing::info!(
            outbox_id = entry.outbox_id,
            event_id = %entry.event_id,
            aggregate_type = %entry.aggregate_type,
            aggregate_id = %entry.aggregate_id,
            aggregate_version = entry.aggregate_version,
            global_sequence = entry.global_sequence,
            event_type = %entry.event_type,
            destination = %destination,
            partition_key = ?entry.partition_key,
            "publishing outbox entry"
        );
        Ok(())
    }
}
