//! Outbox
//!
//! Transactional outbox: the same transaction that appends an event also
//! writes the fact that it needs publishing, so "the event was recorded"
//! and "the event will eventually be published" can never disagree. The
//! publishing itself happens out of band, in `OutboxProcessor`.

mod dispatcher;
mod entry;
mod error;
mod publisher;
mod repository;

pub use dispatcher::{OutboxProcessor, OutboxProcessorConfig};
pub use entry::{NewOutboxEntry, OutboxEntry, OutboxStatistics, OutboxStatus};
pub use error::OutboxError;
pub use publisher::{LoggingPublisher, OutboxPublisher};
pub use repository::{OutboxRepository, SqlxOutboxRepository};

use sqlx::PgPool;
use std::sync::Arc;

/// Handle used by request-handling code to enqueue entries outside of a
/// `TransactionCoordinator` call (the coordinator uses
/// `SqlxOutboxRepository::enqueue_in_tx` directly so the insert shares
/// the event append's transaction).
#[derive(Clone)]
pub struct Outbox {
    repository: Arc<dyn OutboxRepository>,
}

impl Outbox {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: Arc::new(SqlxOutboxRepository::new(pool)),
        }
    }

    pub fn repository(&self) -> Arc<dyn OutboxRepository> {
        self.repository.clone()
    }

    pub async fn enqueue(&self, entry: NewOutboxEntry) -> Result<i64, OutboxError> {
        self.repository.enqueue(&entry).await
    }

    pub async fn get_statistics(&self) -> Result<OutboxStatistics, OutboxError> {
        self.repository.get_statistics().await
    }

    pub async fn get_dead_letter_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        self.repository.get_dead_letter_entries(limit).await
    }
}
