use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("event store error: {0}")]
    EventStore(#[from] crate::event_store::EventStoreError),

    #[error("outbox error: {0}")]
    Outbox(#[from] crate::outbox::OutboxError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("transaction timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("maximum retries exceeded")]
    MaxRetriesExceeded,

    #[error("propagation MANDATORY requires an already-open coordinated transaction, but none is active")]
    NoActiveTransaction,

    #[error("propagation NEVER forbids running inside an already-open coordinated transaction")]
    ActiveTransactionPresent,
}

impl TransactionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransactionError::EventStore(e) if e.is_concurrency_conflict()
        )
    }
}
