use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("outbox entry {0} not found")]
    NotFound(i64),
}
