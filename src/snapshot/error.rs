use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
