use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("event checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
