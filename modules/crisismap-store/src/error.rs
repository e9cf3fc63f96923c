use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid search query: {0}")]
    Query(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
