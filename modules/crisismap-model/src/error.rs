use crisismap_common::Role;
use crisismap_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Bad input: unknown domain, invalid label, malformed ID.
    #[error("{0}")]
    Validation(String),

    #[error("user {uid:?} lacks {role} access to {target}")]
    NotAuthorized {
        uid: String,
        role: Role,
        target: String,
    },

    /// A mutation was attempted on a built-in placeholder.
    #[error("{0} is read-only")]
    ReadOnly(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModelError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(err))
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
