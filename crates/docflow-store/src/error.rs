use docflow_common::InvalidTransition;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("file execution {id} not found")]
    NotFound { id: String },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("invalid concurrency limit {0}: must be at least 1")]
    InvalidLimit(u32),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
