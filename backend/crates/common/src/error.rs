use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirraError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("destination error: {0}")]
    Destination(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type MirraResult<T> = Result<T, MirraError>;
