use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CadenceResult<T> = Result<T, CadenceError>;

impl CadenceError {
    /// Configuration problems are the only errors fatal to a whole sync invocation.
    pub fn is_config(&self) -> bool {
        matches!(self, CadenceError::Config(_))
    }
}
