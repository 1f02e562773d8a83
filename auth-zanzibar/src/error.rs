use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZanzibarError {
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("Duplicate tuple: {0}")]
    DuplicateTuple(String),

    #[error("Invalid tuple: {0}")]
    InvalidTuple(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl ZanzibarError {
    /// Errors caused by the caller rather than the environment
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownNamespace(_)
                | Self::DuplicateTuple(_)
                | Self::InvalidTuple(_)
                | Self::InvalidSchema(_)
        )
    }
}

impl From<sqlx::Error> for ZanzibarError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<config::ConfigError> for ZanzibarError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ZanzibarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(ZanzibarError::DuplicateTuple("x".into()).is_caller_error());
        assert!(ZanzibarError::UnknownNamespace("x".into()).is_caller_error());
        assert!(!ZanzibarError::StorageError("down".into()).is_caller_error());
    }
}
