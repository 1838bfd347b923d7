use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration for '{field}': {reason}")]
    Configuration { field: String, reason: String },

    #[error("Unreadable source {path} at line {line}: {reason}")]
    Source {
        path: String,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EtlError {
    pub fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub type EtlResult<T> = Result<T, EtlError>;
