use crate::validation::ValidationReport;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrickDbError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Rejected: {0}")]
    Guard(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Coarse classification used by callers to pick a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Client,
    NotFound,
    Infrastructure,
}

impl BrickDbError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BrickDbError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn guard(msg: impl Into<String>) -> Self {
        BrickDbError::Guard(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BrickDbError::Validation(_) => ErrorKind::Validation,
            BrickDbError::InvalidPayload(_)
            | BrickDbError::InvalidFilter(_)
            | BrickDbError::Guard(_) => ErrorKind::Client,
            BrickDbError::NotFound { .. } => ErrorKind::NotFound,
            BrickDbError::Schema(_)
            | BrickDbError::Io(_)
            | BrickDbError::Yaml(_)
            | BrickDbError::Json(_)
            | BrickDbError::Sqlite(_) => ErrorKind::Infrastructure,
        }
    }

    /// HTTP-equivalent status for the error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Client => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Infrastructure => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrickDbError>;
