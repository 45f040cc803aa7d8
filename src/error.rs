//! Typed errors and their stable codes.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not connected: database gateway has no open pool")]
    NotConnected,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    #[error("config: {0}")]
    Config(String),
    #[error("database: {0}")]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => EngineError::ConnectionFailure(e.to_string()),
            sqlx::Error::Database(ref db) => {
                let code = db.code().map(|c| c.into_owned());
                let message = db.message().to_string();
                match code.as_deref() {
                    // foreign_key_violation: a restrict/invalidate relation still points at the row
                    Some("23503") => EngineError::IntegrityViolation(message),
                    // not_null_violation, unique_violation
                    Some("23502") | Some("23505") => EngineError::Validation(message),
                    _ => EngineError::Db(e),
                }
            }
            other => EngineError::Db(other),
        }
    }
}

impl EngineError {
    /// Stable snake_case code for collaborators that map errors onto responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotConnected => "not_connected",
            EngineError::NotFound(_) => "not_found",
            EngineError::Validation(_) => "validation_error",
            EngineError::IntegrityViolation(_) => "integrity_violation",
            EngineError::ConnectionFailure(_) => "connection_failure",
            EngineError::Config(_) => "config_error",
            EngineError::Db(sqlx::Error::RowNotFound) => "not_found",
            EngineError::Db(_) => "database_error",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize, Debug)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
