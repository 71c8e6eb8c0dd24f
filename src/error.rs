//! Error types shared by adapters, the migrator and the scheduler

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-usable error classification.
///
/// Carried inside [`crate::sync::MigrationResult`] so callers can branch on the
/// failure class without parsing messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    ConnectivityFailure,
    MalformedSchedule,
    TransferFailure,
    Config,
}

impl ErrorKind {
    /// Status code a transport layer should answer with
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 400,
            _ => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::ConnectivityFailure => write!(f, "connectivity_failure"),
            ErrorKind::MalformedSchedule => write!(f, "malformed_schedule"),
            ErrorKind::TransferFailure => write!(f, "transfer_failure"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Table or job absent
    #[error("{0}")]
    NotFound(String),

    /// Destination table exists and overwrite was not requested
    #[error("{0}")]
    Conflict(String),

    /// Engine unreachable or query failed
    #[error("database error: {0}")]
    Connectivity(#[from] sqlx::Error),

    #[error("invalid cron expression '{expression}': {reason}")]
    MalformedSchedule { expression: String, reason: String },

    /// Create or batched insert failed partway
    #[error("{0}")]
    TransferFailure(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Conflict(_) => ErrorKind::Conflict,
            SyncError::Connectivity(_) => ErrorKind::ConnectivityFailure,
            SyncError::MalformedSchedule { .. } => ErrorKind::MalformedSchedule,
            SyncError::TransferFailure(_) => ErrorKind::TransferFailure,
            SyncError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
