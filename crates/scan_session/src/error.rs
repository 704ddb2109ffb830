use thiserror::Error;

use crate::status::SessionStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot move scan session from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("a scan is already {0:?}; cancel it before starting another")]
    ScanInProgress(SessionStatus),
    #[error("no active scan session")]
    NoActiveSession,
    #[error("no files selected")]
    EmptySelection,
    #[error("a deletion is already in flight")]
    DeletionInFlight,
    #[error("scan was cancelled before the engine acknowledged it")]
    StartAbandoned,
    #[error("failed to start scan: {0}")]
    StartFailed(String),
    #[error("{command} command failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("failed to delete files: {0}")]
    Deletion(String),
}
