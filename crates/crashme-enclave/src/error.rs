//! Enclave lifecycle error types.
//!
//! Every recoverable failure the runtime boundary can report maps to one
//! variant here. A process abort raised by the runtime is deliberately absent:
//! it cannot be caught in-process and is classified by the caller that
//! observes the exit status instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handle::EnclaveState;

/// Enclave lifecycle errors
#[derive(Debug, Clone, Error)]
pub enum EnclaveError {
    #[error("Enclave creation failed: {0}")]
    Creation(String),

    #[error("Service loading failed: {0}")]
    Loading(String),

    #[error("No implementation found for contract: {contract}")]
    ServiceNotFound { contract: String },

    #[error("Invocation rejected: {0}")]
    Invocation(String),

    #[error("Cannot destroy enclave in state {state}: {reason}")]
    Destruction { state: EnclaveState, reason: String },
}

impl EnclaveError {
    /// Discriminant of this error, used when recording outcomes
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnclaveError::Creation(_) => ErrorKind::Creation,
            EnclaveError::Loading(_) => ErrorKind::Loading,
            EnclaveError::ServiceNotFound { .. } => ErrorKind::ServiceNotFound,
            EnclaveError::Invocation(_) => ErrorKind::Invocation,
            EnclaveError::Destruction { .. } => ErrorKind::Destruction,
        }
    }
}

pub type EnclaveResult<T> = Result<T, EnclaveError>;

/// Error category, without the runtime-specific message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Creation,
    Loading,
    ServiceNotFound,
    Invocation,
    Destruction,
    /// A worker thread panicked while performing one of its roles
    WorkerPanic,
}

impl ErrorKind {
    /// Setup and teardown failures end a probing run; use failures do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::Creation
                | ErrorKind::Loading
                | ErrorKind::ServiceNotFound
                | ErrorKind::Destruction
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Creation => write!(f, "creation_error"),
            ErrorKind::Loading => write!(f, "loading_error"),
            ErrorKind::ServiceNotFound => write!(f, "service_not_found"),
            ErrorKind::Invocation => write!(f, "invocation_error"),
            ErrorKind::Destruction => write!(f, "destruction_error"),
            ErrorKind::WorkerPanic => write!(f, "worker_panic"),
        }
    }
}
