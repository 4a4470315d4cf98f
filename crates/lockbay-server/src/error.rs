//! Server error types.

use std::fmt;

use crate::manager::AllocationError;

/// Errors that can occur while running the locker service.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Runtime error (tokio runtime, task join)
    Runtime(String),

    /// Allocation error outside the expected workload outcomes
    Allocation(AllocationError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Runtime(msg) => write!(f, "runtime error: {}", msg),
            Self::Allocation(err) => write!(f, "allocation error: {}", err),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Allocation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AllocationError> for ServerError {
    fn from(err: AllocationError) -> Self {
        Self::Allocation(err)
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Runtime(err.to_string())
    }
}
