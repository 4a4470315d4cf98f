//! Core error types.

use thiserror::Error;

use crate::ids::{CustomerId, LockerId, PackageId};

/// Errors from locker pool checks and transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Locker is not part of the pool.
    #[error("locker not found: {0}")]
    NotFound(LockerId),

    /// Locker is full or out of service.
    #[error("locker {0} is occupied")]
    Occupied(LockerId),

    /// Locker holds a small package of another customer.
    #[error("locker {locker_id} is held by customer {holder}, not {requester}")]
    CustomerMismatch {
        /// Locker being placed into.
        locker_id: LockerId,
        /// Customer whose package is already inside.
        holder: CustomerId,
        /// Customer of the package being placed.
        requester: CustomerId,
    },

    /// Package does not fit the locker in its current state.
    #[error("package {package_id} does not fit locker {locker_id}")]
    SizeMismatch {
        /// Locker being placed into.
        locker_id: LockerId,
        /// Package that does not fit.
        package_id: PackageId,
    },
}

/// Errors from the package source collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source does not know this package.
    #[error("package not found: {0}")]
    NotFound(PackageId),

    /// The source itself failed.
    #[error("package source unavailable: {reason}")]
    Unavailable {
        /// Description of the failure.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = PoolError::CustomerMismatch { locker_id: 3, holder: 7, requester: 9 };
        assert_eq!(err.to_string(), "locker 3 is held by customer 7, not 9");
        assert_eq!(PoolError::Occupied(4).to_string(), "locker 4 is occupied");
    }
}
