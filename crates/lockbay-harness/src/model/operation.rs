//! Operations for model-based testing.
//!
//! Operations represent every action a caller can take against the locker
//! service. They are generated randomly by proptest and applied to both the
//! model and the real manager.

use arbitrary::Arbitrary;

/// Package index into the model catalog. Values at or past
/// [`MODEL_PACKAGES`](super::MODEL_PACKAGES) are unknown to the source.
pub type ModelPackageId = u8;

/// Locker identifier as seen by callers. Only `1..=4` exist.
pub type ModelLockerId = u8;

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Courier drops off a package.
    Assign {
        /// Package to place.
        package: ModelPackageId,
    },

    /// Customer presents a passcode.
    Unlock {
        /// Locker to open.
        locker: ModelLockerId,
        /// Present the locker's current passcode, or a wrong one.
        correct: bool,
    },

    /// Operator changes a locker's service state.
    SetOutOfService {
        /// Locker to change.
        locker: ModelLockerId,
        /// Take out of service (`true`) or return (`false`).
        out_of_service: bool,
    },

    /// Advance simulated time.
    ///
    /// Expiration watches whose deadline passes fire in the real system.
    AdvanceTime {
        /// Whole seconds to advance.
        secs: u8,
    },
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Package placed into this locker.
    Assigned(u64),

    /// Locker opened, these packages released.
    PickedUp(Vec<u64>),

    /// Operation succeeded with nothing to report.
    Ok,

    /// Operation failed with expected error.
    Error(OperationError),
}

/// Expected errors that can occur during operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Package unknown to the source.
    PackageNotFound,

    /// Package assigned before.
    AlreadyAssigned,

    /// No locker can take the package.
    NoLockerAvailable,

    /// Locker not part of the bank.
    LockerNotFound,

    /// Locker has no passcode.
    NotAssigned,

    /// Passcode mismatch.
    WrongPasscode,

    /// Locker holds packages.
    Occupied,
}
