//! Reference model for model-based testing.
//!
//! The model captures what the locker bank must do without any of the
//! machinery that makes the real one concurrent. It serves as the oracle
//! against which the real allocation manager is verified.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Deterministic: Same inputs produce same outputs
//! - Same fixtures: layout and catalog come from the model so both sides
//!   start identical

mod locker;
pub mod operation;
mod world;

pub use locker::{ModelLocker, ModelPackage};
pub use operation::{ModelLockerId, ModelPackageId, Operation, OperationError, OperationResult};
pub use world::{MODEL_DWELL_MS, MODEL_PACKAGES, ModelWorld, ObservableState, SETTLE_MS};
