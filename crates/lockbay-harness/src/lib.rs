//! Deterministic test harness for the Lockbay locker service.
//!
//! `SimEnv` implements `Environment` on top of the tokio clock and a seeded
//! RNG, so a paused runtime makes expiry reproducible.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of the locker
//! bank. Operations are applied to both the model and the real allocation
//! manager, and their results and observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_env;

pub use model::{
    MODEL_DWELL_MS, MODEL_PACKAGES, ModelLocker, ModelLockerId, ModelPackage, ModelPackageId,
    ModelWorld, ObservableState, Operation, OperationError, OperationResult, SETTLE_MS,
};
pub use sim_env::SimEnv;
