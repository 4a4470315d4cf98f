//! Lockbay core: locker allocation primitives.
//!
//! This crate holds the leaf components of the locker service. Everything
//! here is synchronous and runtime-agnostic; timers and orchestration live in
//! `lockbay-server`.
//!
//! ## Architecture
//!
//! ```text
//! lockbay-core
//!   ├─ Environment        (time, sleep, entropy)
//!   ├─ PasscodeGenerator  (unguessable pickup codes)
//!   ├─ LockerPool         (per-locker occupancy + customer index)
//!   ├─ TicketStore        (package ↔ locker ↔ passcode records)
//!   └─ PackageSource      (external package lookup)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod error;
pub mod ids;
pub mod package;
pub mod passcode;
pub mod pool;
pub mod shard;
pub mod ticket;

pub use env::Environment;
pub use error::{PoolError, SourceError};
pub use ids::{CustomerId, IdGenerator, LockerId, PackageId, SequentialIds, TicketId};
pub use package::{MemoryPackageSource, PackageInfo, PackageSize, PackageSource, PackageStatus};
pub use passcode::{
    DEFAULT_PASSCODE_LENGTH, MIN_PASSCODE_LENGTH, Passcode, PasscodeGenerator, RandomPasscodes,
};
pub use pool::{
    LockerClass, LockerGuard, LockerPool, LockerSnapshot, LockerSpec, LockerStatus, Placement,
};
pub use shard::ShardedMap;
pub use ticket::{Ticket, TicketStore};
