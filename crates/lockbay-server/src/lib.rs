//! Lockbay locker service.
//!
//! This crate wires the core primitives into a running allocation service:
//! - Tokio tasks for per-ticket expiration watches
//! - System time and cryptographic RNG
//! - A synthetic workload driver for exercising the manager
//!
//! ## Architecture
//!
//! ```text
//! lockbay-server
//!   ├─ SystemEnv             (production Environment impl)
//!   ├─ AllocationManager     (assign, unlock, expire)
//!   │    ├─ LockerPool       (per-locker occupancy)
//!   │    ├─ TicketStore      (active tickets)
//!   │    └─ ExpirationSupervisor (cancellable dwell timers)
//!   ├─ NotificationSink      (fire-and-forget ticket events)
//!   └─ run_workload          (load driver used by the binary)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod manager;
mod notify;
mod supervisor;
mod system_env;
mod workload;

pub use config::{AllocationConfig, DEFAULT_DWELL_TIME};
pub use error::ServerError;
pub use manager::{
    AllocationError, AllocationManager, AllocationManagerBuilder, ExpireOutcome, PickupReceipt,
};
pub use notify::{NoopSink, NotificationKind, NotificationSink, NotifyError, TracingSink};
pub use supervisor::{CancelOutcome, ExpirationSupervisor, ExpiryHandler};
pub use system_env::SystemEnv;
pub use workload::{WorkloadConfig, WorkloadReport, run_workload};
