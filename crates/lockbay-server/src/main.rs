//! Lockbay load driver binary.
//!
//! Builds a locker bank and a synthetic package catalog, then runs the
//! allocation manager against it: concurrent assignments, a share of
//! pickups, and expiry for the rest.
//!
//! # Usage
//!
//! ```bash
//! # Default run: 16 standard + 8 compact lockers, 40 packages, 2 s dwell
//! lockbay-server
//!
//! # Busier bank, longer dwell, verbose logs
//! lockbay-server --packages 500 --standard-lockers 120 --dwell-ms 5000 --log-level debug
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use lockbay_core::{LockerPool, MIN_PASSCODE_LENGTH};
use lockbay_server::{
    AllocationConfig, AllocationManager, ServerError, SystemEnv, TracingSink, WorkloadConfig,
    run_workload,
};
use tokio::runtime::Handle;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Lockbay locker allocation load driver
#[derive(Parser, Debug)]
#[command(name = "lockbay-server")]
#[command(about = "Drive a synthetic workload through the Lockbay allocation manager")]
#[command(version)]
struct Args {
    /// Standard lockers (one large or two small packages)
    #[arg(long, default_value = "16")]
    standard_lockers: u64,

    /// Compact lockers (small packages only)
    #[arg(long, default_value = "8")]
    compact_lockers: u64,

    /// Packages in the synthetic catalog
    #[arg(short, long, default_value = "40")]
    packages: u64,

    /// Distinct customers
    #[arg(long, default_value = "12")]
    customers: u64,

    /// Probability a package is large
    #[arg(long, default_value = "0.25")]
    large_ratio: f64,

    /// Probability an occupied locker is picked up
    #[arg(long, default_value = "0.5")]
    pickup_ratio: f64,

    /// Probability a pickup starts with a wrong passcode
    #[arg(long, default_value = "0.2")]
    wrong_passcode_ratio: f64,

    /// Dwell time in milliseconds
    #[arg(long, default_value = "2000")]
    dwell_ms: u64,

    /// Passcode length
    #[arg(long, default_value = "8")]
    passcode_length: usize,

    /// Concurrent assignment tasks
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Report immediately instead of waiting for expiry
    #[arg(long)]
    no_wait: bool,

    /// Catalog and pickup RNG seed
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Log ticket events through tracing
    #[arg(long)]
    trace_events: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.passcode_length < MIN_PASSCODE_LENGTH {
        let msg = format!("passcode length must be at least {MIN_PASSCODE_LENGTH}");
        return Err(ServerError::Config(msg).into());
    }

    let workload = WorkloadConfig {
        standard_lockers: args.standard_lockers,
        compact_lockers: args.compact_lockers,
        packages: args.packages,
        customers: args.customers,
        large_ratio: args.large_ratio,
        pickup_ratio: args.pickup_ratio,
        wrong_passcode_ratio: args.wrong_passcode_ratio,
        workers: args.workers,
        wait_for_expiry: !args.no_wait,
        seed: args.seed,
    };
    workload.validate()?;

    let config = AllocationConfig {
        dwell_time: Duration::from_millis(args.dwell_ms),
        passcode_length: args.passcode_length,
    };

    tracing::info!("Lockbay load driver starting");
    tracing::info!(
        lockers = args.standard_lockers + args.compact_lockers,
        packages = args.packages,
        dwell = ?config.dwell_time,
        "building locker bank"
    );

    let env = SystemEnv::new();
    let mut builder = AllocationManager::builder(
        env.clone(),
        LockerPool::new(workload.layout()),
        Arc::new(workload.catalog()),
    )
    .config(config);
    if args.trace_events {
        builder = builder.notifier(Arc::new(TracingSink));
    }
    let manager = builder.build(Handle::current());

    let report = run_workload(Arc::clone(&manager), &env, &workload).await?;
    manager.shutdown();

    tracing::info!(
        assigned = report.assigned,
        no_locker = report.no_locker,
        shared_lockers = report.shared_lockers,
        wrong_passcodes = report.wrong_passcodes,
        picked_up = report.picked_up,
        expired = report.expired,
        stored = report.stored,
        "workload complete"
    );

    Ok(())
}
