//! Synthetic workload driver.
//!
//! Builds a seeded package catalog, assigns every package from concurrent
//! tasks, picks a share of the lockers up (some after a wrong passcode) and
//! lets the rest expire. Used by the `lockbay-server` binary and by tests
//! that want a busy manager.

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use lockbay_core::{
    Environment, LockerClass, LockerSpec, MemoryPackageSource, PackageInfo, PackageSize,
    PackageStatus, Ticket,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinSet;

use crate::{
    error::ServerError,
    manager::{AllocationError, AllocationManager},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SETTLE_GRACE: Duration = Duration::from_secs(1);

/// Shape of a synthetic run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadConfig {
    /// Standard lockers, IDs `1..=standard_lockers`
    pub standard_lockers: u64,
    /// Compact lockers, numbered after the standard ones
    pub compact_lockers: u64,
    /// Packages in the catalog, IDs `1..=packages`
    pub packages: u64,
    /// Distinct customers packages are spread over
    pub customers: u64,
    /// Probability a package is large
    pub large_ratio: f64,
    /// Probability an occupied locker is picked up before expiry
    pub pickup_ratio: f64,
    /// Probability a pickup is preceded by a wrong passcode
    pub wrong_passcode_ratio: f64,
    /// Concurrent assignment tasks
    pub workers: usize,
    /// Wait for unclaimed packages to expire before reporting
    pub wait_for_expiry: bool,
    /// RNG seed for the catalog and pickup choices
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            standard_lockers: 16,
            compact_lockers: 8,
            packages: 40,
            customers: 12,
            large_ratio: 0.25,
            pickup_ratio: 0.5,
            wrong_passcode_ratio: 0.2,
            workers: 4,
            wait_for_expiry: true,
            seed: 0,
        }
    }
}

impl WorkloadConfig {
    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.standard_lockers + self.compact_lockers == 0 {
            return Err(ServerError::Config("at least one locker is required".to_string()));
        }
        if self.customers == 0 {
            return Err(ServerError::Config("at least one customer is required".to_string()));
        }
        if self.workers == 0 {
            return Err(ServerError::Config("at least one worker is required".to_string()));
        }
        for (name, ratio) in [
            ("large_ratio", self.large_ratio),
            ("pickup_ratio", self.pickup_ratio),
            ("wrong_passcode_ratio", self.wrong_passcode_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(ServerError::Config(format!("{name} must be within 0..=1")));
            }
        }
        Ok(())
    }

    /// Locker layout: standard lockers first, then compact ones.
    pub fn layout(&self) -> Vec<LockerSpec> {
        let standard =
            (1..=self.standard_lockers).map(|id| LockerSpec::new(id, LockerClass::Standard));
        let compact = (1..=self.compact_lockers)
            .map(|n| LockerSpec::new(self.standard_lockers + n, LockerClass::Compact));
        standard.chain(compact).collect()
    }

    /// Seeded package catalog.
    pub fn catalog(&self) -> MemoryPackageSource {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let customers = self.customers.max(1);
        (1..=self.packages)
            .map(|id| {
                let customer = rng.gen_range(0..customers);
                let size = if rng.gen_bool(self.large_ratio) {
                    PackageSize::Large
                } else {
                    PackageSize::Small
                };
                PackageInfo::new(id, customer, size)
            })
            .collect()
    }
}

/// Outcome counts of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    /// Packages placed into a locker
    pub assigned: u64,
    /// Packages turned away with `NoLockerAvailable`
    pub no_locker: u64,
    /// Lockers holding two packages right after assignment
    pub shared_lockers: u64,
    /// Wrong passcodes rejected
    pub wrong_passcodes: u64,
    /// Packages released by pickup
    pub picked_up: u64,
    /// Packages evicted by expiry
    pub expired: u64,
    /// Packages still stored when the report was taken
    pub stored: u64,
}

#[derive(Default)]
struct AssignBatch {
    tickets: Vec<Ticket>,
    no_locker: u64,
}

/// Drive `config` against `manager`.
///
/// The manager's package source must serve [`WorkloadConfig::catalog`].
///
/// # Errors
///
/// `Config` for an invalid config, `Allocation` for any allocation error
/// other than the expected `NoLockerAvailable`, `WrongPasscode` and
/// `NotAssigned` outcomes, `Runtime` if a worker task fails.
pub async fn run_workload<E: Environment>(
    manager: Arc<AllocationManager<E>>,
    env: &E,
    config: &WorkloadConfig,
) -> Result<WorkloadReport, ServerError> {
    config.validate()?;

    let ids: Vec<u64> = (1..=config.packages).collect();
    let chunk = ids.len().div_ceil(config.workers).max(1);

    let mut workers = JoinSet::new();
    for batch in ids.chunks(chunk).map(<[u64]>::to_vec) {
        let manager = Arc::clone(&manager);
        workers.spawn(async move {
            let mut out = AssignBatch::default();
            for package_id in batch {
                match manager.assign_package(package_id) {
                    Ok(ticket) => out.tickets.push(ticket),
                    Err(AllocationError::NoLockerAvailable(_)) => out.no_locker += 1,
                    Err(err) => return Err(err),
                }
                tokio::task::yield_now().await;
            }
            Ok(out)
        });
    }

    let mut report = WorkloadReport::default();
    let mut tickets = Vec::new();
    while let Some(joined) = workers.join_next().await {
        let batch = joined??;
        report.no_locker += batch.no_locker;
        tickets.extend(batch.tickets);
    }
    report.assigned = tickets.len() as u64;
    report.shared_lockers =
        manager.snapshots().iter().filter(|snapshot| snapshot.packages.len() == 2).count() as u64;
    tracing::info!(
        assigned = report.assigned,
        no_locker = report.no_locker,
        "assignment phase done"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(1));
    let mut opened = BTreeSet::new();
    tickets.sort_by_key(|ticket| ticket.id);
    for ticket in &tickets {
        if opened.contains(&ticket.locker_id) || !rng.gen_bool(config.pickup_ratio) {
            continue;
        }
        opened.insert(ticket.locker_id);

        if rng.gen_bool(config.wrong_passcode_ratio) {
            let wrong = format!("{}!", ticket.passcode.as_str());
            match manager.unlock_locker(ticket.locker_id, &wrong) {
                Err(AllocationError::WrongPasscode(_)) => report.wrong_passcodes += 1,
                Err(AllocationError::NotAssigned(_)) => continue,
                Ok(receipt) => {
                    tracing::error!(locker_id = receipt.locker_id, "wrong passcode accepted");
                },
                Err(err) => return Err(err.into()),
            }
        }

        match manager.unlock_locker(ticket.locker_id, ticket.passcode.as_str()) {
            Ok(_) | Err(AllocationError::NotAssigned(_)) => {},
            Err(err) => return Err(err.into()),
        }
    }
    tracing::info!(opened = opened.len(), "pickup phase done");

    if config.wait_for_expiry {
        let deadline =
            manager.dwell_time().checked_add(SETTLE_GRACE).and_then(|d| env.now().checked_add(d));
        match deadline {
            Some(deadline) => {
                while manager.active_tickets() > 0 && env.now() < deadline {
                    env.sleep(POLL_INTERVAL).await;
                }
            },
            None => tracing::warn!("dwell time too large to wait for, skipping expiry phase"),
        }
    }

    for package_id in 1..=config.packages {
        match manager.package_status(package_id) {
            Some(PackageStatus::PickedUp) => report.picked_up += 1,
            Some(PackageStatus::Expired) => report.expired += 1,
            Some(PackageStatus::Stored) => report.stored += 1,
            Some(PackageStatus::Delivering) | None => {},
        }
    }

    Ok(report)
}
