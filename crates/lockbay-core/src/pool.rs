//! Locker Pool
//!
//! Source of truth for locker occupancy and capacity.
//!
//! ## Design
//!
//! - One mutex per locker: checks and transitions on a locker happen under
//!   its own lock, so two placements racing for the same locker serialize and
//!   placements into unrelated lockers never contend.
//! - Derived status: a locker's status is computed from its contents and the
//!   out-of-service flag on every read, so it cannot drift from them.
//! - Customer index: the customer → lockers map is updated only by
//!   [`LockerGuard::place`] and [`LockerGuard::clear`], inside the locker's
//!   critical section. Lock order is always locker, then index shard.
//!
//! ## Combination table
//!
//! | Locker            | Package              | Result            |
//! |-------------------|----------------------|-------------------|
//! | `Empty`           | `Small`              | `HoldingOneSmall` |
//! | `Empty`           | `Large`              | `Full`            |
//! | `HoldingOneSmall` | `Small`, same owner  | `Full`            |
//! | anything else     |                      | error             |

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::{
    error::PoolError,
    ids::{CustomerId, LockerId, PackageId},
    package::{PackageInfo, PackageSize},
    passcode::Passcode,
    shard::ShardedMap,
};

/// Physical capacity class of a locker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockerClass {
    /// One large package, or two small packages of one customer.
    #[default]
    Standard,
    /// Small packages only, at most two of one customer.
    Compact,
}

impl LockerClass {
    /// Whether a package of `size` physically fits this class.
    pub fn fits(self, size: PackageSize) -> bool {
        !(self == Self::Compact && size == PackageSize::Large)
    }
}

/// Occupancy status, derived from a locker's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockerStatus {
    /// No packages, no passcode.
    Empty,
    /// One small package; a second from the same customer still fits.
    HoldingOneSmall,
    /// One large or two small packages.
    Full,
    /// Unavailable for placement.
    OutOfService,
}

/// One locker in a pool layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockerSpec {
    /// Locker identifier.
    pub id: LockerId,
    /// Capacity class.
    pub class: LockerClass,
}

impl LockerSpec {
    /// Describe a locker.
    pub fn new(id: LockerId, class: LockerClass) -> Self {
        Self { id, class }
    }
}

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Locker the package went into.
    pub locker_id: LockerId,
    /// Passcode now guarding the locker.
    pub passcode: Passcode,
    /// Locker status after the placement.
    pub status: LockerStatus,
    /// True when the package joined a package already in the locker and the
    /// existing passcode was reused.
    pub consolidated: bool,
}

/// Read-only view of a locker. Never exposes the passcode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockerSnapshot {
    /// Locker identifier.
    pub id: LockerId,
    /// Capacity class.
    pub class: LockerClass,
    /// Derived status.
    pub status: LockerStatus,
    /// Contained packages in placement order.
    pub packages: Vec<PackageId>,
    /// Whether a passcode is currently assigned.
    pub assigned: bool,
}

#[derive(Debug)]
struct LockerSlot {
    id: LockerId,
    class: LockerClass,
    contents: Vec<PackageInfo>,
    passcode: Option<Passcode>,
    out_of_service: bool,
}

impl LockerSlot {
    fn new(spec: LockerSpec) -> Self {
        Self {
            id: spec.id,
            class: spec.class,
            contents: Vec::new(),
            passcode: None,
            out_of_service: false,
        }
    }

    fn status(&self) -> LockerStatus {
        if self.out_of_service {
            return LockerStatus::OutOfService;
        }
        match self.contents.as_slice() {
            [] => LockerStatus::Empty,
            [only] if only.size == PackageSize::Small => LockerStatus::HoldingOneSmall,
            _ => LockerStatus::Full,
        }
    }

    fn check(&self, package: &PackageInfo) -> Result<(), PoolError> {
        match self.status() {
            LockerStatus::Full | LockerStatus::OutOfService => Err(PoolError::Occupied(self.id)),
            LockerStatus::HoldingOneSmall => {
                let holder = self.contents.first().map_or(package.customer_id, |p| p.customer_id);
                if holder != package.customer_id {
                    return Err(PoolError::CustomerMismatch {
                        locker_id: self.id,
                        holder,
                        requester: package.customer_id,
                    });
                }
                if package.size == PackageSize::Large {
                    return Err(self.size_mismatch(package));
                }
                Ok(())
            },
            LockerStatus::Empty => {
                if self.class.fits(package.size) {
                    Ok(())
                } else {
                    Err(self.size_mismatch(package))
                }
            },
        }
    }

    fn size_mismatch(&self, package: &PackageInfo) -> PoolError {
        PoolError::SizeMismatch { locker_id: self.id, package_id: package.id }
    }

    fn snapshot(&self) -> LockerSnapshot {
        LockerSnapshot {
            id: self.id,
            class: self.class,
            status: self.status(),
            packages: self.contents.iter().map(|p| p.id).collect(),
            assigned: self.passcode.is_some(),
        }
    }
}

/// Exclusive access to one locker.
///
/// Holding the guard keeps every other placement, clear and pickup on this
/// locker waiting, which lets callers extend the critical section over work
/// that must be atomic with the locker transition (issuing tickets, arming
/// timers).
pub struct LockerGuard<'a> {
    slot: MutexGuard<'a, LockerSlot>,
    customers: &'a ShardedMap<BTreeSet<LockerId>>,
}

impl LockerGuard<'_> {
    /// Locker identifier.
    pub fn id(&self) -> LockerId {
        self.slot.id
    }

    /// Current derived status.
    pub fn status(&self) -> LockerStatus {
        self.slot.status()
    }

    /// Current passcode, present iff the locker holds packages.
    pub fn passcode(&self) -> Option<&Passcode> {
        self.slot.passcode.as_ref()
    }

    /// Check whether `package` could be placed right now.
    pub fn can_accept(&self, package: &PackageInfo) -> Result<(), PoolError> {
        self.slot.check(package)
    }

    /// Place `package`, minting a passcode with `mint` only if the locker
    /// was empty.
    ///
    /// # Errors
    ///
    /// Same as [`LockerGuard::can_accept`]; nothing changes on error.
    pub fn place(
        &mut self,
        package: &PackageInfo,
        mint: impl FnOnce() -> Passcode,
    ) -> Result<Placement, PoolError> {
        self.slot.check(package)?;

        let consolidated = self.slot.passcode.is_some();
        let passcode = self.slot.passcode.get_or_insert_with(mint).clone();
        self.slot.contents.push(*package);

        let locker_id = self.slot.id;
        let customer = package.customer_id;
        self.customers.with(customer, |index| {
            index.entry(customer).or_default().insert(locker_id);
        });

        Ok(Placement { locker_id, passcode, status: self.slot.status(), consolidated })
    }

    /// Remove every package and the passcode, returning what was inside.
    ///
    /// Clearing an empty locker is a no-op.
    pub fn clear(&mut self) -> Vec<PackageInfo> {
        let removed = std::mem::take(&mut self.slot.contents);
        self.slot.passcode = None;

        let locker_id = self.slot.id;
        let owners: BTreeSet<CustomerId> = removed.iter().map(|p| p.customer_id).collect();
        for customer in owners {
            self.customers.with(customer, |index| {
                if let Some(lockers) = index.get_mut(&customer) {
                    lockers.remove(&locker_id);
                    if lockers.is_empty() {
                        index.remove(&customer);
                    }
                }
            });
        }

        removed
    }

    /// Take the locker out of service or return it.
    ///
    /// # Errors
    ///
    /// `PoolError::Occupied` when taking a locker that still holds packages
    /// out of service.
    pub fn set_out_of_service(&mut self, out_of_service: bool) -> Result<(), PoolError> {
        if out_of_service && !self.slot.contents.is_empty() {
            return Err(PoolError::Occupied(self.slot.id));
        }
        self.slot.out_of_service = out_of_service;
        Ok(())
    }

    /// Read-only view.
    pub fn snapshot(&self) -> LockerSnapshot {
        self.slot.snapshot()
    }
}

impl std::fmt::Debug for LockerGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockerGuard")
            .field("id", &self.slot.id)
            .field("status", &self.slot.status())
            .finish()
    }
}

/// Every locker in the bank, each behind its own lock.
///
/// The set of lockers is fixed at construction; only their contents change.
pub struct LockerPool {
    lockers: BTreeMap<LockerId, Mutex<LockerSlot>>,
    customers: ShardedMap<BTreeSet<LockerId>>,
}

impl LockerPool {
    /// Build a pool from a layout. A repeated ID keeps the last spec.
    pub fn new(layout: impl IntoIterator<Item = LockerSpec>) -> Self {
        let lockers =
            layout.into_iter().map(|spec| (spec.id, Mutex::new(LockerSlot::new(spec)))).collect();
        Self { lockers, customers: ShardedMap::new() }
    }

    /// `count` lockers of one class with IDs `1..=count`.
    pub fn uniform(count: u64, class: LockerClass) -> Self {
        Self::new((1..=count).map(|id| LockerSpec::new(id, class)))
    }

    /// Number of lockers.
    pub fn len(&self) -> usize {
        self.lockers.len()
    }

    /// Whether the pool has no lockers.
    pub fn is_empty(&self) -> bool {
        self.lockers.is_empty()
    }

    /// Lock a locker for exclusive access.
    ///
    /// # Errors
    ///
    /// `PoolError::NotFound` if the locker is not part of the pool.
    pub fn lock(&self, locker_id: LockerId) -> Result<LockerGuard<'_>, PoolError> {
        let slot = self.lockers.get(&locker_id).ok_or(PoolError::NotFound(locker_id))?;
        Ok(LockerGuard { slot: slot.lock(), customers: &self.customers })
    }

    /// Lockers that could take a package of `size`, in ascending ID order:
    /// empty lockers of a fitting class, plus lockers holding one small
    /// package when `size` is small. Ownership is not considered here.
    pub fn list_available(&self, size: PackageSize) -> Vec<LockerId> {
        self.lockers
            .iter()
            .filter(|(_, slot)| {
                let slot = slot.lock();
                match slot.status() {
                    LockerStatus::Empty => slot.class.fits(size),
                    LockerStatus::HoldingOneSmall => size == PackageSize::Small,
                    LockerStatus::Full | LockerStatus::OutOfService => false,
                }
            })
            .map(|(&id, _)| id)
            .collect()
    }

    /// Check whether `package` could be placed into the locker right now.
    pub fn can_accept(&self, locker_id: LockerId, package: &PackageInfo) -> Result<(), PoolError> {
        self.lock(locker_id)?.can_accept(package)
    }

    /// Check and place atomically. See [`LockerGuard::place`].
    pub fn place(
        &self,
        locker_id: LockerId,
        package: &PackageInfo,
        mint: impl FnOnce() -> Passcode,
    ) -> Result<Placement, PoolError> {
        self.lock(locker_id)?.place(package, mint)
    }

    /// Empty a locker, returning its former contents.
    pub fn clear(&self, locker_id: LockerId) -> Result<Vec<PackageInfo>, PoolError> {
        Ok(self.lock(locker_id)?.clear())
    }

    /// Current derived status of a locker.
    pub fn status(&self, locker_id: LockerId) -> Result<LockerStatus, PoolError> {
        Ok(self.lock(locker_id)?.status())
    }

    /// Read-only view of one locker.
    pub fn snapshot(&self, locker_id: LockerId) -> Result<LockerSnapshot, PoolError> {
        Ok(self.lock(locker_id)?.snapshot())
    }

    /// Read-only views of every locker, in ascending ID order.
    pub fn snapshots(&self) -> Vec<LockerSnapshot> {
        self.lockers.values().map(|slot| slot.lock().snapshot()).collect()
    }

    /// Take a locker out of service or return it.
    pub fn set_out_of_service(
        &self,
        locker_id: LockerId,
        out_of_service: bool,
    ) -> Result<(), PoolError> {
        self.lock(locker_id)?.set_out_of_service(out_of_service)
    }

    /// Lockers currently holding packages of `customer`, ascending.
    pub fn lockers_of(&self, customer: CustomerId) -> Vec<LockerId> {
        self.customers.with(customer, |index| {
            index
                .get(&customer)
                .map(|lockers| lockers.iter().copied().collect())
                .unwrap_or_default()
        })
    }
}

impl std::fmt::Debug for LockerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockerPool").field("locker_count", &self.lockers.len()).finish()
    }
}
