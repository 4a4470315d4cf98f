//! Model world - the locker bank as a plain data structure.
//!
//! The world is the oracle against which the real allocation manager is
//! verified. It has no locks, no timers and no passcodes: time is a counter,
//! expiry is a scan, and "correct passcode" is a boolean on the operation.

use std::collections::BTreeMap;

use lockbay_core::{
    LockerClass, LockerId, LockerSpec, LockerStatus, PackageId, PackageInfo, PackageSize,
    PackageStatus,
};

use super::{
    locker::{ModelLocker, ModelPackage},
    operation::{ModelLockerId, ModelPackageId, Operation, OperationError, OperationResult},
};

/// Packages in the model catalog.
pub const MODEL_PACKAGES: u8 = 12;

/// Dwell time of every placement, in milliseconds.
///
/// Time only moves in whole seconds (plus [`SETTLE_MS`]), so half-second
/// deadlines never coincide with the clock.
pub const MODEL_DWELL_MS: u64 = 2_500;

/// Extra milliseconds the real world sleeps after each advance to let due
/// watches run. The model adds the same amount.
pub const SETTLE_MS: u64 = 1;

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Per-locker ID, status and contents in placement order.
    pub lockers: Vec<(LockerId, LockerStatus, Vec<PackageId>)>,
    /// Ledger status of every catalog package, by index.
    pub packages: Vec<Option<PackageStatus>>,
    /// Number of live tickets.
    pub active_tickets: usize,
}

/// Model world - the reference implementation.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    lockers: BTreeMap<LockerId, ModelLocker>,
    ledger: BTreeMap<PackageId, PackageStatus>,
    now_ms: u64,
}

impl ModelWorld {
    /// Locker layout shared by the model and the real system: three
    /// standard lockers and one compact.
    pub fn layout() -> Vec<LockerSpec> {
        vec![
            LockerSpec::new(1, LockerClass::Standard),
            LockerSpec::new(2, LockerClass::Standard),
            LockerSpec::new(3, LockerClass::Standard),
            LockerSpec::new(4, LockerClass::Compact),
        ]
    }

    /// Package catalog shared by the model and the real system.
    ///
    /// Package index `p` has ID `p + 1`, belongs to customer `p % 3` and is
    /// large when `p % 4 == 0`.
    pub fn catalog() -> Vec<PackageInfo> {
        (0..MODEL_PACKAGES).map(Self::package).collect()
    }

    /// Real package ID of a model package index.
    pub fn package_id(package: ModelPackageId) -> PackageId {
        u64::from(package) + 1
    }

    fn package(index: ModelPackageId) -> PackageInfo {
        let size = if index % 4 == 0 { PackageSize::Large } else { PackageSize::Small };
        PackageInfo::new(Self::package_id(index), u64::from(index % 3), size)
    }

    /// Fresh world at time zero.
    pub fn new() -> Self {
        let lockers = Self::layout()
            .into_iter()
            .map(|spec| (spec.id, ModelLocker::new(spec.class)))
            .collect();
        Self { lockers, ledger: BTreeMap::new(), now_ms: 0 }
    }

    /// Apply an operation and return the result.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        match op {
            Operation::Assign { package } => self.apply_assign(*package),
            Operation::Unlock { locker, correct } => self.apply_unlock(*locker, *correct),
            Operation::SetOutOfService { locker, out_of_service } => {
                self.apply_set_out_of_service(*locker, *out_of_service)
            },
            Operation::AdvanceTime { secs } => {
                self.now_ms += u64::from(*secs) * 1_000 + SETTLE_MS;
                self.expire_due();
                OperationResult::Ok
            },
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let lockers = self
            .lockers
            .iter()
            .map(|(&id, locker)| {
                (id, locker.status(), locker.contents().iter().map(|p| p.id).collect())
            })
            .collect();
        let packages = (0..MODEL_PACKAGES)
            .map(|index| self.ledger.get(&Self::package_id(index)).copied())
            .collect();
        let active_tickets = self.lockers.values().map(|locker| locker.contents().len()).sum();

        ObservableState { lockers, packages, active_tickets }
    }

    fn apply_assign(&mut self, package: ModelPackageId) -> OperationResult {
        if package >= MODEL_PACKAGES {
            return OperationResult::Error(OperationError::PackageNotFound);
        }
        let info = Self::package(package);
        if self.ledger.contains_key(&info.id) {
            return OperationResult::Error(OperationError::AlreadyAssigned);
        }

        let target = self
            .lockers
            .iter()
            .find(|(_, locker)| locker.can_consolidate(info.customer_id, info.size))
            .or_else(|| self.lockers.iter().find(|(_, locker)| locker.can_take_fresh(info.size)))
            .map(|(&id, _)| id);

        let Some(locker_id) = target else {
            return OperationResult::Error(OperationError::NoLockerAvailable);
        };

        if let Some(locker) = self.lockers.get_mut(&locker_id) {
            locker.place(ModelPackage {
                id: info.id,
                customer: info.customer_id,
                size: info.size,
                deadline_ms: self.now_ms + MODEL_DWELL_MS,
            });
        }
        self.ledger.insert(info.id, PackageStatus::Stored);
        OperationResult::Assigned(locker_id)
    }

    fn apply_unlock(&mut self, locker: ModelLockerId, correct: bool) -> OperationResult {
        let Some(model) = self.lockers.get_mut(&u64::from(locker)) else {
            return OperationResult::Error(OperationError::LockerNotFound);
        };
        if model.contents().is_empty() {
            return OperationResult::Error(OperationError::NotAssigned);
        }
        if !correct {
            return OperationResult::Error(OperationError::WrongPasscode);
        }

        let released = model.clear();
        for package in &released {
            self.ledger.insert(package.id, PackageStatus::PickedUp);
        }
        OperationResult::PickedUp(released.iter().map(|p| p.id).collect())
    }

    fn apply_set_out_of_service(
        &mut self,
        locker: ModelLockerId,
        out_of_service: bool,
    ) -> OperationResult {
        let Some(model) = self.lockers.get_mut(&u64::from(locker)) else {
            return OperationResult::Error(OperationError::LockerNotFound);
        };
        if model.set_out_of_service(out_of_service) {
            OperationResult::Ok
        } else {
            OperationResult::Error(OperationError::Occupied)
        }
    }

    // Any due ticket evicts its whole locker.
    fn expire_due(&mut self) {
        let now_ms = self.now_ms;
        for locker in self.lockers.values_mut().filter(|locker| locker.is_due(now_ms)) {
            for package in locker.clear() {
                self.ledger.insert(package.id, PackageStatus::Expired);
            }
        }
    }
}

impl Default for ModelWorld {
    fn default() -> Self {
        Self::new()
    }
}
