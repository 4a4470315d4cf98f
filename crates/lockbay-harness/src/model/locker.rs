//! Model locker - the obviously-correct version of one locker.

use lockbay_core::{CustomerId, LockerClass, LockerStatus, PackageId, PackageSize};

/// One package inside a model locker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPackage {
    /// Real package ID.
    pub id: PackageId,
    /// Owning customer.
    pub customer: CustomerId,
    /// Size class.
    pub size: PackageSize,
    /// Expiry deadline in model milliseconds.
    pub deadline_ms: u64,
}

/// Reference locker.
#[derive(Debug, Clone)]
pub struct ModelLocker {
    class: LockerClass,
    contents: Vec<ModelPackage>,
    out_of_service: bool,
}

impl ModelLocker {
    /// Empty locker of `class`.
    pub fn new(class: LockerClass) -> Self {
        Self { class, contents: Vec::new(), out_of_service: false }
    }

    /// Contained packages in placement order.
    pub fn contents(&self) -> &[ModelPackage] {
        &self.contents
    }

    /// Status derived from contents.
    pub fn status(&self) -> LockerStatus {
        if self.out_of_service {
            return LockerStatus::OutOfService;
        }
        match self.contents.as_slice() {
            [] => LockerStatus::Empty,
            [only] if only.size == PackageSize::Small => LockerStatus::HoldingOneSmall,
            _ => LockerStatus::Full,
        }
    }

    /// Whether a small package of `customer` can join the one inside.
    pub fn can_consolidate(&self, customer: CustomerId, size: PackageSize) -> bool {
        size == PackageSize::Small
            && self.status() == LockerStatus::HoldingOneSmall
            && self.contents.iter().all(|p| p.customer == customer)
    }

    /// Whether the locker is empty, in service and fits `size`.
    pub fn can_take_fresh(&self, size: PackageSize) -> bool {
        self.status() == LockerStatus::Empty && self.class.fits(size)
    }

    /// Add a package.
    pub fn place(&mut self, package: ModelPackage) {
        self.contents.push(package);
    }

    /// Remove everything, returning it.
    pub fn clear(&mut self) -> Vec<ModelPackage> {
        std::mem::take(&mut self.contents)
    }

    /// Whether any package's deadline has passed at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.contents.iter().any(|p| p.deadline_ms <= now_ms)
    }

    /// Change the service state. Returns false if refused.
    pub fn set_out_of_service(&mut self, out_of_service: bool) -> bool {
        if out_of_service && !self.contents.is_empty() {
            return false;
        }
        self.out_of_service = out_of_service;
        true
    }
}
