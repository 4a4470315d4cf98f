//! Package descriptions and the package source collaborator.

use serde::{Deserialize, Serialize};

use crate::{
    error::SourceError,
    ids::{CustomerId, PackageId},
    shard::ShardedMap,
};

/// Physical size class of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageSize {
    /// Two of these from the same customer share one locker.
    Small,
    /// Occupies a whole locker on its own.
    Large,
}

/// Lifecycle of a package inside the locker bank.
///
/// `Delivering` is the in-transit state; `PickedUp` and `Expired` are
/// terminal and never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageStatus {
    /// Known to the source, assignment pending or in flight.
    Delivering,
    /// Sitting in a locker with a live ticket.
    Stored,
    /// Released to the customer with the correct passcode.
    PickedUp,
    /// Evicted after the dwell time elapsed.
    Expired,
}

impl PackageStatus {
    /// Whether the package has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PickedUp | Self::Expired)
    }
}

/// What the allocator needs to know about a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    /// Package identifier.
    pub id: PackageId,
    /// Owning customer.
    pub customer_id: CustomerId,
    /// Size class.
    pub size: PackageSize,
}

impl PackageInfo {
    /// Describe a package.
    pub fn new(id: PackageId, customer_id: CustomerId, size: PackageSize) -> Self {
        Self { id, customer_id, size }
    }
}

/// Resolves package identifiers to their owner and size.
///
/// Implemented by whatever system tracks inbound deliveries.
pub trait PackageSource: Send + Sync {
    /// Look up a package.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::NotFound` if the package is unknown.
    fn package(&self, id: PackageId) -> Result<PackageInfo, SourceError>;
}

/// In-memory package source for tests, simulation and the load driver.
#[derive(Debug, Default)]
pub struct MemoryPackageSource {
    packages: ShardedMap<PackageInfo>,
}

impl MemoryPackageSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a package.
    pub fn register(&self, info: PackageInfo) {
        self.packages.insert(info.id, info);
    }

    /// Number of registered packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether no package is registered.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl FromIterator<PackageInfo> for MemoryPackageSource {
    fn from_iter<I: IntoIterator<Item = PackageInfo>>(iter: I) -> Self {
        let source = Self::new();
        for info in iter {
            source.register(info);
        }
        source
    }
}

impl PackageSource for MemoryPackageSource {
    fn package(&self, id: PackageId) -> Result<PackageInfo, SourceError> {
        self.packages.get(id).ok_or(SourceError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!PackageStatus::Delivering.is_terminal());
        assert!(!PackageStatus::Stored.is_terminal());
        assert!(PackageStatus::PickedUp.is_terminal());
        assert!(PackageStatus::Expired.is_terminal());
    }

    #[test]
    fn memory_source_resolves_registered_packages() {
        let source: MemoryPackageSource =
            [PackageInfo::new(1, 7, PackageSize::Small)].into_iter().collect();

        assert_eq!(source.package(1), Ok(PackageInfo::new(1, 7, PackageSize::Small)));
        assert_eq!(source.package(2), Err(SourceError::NotFound(2)));
    }
}
