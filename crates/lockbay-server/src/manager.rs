//! Locker Allocation Manager
//!
//! Orchestrates package placement, pickup and expiry across the locker pool,
//! the ticket store and the expiration supervisor.
//!
//! ## Responsibilities
//!
//! - Assignment: resolve the package, prefer consolidating into a locker the
//!   customer already holds, otherwise take the first empty locker
//! - Pickup: verify the passcode and release everything in the locker
//! - Expiry: evict the locker when a ticket's dwell time elapses
//! - Ledger: track each package's lifecycle status
//!
//! ## Design
//!
//! - Locker guard as critical section: placement, ticket issuance and watch
//!   arming happen while the locker is locked, as do ticket removal, watch
//!   cancellation and clearing on release. A concurrent pickup or expiry on
//!   the same locker therefore always sees a consistent locker/ticket pair.
//! - Ticket presence is the arbitration point between pickup and expiry:
//!   expiry re-checks it under the locker lock, so at most one of them ever
//!   releases a given package.
//! - Notifications are sent after the lock is dropped and never roll back
//!   state.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use lockbay_core::{
    CustomerId, Environment, IdGenerator, LockerGuard, LockerId, LockerPool, LockerSnapshot,
    LockerStatus, PackageId, PackageInfo, PackageSize, PackageSource, PackageStatus,
    PasscodeGenerator, PoolError, RandomPasscodes, SequentialIds, ShardedMap, SourceError, Ticket,
    TicketId, TicketStore,
};
use tokio::runtime::Handle;

use crate::{
    config::AllocationConfig,
    notify::{NoopSink, NotificationKind, NotificationSink},
    supervisor::{ExpirationSupervisor, ExpiryHandler},
};

/// Errors from allocation manager operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// The package source does not know this package
    #[error("package not found: {0}")]
    PackageNotFound(PackageId),

    /// Locker is not part of the pool
    #[error("locker not found: {0}")]
    LockerNotFound(LockerId),

    /// The package source failed
    #[error("package source error: {0}")]
    Source(SourceError),

    /// Package was already assigned once (or its assignment is in flight)
    #[error("package {package_id} already assigned ({status:?})")]
    AlreadyAssigned {
        /// Package being assigned
        package_id: PackageId,
        /// Its current ledger status
        status: PackageStatus,
    },

    /// No locker can take the package right now
    #[error("no locker available for package {0}")]
    NoLockerAvailable(PackageId),

    /// Locker has no passcode (empty, or already released)
    #[error("locker {0} has no assigned passcode")]
    NotAssigned(LockerId),

    /// Passcode does not match
    #[error("wrong passcode for locker {0}")]
    WrongPasscode(LockerId),

    /// Locker pool rejected the operation
    #[error("locker pool error: {0}")]
    Pool(PoolError),
}

impl AllocationError {
    /// Whether the same call may succeed if retried later.
    ///
    /// Wrong passcodes are retryable without lockout; a full bank may free up.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoLockerAvailable(_)
            | Self::WrongPasscode(_)
            | Self::Source(SourceError::Unavailable { .. }) => true,
            Self::PackageNotFound(_)
            | Self::LockerNotFound(_)
            | Self::Source(SourceError::NotFound(_))
            | Self::AlreadyAssigned { .. }
            | Self::NotAssigned(_)
            | Self::Pool(_) => false,
        }
    }
}

impl From<PoolError> for AllocationError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::NotFound(locker_id) => Self::LockerNotFound(locker_id),
            other => Self::Pool(other),
        }
    }
}

impl From<SourceError> for AllocationError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(package_id) => Self::PackageNotFound(package_id),
            other => Self::Source(other),
        }
    }
}

/// Result of [`AllocationManager::on_expire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// The locker was evicted.
    Expired {
        /// Locker that was cleared
        locker_id: LockerId,
        /// Packages now `Expired`
        packages: Vec<PackageId>,
    },
    /// The ticket was already gone (picked up or expired earlier).
    AlreadyResolved,
}

/// What a successful pickup released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickupReceipt {
    /// Locker that was opened
    pub locker_id: LockerId,
    /// Packages now `PickedUp`, in placement order
    pub packages: Vec<PackageId>,
    /// Tickets that were cancelled, marked `cancelled`
    pub tickets: Vec<Ticket>,
}

/// Builder for [`AllocationManager`].
pub struct AllocationManagerBuilder<E: Environment> {
    env: E,
    pool: LockerPool,
    packages: Arc<dyn PackageSource>,
    config: AllocationConfig,
    passcodes: Option<Box<dyn PasscodeGenerator>>,
    notifier: Arc<dyn NotificationSink>,
    ticket_ids: Arc<dyn IdGenerator>,
}

impl<E: Environment> AllocationManagerBuilder<E> {
    /// Override the default configuration.
    #[must_use]
    pub fn config(mut self, config: AllocationConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom passcode generator instead of `RandomPasscodes`.
    #[must_use]
    pub fn passcodes(mut self, passcodes: impl PasscodeGenerator + 'static) -> Self {
        self.passcodes = Some(Box::new(passcodes));
        self
    }

    /// Send ticket events to `notifier`.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Mint ticket IDs from `ids`.
    #[must_use]
    pub fn ticket_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ticket_ids = ids;
        self
    }

    /// Build the manager. Expiration watches are spawned on `runtime`.
    pub fn build(self, runtime: Handle) -> Arc<AllocationManager<E>> {
        let passcodes = self.passcodes.unwrap_or_else(|| {
            Box::new(RandomPasscodes::new(self.env.clone(), self.config.passcode_length))
        });

        Arc::new_cyclic(|weak: &Weak<AllocationManager<E>>| {
            let handler: Weak<dyn ExpiryHandler> = weak.clone();
            AllocationManager {
                supervisor: ExpirationSupervisor::new(self.env.clone(), runtime, handler),
                config: self.config,
                env: self.env,
                pool: self.pool,
                tickets: TicketStore::new(self.ticket_ids),
                packages: self.packages,
                ledger: ShardedMap::new(),
                passcodes,
                notifier: self.notifier,
            }
        })
    }
}

/// Allocates lockers to packages and releases them on pickup or expiry.
pub struct AllocationManager<E: Environment> {
    config: AllocationConfig,
    env: E,
    pool: LockerPool,
    tickets: TicketStore,
    packages: Arc<dyn PackageSource>,
    /// Lifecycle status of every package seen by `assign_package`. Terminal
    /// entries stay until `prune_resolved`.
    ledger: ShardedMap<PackageStatus>,
    passcodes: Box<dyn PasscodeGenerator>,
    notifier: Arc<dyn NotificationSink>,
    supervisor: ExpirationSupervisor<E>,
}

impl<E: Environment> AllocationManager<E> {
    /// Start building a manager over `pool`, resolving packages via
    /// `packages`.
    pub fn builder(
        env: E,
        pool: LockerPool,
        packages: Arc<dyn PackageSource>,
    ) -> AllocationManagerBuilder<E> {
        AllocationManagerBuilder {
            env,
            pool,
            packages,
            config: AllocationConfig::default(),
            passcodes: None,
            notifier: Arc::new(NoopSink),
            ticket_ids: Arc::new(SequentialIds::new()),
        }
    }

    /// Place a package into a locker and issue its ticket.
    ///
    /// Small packages first try lockers the customer already occupies, so a
    /// second small package shares the first one's locker and passcode.
    /// Otherwise the lowest-numbered empty locker that fits is used.
    ///
    /// # Errors
    ///
    /// - `PackageNotFound` / `Source` if the package cannot be resolved
    /// - `AlreadyAssigned` if the package was seen before
    /// - `NoLockerAvailable` if no locker can take it; the package may be
    ///   assigned again later
    pub fn assign_package(&self, package_id: PackageId) -> Result<Ticket, AllocationError> {
        let package = self.packages.package(package_id)?;
        self.assign_resolved(&package)
    }

    /// Assign a batch of packages, one result per input in input order.
    ///
    /// Packages are placed grouped by customer with small packages first, so
    /// a customer's small packages pair up in one locker before their large
    /// ones claim fresh lockers. Each package succeeds or fails on its own,
    /// with the same errors as [`AllocationManager::assign_package`].
    pub fn assign_packages(
        &self,
        package_ids: &[PackageId],
    ) -> Vec<Result<Ticket, AllocationError>> {
        let mut outcomes = Vec::with_capacity(package_ids.len());
        let mut resolved = Vec::with_capacity(package_ids.len());
        for (index, &package_id) in package_ids.iter().enumerate() {
            match self.packages.package(package_id) {
                Ok(package) => resolved.push((index, package)),
                Err(err) => outcomes.push((index, Err(AllocationError::from(err)))),
            }
        }

        resolved.sort_by_key(|(index, package)| {
            (package.customer_id, package.size == PackageSize::Large, *index)
        });
        outcomes.extend(
            resolved.into_iter().map(|(index, package)| (index, self.assign_resolved(&package))),
        );
        outcomes.sort_by_key(|(index, _)| *index);

        let results: Vec<_> = outcomes.into_iter().map(|(_, result)| result).collect();
        tracing::info!(
            batch = results.len(),
            assigned = results.iter().filter(|r| r.is_ok()).count(),
            "batch assigned"
        );
        results
    }

    /// Open a locker with its passcode, releasing every package inside.
    ///
    /// # Errors
    ///
    /// - `LockerNotFound` if the locker is not part of the pool
    /// - `NotAssigned` if the locker currently has no passcode
    /// - `WrongPasscode` if `passcode` does not match; nothing changes
    pub fn unlock_locker(
        &self,
        locker_id: LockerId,
        passcode: &str,
    ) -> Result<PickupReceipt, AllocationError> {
        let mut guard = self.pool.lock(locker_id)?;

        let Some(current) = guard.passcode() else {
            return Err(AllocationError::NotAssigned(locker_id));
        };
        if !current.matches(passcode) {
            tracing::info!(locker_id, "wrong passcode presented");
            return Err(AllocationError::WrongPasscode(locker_id));
        }

        let (packages, tickets) = self.release(&mut guard, PackageStatus::PickedUp);
        drop(guard);

        let tickets: Vec<Ticket> =
            tickets.into_iter().map(|ticket| Ticket { cancelled: true, ..ticket }).collect();
        for ticket in &tickets {
            self.send(ticket, NotificationKind::PickedUp);
        }

        tracing::info!(locker_id, packages = packages.len(), "locker picked up");
        Ok(PickupReceipt {
            locker_id,
            packages: packages.iter().map(|p| p.id).collect(),
            tickets,
        })
    }

    /// Evict the locker holding `ticket_id`.
    ///
    /// Safe to call any number of times and after a concurrent pickup: only
    /// the first caller to find the ticket under the locker lock acts.
    pub fn on_expire(&self, ticket_id: TicketId) -> ExpireOutcome {
        let Some(ticket) = self.tickets.get(ticket_id) else {
            return ExpireOutcome::AlreadyResolved;
        };

        let mut guard = match self.pool.lock(ticket.locker_id) {
            Ok(guard) => guard,
            Err(err) => {
                tracing::error!(ticket_id, %err, "ticket references unknown locker");
                self.tickets.delete(ticket_id);
                return ExpireOutcome::AlreadyResolved;
            },
        };

        if !self.tickets.contains(ticket_id) {
            return ExpireOutcome::AlreadyResolved;
        }

        let locker_id = guard.id();
        let (packages, tickets) = self.release(&mut guard, PackageStatus::Expired);
        drop(guard);

        for ticket in &tickets {
            self.send(ticket, NotificationKind::Expired);
        }

        tracing::info!(ticket_id, locker_id, packages = packages.len(), "locker expired");
        ExpireOutcome::Expired { locker_id, packages: packages.iter().map(|p| p.id).collect() }
    }

    /// Current status of a locker.
    pub fn locker_status(&self, locker_id: LockerId) -> Result<LockerStatus, AllocationError> {
        Ok(self.pool.status(locker_id)?)
    }

    /// Read-only view of a locker.
    pub fn locker_snapshot(&self, locker_id: LockerId) -> Result<LockerSnapshot, AllocationError> {
        Ok(self.pool.snapshot(locker_id)?)
    }

    /// Read-only views of every locker.
    pub fn snapshots(&self) -> Vec<LockerSnapshot> {
        self.pool.snapshots()
    }

    /// Ledger status of a package, `None` if never assigned.
    pub fn package_status(&self, package_id: PackageId) -> Option<PackageStatus> {
        self.ledger.get(package_id)
    }

    /// Active tickets on a locker.
    pub fn tickets_for(&self, locker_id: LockerId) -> Vec<Ticket> {
        self.tickets.lookup(locker_id)
    }

    /// Drop `PickedUp` and `Expired` entries from the ledger, returning how
    /// many were dropped.
    ///
    /// The ledger otherwise keeps every package ever assigned. A pruned
    /// package is forgotten: `package_status` returns `None` for it and it
    /// may be assigned again.
    pub fn prune_resolved(&self) -> usize {
        let pruned = self.ledger.retain(|status| !status.is_terminal());
        tracing::debug!(pruned, "resolved packages pruned from ledger");
        pruned
    }

    /// Lockers currently holding packages of `customer`.
    pub fn lockers_of(&self, customer: CustomerId) -> Vec<LockerId> {
        self.pool.lockers_of(customer)
    }

    /// Take an empty locker out of service, or return it to service.
    ///
    /// # Errors
    ///
    /// `LockerNotFound`, or `Pool(Occupied)` if the locker holds packages.
    pub fn set_out_of_service(
        &self,
        locker_id: LockerId,
        out_of_service: bool,
    ) -> Result<(), AllocationError> {
        self.pool.set_out_of_service(locker_id, out_of_service)?;
        tracing::info!(locker_id, out_of_service, "locker service state changed");
        Ok(())
    }

    /// Number of armed expiration watches.
    pub fn active_watches(&self) -> usize {
        self.supervisor.active()
    }

    /// Number of active tickets.
    pub fn active_tickets(&self) -> usize {
        self.tickets.len()
    }

    /// Configured dwell time.
    pub fn dwell_time(&self) -> Duration {
        self.config.dwell_time
    }

    /// Cancel every outstanding expiration watch. Stored packages stay put.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.supervisor.cancel_all();
        tracing::info!(cancelled, "allocation manager shut down");
        cancelled
    }

    fn assign_resolved(&self, package: &PackageInfo) -> Result<Ticket, AllocationError> {
        let package_id = package.id;
        self.reserve(package_id)?;

        match self.place(package) {
            Some(ticket) => {
                self.send(&ticket, NotificationKind::Assigned);
                Ok(ticket)
            },
            None => {
                self.ledger.remove(package_id);
                tracing::debug!(package_id, size = ?package.size, "no locker available");
                Err(AllocationError::NoLockerAvailable(package_id))
            },
        }
    }

    fn reserve(&self, package_id: PackageId) -> Result<(), AllocationError> {
        self.ledger.with(package_id, |ledger| match ledger.get(&package_id) {
            Some(&status) => Err(AllocationError::AlreadyAssigned { package_id, status }),
            None => {
                ledger.insert(package_id, PackageStatus::Delivering);
                Ok(())
            },
        })
    }

    fn candidates(&self, package: &PackageInfo) -> Vec<(LockerId, bool)> {
        let mut candidates = Vec::new();
        if package.size == PackageSize::Small {
            candidates
                .extend(self.pool.lockers_of(package.customer_id).into_iter().map(|id| (id, true)));
        }
        candidates.extend(self.pool.list_available(package.size).into_iter().map(|id| (id, false)));
        candidates
    }

    fn place(&self, package: &PackageInfo) -> Option<Ticket> {
        for (locker_id, consolidate) in self.candidates(package) {
            let Ok(mut guard) = self.pool.lock(locker_id) else {
                continue;
            };
            if !consolidate && guard.status() != LockerStatus::Empty {
                continue;
            }

            let placement = match guard.place(package, || self.passcodes.generate()) {
                Ok(placement) => placement,
                Err(err) => {
                    tracing::trace!(locker_id, package_id = package.id, %err, "candidate skipped");
                    continue;
                },
            };

            let ticket = self.tickets.issue(
                locker_id,
                package.id,
                placement.passcode,
                self.env.now(),
                self.config.dwell_time,
            );
            self.supervisor.watch(ticket.id, ticket.deadline);
            self.ledger.insert(package.id, PackageStatus::Stored);

            tracing::info!(
                package_id = package.id,
                locker_id,
                ticket_id = ticket.id,
                consolidated = placement.consolidated,
                status = ?placement.status,
                "package assigned"
            );
            return Some(ticket);
        }
        None
    }

    fn release(
        &self,
        guard: &mut LockerGuard<'_>,
        terminal: PackageStatus,
    ) -> (Vec<PackageInfo>, Vec<Ticket>) {
        let tickets = self.tickets.take_locker(guard.id());
        for ticket in &tickets {
            self.supervisor.cancel(ticket.id);
        }

        let packages = guard.clear();
        for package in &packages {
            self.ledger.insert(package.id, terminal);
        }
        (packages, tickets)
    }

    fn send(&self, ticket: &Ticket, kind: NotificationKind) {
        if let Err(err) = self.notifier.notify(ticket, kind) {
            tracing::warn!(ticket_id = ticket.id, ?kind, %err, "notification failed");
        }
    }
}

impl<E: Environment> ExpiryHandler for AllocationManager<E> {
    fn on_expire(&self, ticket_id: TicketId) {
        if self.on_expire(ticket_id) == ExpireOutcome::AlreadyResolved {
            tracing::debug!(ticket_id, "expiry for resolved ticket ignored");
        }
    }
}

impl<E: Environment> std::fmt::Debug for AllocationManager<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationManager")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("tickets", &self.tickets)
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_not_found_maps_to_locker_not_found() {
        assert_eq!(
            AllocationError::from(PoolError::NotFound(4)),
            AllocationError::LockerNotFound(4)
        );
        assert_eq!(
            AllocationError::from(PoolError::Occupied(4)),
            AllocationError::Pool(PoolError::Occupied(4))
        );
    }

    #[test]
    fn source_not_found_maps_to_package_not_found() {
        assert_eq!(
            AllocationError::from(SourceError::NotFound(9)),
            AllocationError::PackageNotFound(9)
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(AllocationError::WrongPasscode(1).is_retryable());
        assert!(AllocationError::NoLockerAvailable(1).is_retryable());
        assert!(
            AllocationError::Source(SourceError::Unavailable { reason: "down".into() })
                .is_retryable()
        );

        assert!(!AllocationError::NotAssigned(1).is_retryable());
        assert!(!AllocationError::PackageNotFound(1).is_retryable());
        assert!(
            !AllocationError::AlreadyAssigned { package_id: 1, status: PackageStatus::Stored }
                .is_retryable()
        );
    }

    #[test]
    fn error_display() {
        let err = AllocationError::WrongPasscode(3);
        assert_eq!(err.to_string(), "wrong passcode for locker 3");
    }
}
