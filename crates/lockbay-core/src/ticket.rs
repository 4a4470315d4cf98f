//! Ticket Store
//!
//! Records which package sits in which locker under which passcode. One
//! ticket is issued per placement; tickets on the same locker share that
//! locker's passcode.
//!
//! Presence of a ticket in the store is what pickup and expiry arbitrate on:
//! whichever path removes the ticket first owns the cleanup, and the loser
//! observes absence. Removal is therefore idempotent and never errors.

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    ids::{IdGenerator, LockerId, PackageId, SequentialIds, TicketId},
    passcode::Passcode,
    shard::ShardedMap,
};

/// Upper bound used when `issued_at + dwell` is not representable.
const MAX_DWELL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Binding of one package placement to a locker and passcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Ticket identifier.
    pub id: TicketId,
    /// Locker holding the package.
    pub locker_id: LockerId,
    /// Package placed by this ticket.
    pub package_id: PackageId,
    /// Locker passcode at issue time.
    pub passcode: Passcode,
    /// When the ticket was issued.
    pub issued_at: Instant,
    /// When the package expires if unclaimed.
    pub deadline: Instant,
    /// Set on copies handed back after an early pickup.
    pub cancelled: bool,
}

impl Ticket {
    /// Dwell time granted by this ticket.
    pub fn dwell(&self) -> Duration {
        self.deadline.saturating_duration_since(self.issued_at)
    }
}

/// Active tickets, indexed by ticket and by locker.
pub struct TicketStore {
    tickets: ShardedMap<Ticket>,
    by_locker: ShardedMap<BTreeSet<TicketId>>,
    ids: Arc<dyn IdGenerator>,
}

impl TicketStore {
    /// Store minting ticket IDs from `ids`.
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { tickets: ShardedMap::new(), by_locker: ShardedMap::new(), ids }
    }

    /// Issue and store a ticket, returning a copy.
    pub fn issue(
        &self,
        locker_id: LockerId,
        package_id: PackageId,
        passcode: Passcode,
        issued_at: Instant,
        dwell: Duration,
    ) -> Ticket {
        let deadline = issued_at
            .checked_add(dwell)
            .or_else(|| issued_at.checked_add(MAX_DWELL))
            .unwrap_or(issued_at);

        let ticket = Ticket {
            id: self.ids.next_id(),
            locker_id,
            package_id,
            passcode,
            issued_at,
            deadline,
            cancelled: false,
        };

        self.tickets.insert(ticket.id, ticket.clone());
        self.by_locker.with(locker_id, |index| {
            index.entry(locker_id).or_default().insert(ticket.id);
        });

        tracing::trace!(ticket_id = ticket.id, locker_id, package_id, "ticket issued");
        ticket
    }

    /// Copy of an active ticket.
    pub fn get(&self, ticket_id: TicketId) -> Option<Ticket> {
        self.tickets.get(ticket_id)
    }

    /// Whether a ticket is still active.
    pub fn contains(&self, ticket_id: TicketId) -> bool {
        self.tickets.contains_key(ticket_id)
    }

    /// All active tickets on a locker, oldest first.
    pub fn lookup(&self, locker_id: LockerId) -> Vec<Ticket> {
        let ids = self.by_locker.with(locker_id, |index| {
            index.get(&locker_id).map(|ids| ids.iter().copied().collect::<Vec<_>>())
        });
        ids.unwrap_or_default().into_iter().filter_map(|id| self.tickets.get(id)).collect()
    }

    /// Remove a ticket. Returns it if this call removed it.
    pub fn delete(&self, ticket_id: TicketId) -> Option<Ticket> {
        let ticket = self.tickets.remove(ticket_id)?;
        let locker_id = ticket.locker_id;
        self.by_locker.with(locker_id, |index| {
            if let Some(ids) = index.get_mut(&locker_id) {
                ids.remove(&ticket_id);
                if ids.is_empty() {
                    index.remove(&locker_id);
                }
            }
        });
        Some(ticket)
    }

    /// Remove every ticket on a locker, oldest first.
    pub fn take_locker(&self, locker_id: LockerId) -> Vec<Ticket> {
        let ids = self.by_locker.remove(locker_id).unwrap_or_default();
        ids.into_iter().filter_map(|id| self.tickets.remove(id)).collect()
    }

    /// Number of active tickets.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether no ticket is active.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new(Arc::new(SequentialIds::new()))
    }
}

impl std::fmt::Debug for TicketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketStore").field("active", &self.tickets.len()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DWELL: Duration = Duration::from_secs(48 * 60 * 60);

    fn store() -> TicketStore {
        TicketStore::default()
    }

    #[test]
    fn issue_assigns_unique_ids_and_deadline() {
        let store = store();
        let now = Instant::now();

        let first = store.issue(1, 10, Passcode::new("AAAA"), now, DWELL);
        let second = store.issue(1, 11, Passcode::new("AAAA"), now, DWELL);

        assert_ne!(first.id, second.id);
        assert_eq!(first.deadline, now + DWELL);
        assert_eq!(first.dwell(), DWELL);
        assert!(!first.cancelled);
        assert_eq!(store.get(first.id), Some(first));
    }

    #[test]
    fn lookup_returns_only_tickets_for_locker() {
        let store = store();
        let now = Instant::now();
        let a = store.issue(1, 10, Passcode::new("AAAA"), now, DWELL);
        let b = store.issue(1, 11, Passcode::new("AAAA"), now, DWELL);
        store.issue(2, 12, Passcode::new("BBBB"), now, DWELL);

        let tickets = store.lookup(1);

        assert_eq!(tickets, vec![a, b]);
        assert!(store.lookup(3).is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let store = store();
        let ticket = store.issue(1, 10, Passcode::new("AAAA"), Instant::now(), DWELL);

        assert_eq!(store.delete(ticket.id).map(|t| t.id), Some(ticket.id));
        assert_eq!(store.delete(ticket.id), None);
        assert!(store.lookup(1).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn take_locker_removes_all_its_tickets() {
        let store = store();
        let now = Instant::now();
        store.issue(1, 10, Passcode::new("AAAA"), now, DWELL);
        store.issue(1, 11, Passcode::new("AAAA"), now, DWELL);
        let other = store.issue(2, 12, Passcode::new("BBBB"), now, DWELL);

        let taken = store.take_locker(1);

        assert_eq!(taken.iter().map(|t| t.package_id).collect::<Vec<_>>(), vec![10, 11]);
        assert_eq!(store.len(), 1);
        assert!(store.contains(other.id));
        assert!(store.take_locker(1).is_empty());
    }

    #[test]
    fn zero_dwell_deadline_is_issue_time() {
        let store = store();
        let now = Instant::now();
        let ticket = store.issue(1, 10, Passcode::new("AAAA"), now, Duration::ZERO);
        assert_eq!(ticket.deadline, now);
        assert_eq!(ticket.dwell(), Duration::ZERO);
    }

    #[test]
    fn injected_id_generator_is_used() {
        let store = TicketStore::new(Arc::new(SequentialIds::starting_at(500)));
        let ticket = store.issue(1, 10, Passcode::new("AAAA"), Instant::now(), DWELL);
        assert_eq!(ticket.id, 500);
    }
}
