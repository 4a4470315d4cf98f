//! Fuzz target for [`LockerPool`] and [`TicketStore`]
//!
//! Prevent capacity and ownership violations via arbitrary transition
//! sequences
//!
//! # Strategy
//!
//! - Placement sequences: Arbitrary packages offered to arbitrary lockers,
//!   including unknown ones
//! - Releases: Clear lockers and drop their tickets mid-sequence
//! - Service changes: Toggle out-of-service on empty and occupied lockers
//!
//! # Invariants
//!
//! - At most two packages per locker, one if any is large
//! - Never two customers in one locker
//! - Compact lockers NEVER hold a large package
//! - Passcode present iff the locker holds packages
//! - Every stored package has exactly one live ticket on its locker
//! - Rejected placements leave the locker unchanged
//! - NEVER panic

#![no_main]

use std::{
    collections::{BTreeMap, BTreeSet},
    time::{Duration, Instant},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lockbay_core::{
    LockerClass, LockerPool, LockerSpec, LockerStatus, PackageInfo, PackageSize, Passcode,
    TicketStore,
};

#[derive(Debug, Clone, Arbitrary)]
enum PoolEvent {
    Place { locker: u8, customer: u8, large: bool },
    Release { locker: u8 },
    OutOfService { locker: u8, flag: bool },
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    /// Compact flag per locker; the pool has one locker per entry (max 8).
    compact: Vec<bool>,
    events: Vec<PoolEvent>,
}

fuzz_target!(|input: FuzzInput| {
    let layout: Vec<LockerSpec> = input
        .compact
        .iter()
        .take(8)
        .enumerate()
        .map(|(i, &compact)| {
            let class = if compact { LockerClass::Compact } else { LockerClass::Standard };
            LockerSpec::new(i as u64 + 1, class)
        })
        .collect();
    let classes: BTreeMap<u64, LockerClass> = layout.iter().map(|s| (s.id, s.class)).collect();

    let pool = LockerPool::new(layout);
    let tickets = TicketStore::default();
    let now = Instant::now();
    let mut next_package = 0u64;
    let mut owners = BTreeMap::new();

    for event in input.events.iter().take(256) {
        match *event {
            PoolEvent::Place { locker, customer, large } => {
                next_package += 1;
                let size = if large { PackageSize::Large } else { PackageSize::Small };
                let package = PackageInfo::new(next_package, u64::from(customer % 4), size);
                owners.insert(package.id, package);

                let locker_id = u64::from(locker % 10);
                let before = pool.snapshot(locker_id).ok();
                let Ok(mut guard) = pool.lock(locker_id) else {
                    assert!(!classes.contains_key(&locker_id));
                    continue;
                };
                match guard.place(&package, || Passcode::new(format!("CODE{next_package}"))) {
                    Ok(placement) => {
                        tickets.issue(
                            locker_id,
                            package.id,
                            placement.passcode,
                            now,
                            Duration::from_secs(60),
                        );
                    },
                    Err(_) => {
                        assert_eq!(Some(guard.snapshot()), before, "rejected placement mutated");
                    },
                }
            },
            PoolEvent::Release { locker } => {
                let locker_id = u64::from(locker % 10);
                if let Ok(mut guard) = pool.lock(locker_id) {
                    let removed = guard.clear();
                    let dropped = tickets.take_locker(locker_id);
                    assert_eq!(removed.len(), dropped.len());
                }
            },
            PoolEvent::OutOfService { locker, flag } => {
                let _ = pool.set_out_of_service(u64::from(locker % 10), flag);
            },
        }

        for snapshot in pool.snapshots() {
            let packages: Vec<&PackageInfo> =
                snapshot.packages.iter().filter_map(|id| owners.get(id)).collect();
            assert_eq!(packages.len(), snapshot.packages.len());
            assert!(packages.len() <= 2);
            assert_eq!(snapshot.assigned, !packages.is_empty());

            let customers: BTreeSet<_> = packages.iter().map(|p| p.customer_id).collect();
            assert!(customers.len() <= 1);

            if packages.iter().any(|p| p.size == PackageSize::Large) {
                assert_eq!(packages.len(), 1);
                assert_eq!(classes.get(&snapshot.id), Some(&LockerClass::Standard));
            }
            if snapshot.status == LockerStatus::OutOfService {
                assert!(packages.is_empty());
            }

            let live: BTreeSet<_> =
                tickets.lookup(snapshot.id).iter().map(|t| t.package_id).collect();
            let stored: BTreeSet<_> = snapshot.packages.iter().copied().collect();
            assert_eq!(live, stored);
        }
    }
});
