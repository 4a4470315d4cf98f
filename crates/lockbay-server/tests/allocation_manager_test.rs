//! Allocation Manager tests
//!
//! All tests run on a paused tokio clock so expiry is deterministic.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use lockbay_core::{
    Environment, LockerClass, LockerPool, LockerSpec, LockerStatus, MIN_PASSCODE_LENGTH,
    MemoryPackageSource, PackageId, PackageInfo, PackageSize, PackageSource, PackageStatus,
    Passcode, PasscodeGenerator, PoolError, SourceError, Ticket, TicketId,
};
use lockbay_server::{
    AllocationConfig, AllocationError, AllocationManager, ExpireOutcome, NotificationKind,
    NotificationSink, NotifyError, SystemEnv,
};
use parking_lot::Mutex;
use proptest::prelude::*;
use tokio::runtime::Handle;

const HOUR: Duration = Duration::from_secs(60 * 60);

// Hands out fixed passcodes in order, then "FALLBACK".
struct ScriptedPasscodes(Mutex<VecDeque<&'static str>>);

impl ScriptedPasscodes {
    fn new(codes: &[&'static str]) -> Self {
        Self(Mutex::new(codes.iter().copied().collect()))
    }
}

impl PasscodeGenerator for ScriptedPasscodes {
    fn generate(&self) -> Passcode {
        Passcode::new(self.0.lock().pop_front().unwrap_or("FALLBACK"))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(TicketId, NotificationKind)>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, ticket: &Ticket, kind: NotificationKind) -> Result<(), NotifyError> {
        self.events.lock().push((ticket.id, kind));
        Ok(())
    }
}

struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify(&self, _ticket: &Ticket, _kind: NotificationKind) -> Result<(), NotifyError> {
        Err(NotifyError::Unavailable { reason: "sms gateway down".to_string() })
    }
}

struct OfflineSource;

impl PackageSource for OfflineSource {
    fn package(&self, _id: PackageId) -> Result<PackageInfo, SourceError> {
        Err(SourceError::Unavailable { reason: "warehouse api timeout".to_string() })
    }
}

// P1, P2: customer 7 small. P3: customer 9 large. P4: customer 9 large.
// P5: customer 8 small. P6: customer 7 large.
fn catalog() -> Arc<MemoryPackageSource> {
    Arc::new(
        [
            PackageInfo::new(1, 7, PackageSize::Small),
            PackageInfo::new(2, 7, PackageSize::Small),
            PackageInfo::new(3, 9, PackageSize::Large),
            PackageInfo::new(4, 9, PackageSize::Large),
            PackageInfo::new(5, 8, PackageSize::Small),
            PackageInfo::new(6, 7, PackageSize::Large),
        ]
        .into_iter()
        .collect(),
    )
}

fn manager_with(
    pool: LockerPool,
    dwell: Duration,
    codes: &[&'static str],
) -> Arc<AllocationManager<SystemEnv>> {
    AllocationManager::builder(SystemEnv::new(), pool, catalog())
        .config(AllocationConfig::with_dwell_time(dwell))
        .passcodes(ScriptedPasscodes::new(codes))
        .build(Handle::current())
}

fn manager(lockers: u64, dwell: Duration) -> Arc<AllocationManager<SystemEnv>> {
    manager_with(LockerPool::uniform(lockers, LockerClass::Standard), dwell, &["ABC123", "XYZ789"])
}

// Paused clock: lets every due watch run before returning.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn second_small_package_consolidates_and_pickup_releases_both() {
    let manager = manager(3, 48 * HOUR);

    let t1 = manager.assign_package(1).unwrap();
    assert_eq!(t1.locker_id, 1);
    assert_eq!(t1.passcode.as_str(), "ABC123");
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::HoldingOneSmall);

    let t2 = manager.assign_package(2).unwrap();
    assert_eq!(t2.locker_id, 1);
    assert_eq!(t2.passcode.as_str(), "ABC123");
    assert_ne!(t1.id, t2.id);
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::Full);
    assert_eq!(manager.tickets_for(1).len(), 2);

    let receipt = manager.unlock_locker(1, "ABC123").unwrap();

    assert_eq!(receipt.packages, vec![1, 2]);
    assert!(receipt.tickets.iter().all(|t| t.cancelled));
    assert_eq!(manager.package_status(1), Some(PackageStatus::PickedUp));
    assert_eq!(manager.package_status(2), Some(PackageStatus::PickedUp));
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::Empty);
    assert!(manager.tickets_for(1).is_empty());
    assert!(manager.lockers_of(7).is_empty());
    assert_eq!(manager.active_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_dwell_expires_and_old_code_is_not_assigned() {
    let manager = manager(2, Duration::ZERO);

    let t3 = manager.assign_package(3).unwrap();
    settle().await;

    assert_eq!(manager.package_status(3), Some(PackageStatus::Expired));
    assert_eq!(manager.locker_status(t3.locker_id).unwrap(), LockerStatus::Empty);
    assert!(manager.tickets_for(t3.locker_id).is_empty());
    assert_eq!(
        manager.unlock_locker(t3.locker_id, t3.passcode.as_str()),
        Err(AllocationError::NotAssigned(t3.locker_id))
    );
}

#[tokio::test(start_paused = true)]
async fn default_dwell_is_forty_eight_hours() {
    let manager = AllocationManager::builder(
        SystemEnv::new(),
        LockerPool::uniform(1, LockerClass::Standard),
        catalog(),
    )
    .build(Handle::current());

    let ticket = manager.assign_package(3).unwrap();
    assert_eq!(ticket.dwell(), 48 * HOUR);
    assert_eq!(ticket.passcode.len(), 8);

    tokio::time::advance(47 * HOUR).await;
    settle().await;
    assert_eq!(manager.package_status(3), Some(PackageStatus::Stored));

    tokio::time::advance(HOUR).await;
    settle().await;
    assert_eq!(manager.package_status(3), Some(PackageStatus::Expired));
    assert_eq!(manager.active_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn wrong_passcode_changes_nothing_and_can_be_retried() {
    let manager = manager(1, 48 * HOUR);
    manager.assign_package(1).unwrap();

    for _ in 0..3 {
        let err = manager.unlock_locker(1, "ABC124").unwrap_err();
        assert_eq!(err, AllocationError::WrongPasscode(1));
        assert!(err.is_retryable());
    }

    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::HoldingOneSmall);
    assert_eq!(manager.package_status(1), Some(PackageStatus::Stored));
    assert!(manager.unlock_locker(1, "ABC123").is_ok());
}

#[tokio::test(start_paused = true)]
async fn unlock_errors() {
    let manager = manager(1, 48 * HOUR);

    assert_eq!(manager.unlock_locker(1, "ABC123"), Err(AllocationError::NotAssigned(1)));
    assert_eq!(manager.unlock_locker(42, "ABC123"), Err(AllocationError::LockerNotFound(42)));
}

#[tokio::test(start_paused = true)]
async fn assign_errors() {
    let manager = manager(2, 48 * HOUR);

    assert_eq!(manager.assign_package(99), Err(AllocationError::PackageNotFound(99)));
    assert_eq!(manager.package_status(99), None);

    manager.assign_package(1).unwrap();
    assert_eq!(
        manager.assign_package(1),
        Err(AllocationError::AlreadyAssigned { package_id: 1, status: PackageStatus::Stored })
    );

    manager.unlock_locker(1, "ABC123").unwrap();
    assert_eq!(
        manager.assign_package(1),
        Err(AllocationError::AlreadyAssigned { package_id: 1, status: PackageStatus::PickedUp })
    );
}

#[tokio::test(start_paused = true)]
async fn full_bank_rejects_then_accepts_after_pickup() {
    let manager = manager(1, 48 * HOUR);
    manager.assign_package(3).unwrap();

    let err = manager.assign_package(4).unwrap_err();
    assert_eq!(err, AllocationError::NoLockerAvailable(4));
    assert!(err.is_retryable());
    assert_eq!(manager.package_status(4), None);

    manager.unlock_locker(1, "ABC123").unwrap();
    let ticket = manager.assign_package(4).unwrap();
    assert_eq!(ticket.locker_id, 1);
    assert_eq!(ticket.passcode.as_str(), "XYZ789");
}

#[tokio::test(start_paused = true)]
async fn other_customer_gets_own_locker() {
    let manager = manager(2, 48 * HOUR);

    manager.assign_package(1).unwrap();
    let ticket = manager.assign_package(5).unwrap();

    assert_eq!(ticket.locker_id, 2);
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::HoldingOneSmall);
}

#[tokio::test(start_paused = true)]
async fn other_customer_small_never_joins_half_full_locker() {
    let manager = manager(1, 48 * HOUR);

    manager.assign_package(1).unwrap();
    assert_eq!(manager.assign_package(5), Err(AllocationError::NoLockerAvailable(5)));
}

#[tokio::test(start_paused = true)]
async fn large_package_never_consolidates() {
    let manager = manager(2, 48 * HOUR);

    manager.assign_package(1).unwrap();
    let ticket = manager.assign_package(6).unwrap();

    assert_eq!(ticket.locker_id, 2);
    assert_eq!(ticket.passcode.as_str(), "XYZ789");
    assert_eq!(manager.lockers_of(7), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn large_package_skips_compact_locker() {
    let pool = LockerPool::new([
        LockerSpec::new(1, LockerClass::Compact),
        LockerSpec::new(2, LockerClass::Standard),
    ]);
    let manager = manager_with(pool, 48 * HOUR, &["ABC123", "XYZ789"]);

    assert_eq!(manager.assign_package(3).unwrap().locker_id, 2);
    assert_eq!(manager.assign_package(1).unwrap().locker_id, 1);
    assert_eq!(manager.assign_package(4), Err(AllocationError::NoLockerAvailable(4)));
}

#[tokio::test(start_paused = true)]
async fn on_expire_is_idempotent() {
    let manager = manager(1, 48 * HOUR);
    let ticket = manager.assign_package(3).unwrap();

    assert_eq!(
        manager.on_expire(ticket.id),
        ExpireOutcome::Expired { locker_id: 1, packages: vec![3] }
    );
    assert_eq!(manager.on_expire(ticket.id), ExpireOutcome::AlreadyResolved);
    assert_eq!(manager.on_expire(12_345), ExpireOutcome::AlreadyResolved);
    assert_eq!(manager.package_status(3), Some(PackageStatus::Expired));
    assert_eq!(manager.active_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_after_pickup_is_a_noop() {
    let manager = manager(1, 48 * HOUR);
    let ticket = manager.assign_package(1).unwrap();
    manager.unlock_locker(1, "ABC123").unwrap();

    assert_eq!(manager.on_expire(ticket.id), ExpireOutcome::AlreadyResolved);
    assert_eq!(manager.package_status(1), Some(PackageStatus::PickedUp));

    tokio::time::advance(49 * HOUR).await;
    settle().await;
    assert_eq!(manager.package_status(1), Some(PackageStatus::PickedUp));
}

#[tokio::test(start_paused = true)]
async fn expiry_of_first_ticket_evicts_whole_locker() {
    let manager = manager(1, 48 * HOUR);
    let t1 = manager.assign_package(1).unwrap();
    tokio::time::advance(HOUR).await;
    manager.assign_package(2).unwrap();

    tokio::time::advance(47 * HOUR).await;
    settle().await;

    assert_eq!(manager.package_status(1), Some(PackageStatus::Expired));
    assert_eq!(manager.package_status(2), Some(PackageStatus::Expired));
    assert_eq!(manager.locker_status(t1.locker_id).unwrap(), LockerStatus::Empty);
    assert_eq!(manager.active_watches(), 0);
    assert_eq!(manager.active_tickets(), 0);
}

#[tokio::test(start_paused = true)]
async fn notifications_follow_ticket_lifecycle() {
    let sink = Arc::new(RecordingSink::default());
    let manager = AllocationManager::builder(
        SystemEnv::new(),
        LockerPool::uniform(2, LockerClass::Standard),
        catalog(),
    )
    .config(AllocationConfig::with_dwell_time(HOUR))
    .passcodes(ScriptedPasscodes::new(&["ABC123", "XYZ789"]))
    .notifier(Arc::clone(&sink) as Arc<dyn NotificationSink>)
    .build(Handle::current());

    let t1 = manager.assign_package(1).unwrap();
    let t2 = manager.assign_package(2).unwrap();
    let t3 = manager.assign_package(3).unwrap();
    manager.unlock_locker(1, "ABC123").unwrap();
    tokio::time::advance(2 * HOUR).await;
    settle().await;

    assert_eq!(
        *sink.events.lock(),
        vec![
            (t1.id, NotificationKind::Assigned),
            (t2.id, NotificationKind::Assigned),
            (t3.id, NotificationKind::Assigned),
            (t1.id, NotificationKind::PickedUp),
            (t2.id, NotificationKind::PickedUp),
            (t3.id, NotificationKind::Expired),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_sink_never_rolls_back() {
    let manager = AllocationManager::builder(
        SystemEnv::new(),
        LockerPool::uniform(1, LockerClass::Standard),
        catalog(),
    )
    .passcodes(ScriptedPasscodes::new(&["ABC123"]))
    .notifier(Arc::new(FailingSink))
    .build(Handle::current());

    manager.assign_package(1).unwrap();
    assert_eq!(manager.package_status(1), Some(PackageStatus::Stored));

    manager.unlock_locker(1, "ABC123").unwrap();
    assert_eq!(manager.package_status(1), Some(PackageStatus::PickedUp));
}

#[tokio::test(start_paused = true)]
async fn out_of_service_locker_is_skipped() {
    let manager = manager(2, 48 * HOUR);

    manager.set_out_of_service(1, true).unwrap();
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::OutOfService);
    assert_eq!(manager.assign_package(3).unwrap().locker_id, 2);

    assert_eq!(
        manager.set_out_of_service(2, true),
        Err(AllocationError::Pool(PoolError::Occupied(2)))
    );
    assert_eq!(manager.set_out_of_service(9, true), Err(AllocationError::LockerNotFound(9)));

    manager.set_out_of_service(1, false).unwrap();
    assert_eq!(manager.assign_package(4).unwrap().locker_id, 1);
}

#[tokio::test(start_paused = true)]
async fn snapshot_hides_passcode() {
    let manager = manager(1, 48 * HOUR);
    manager.assign_package(1).unwrap();

    let snapshot = manager.locker_snapshot(1).unwrap();
    assert!(snapshot.assigned);
    assert_eq!(snapshot.packages, vec![1]);
    assert!(!format!("{snapshot:?}").contains("ABC123"));
    assert!(!format!("{:?}", manager.tickets_for(1)).contains("ABC123"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_outstanding_watches() {
    let manager = manager(2, HOUR);
    manager.assign_package(1).unwrap();
    manager.assign_package(3).unwrap();

    assert_eq!(manager.shutdown(), 2);
    tokio::time::advance(2 * HOUR).await;
    settle().await;

    assert_eq!(manager.package_status(1), Some(PackageStatus::Stored));
    assert_eq!(manager.package_status(3), Some(PackageStatus::Stored));
    assert_eq!(manager.active_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_happens_at_ticket_deadline() {
    let manager = manager(2, Duration::from_millis(2_500));
    let ticket = manager.assign_package(3).unwrap();
    assert_eq!(ticket.issued_at, SystemEnv::new().now());

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(manager.package_status(3), Some(PackageStatus::Stored));

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(SystemEnv::new().now() > ticket.deadline);
    assert_eq!(manager.package_status(3), Some(PackageStatus::Expired));
}

#[tokio::test(start_paused = true)]
async fn zero_passcode_length_still_guards_the_locker() {
    let manager = AllocationManager::builder(
        SystemEnv::new(),
        LockerPool::uniform(1, LockerClass::Standard),
        catalog(),
    )
    .config(AllocationConfig { dwell_time: HOUR, passcode_length: 0 })
    .build(Handle::current());

    let ticket = manager.assign_package(1).unwrap();
    assert_eq!(ticket.passcode.len(), MIN_PASSCODE_LENGTH);
    assert_eq!(manager.unlock_locker(1, ""), Err(AllocationError::WrongPasscode(1)));
    assert_eq!(manager.package_status(1), Some(PackageStatus::Stored));
}

#[tokio::test(start_paused = true)]
async fn batch_pairs_small_packages_of_one_customer() {
    let manager = manager(3, 48 * HOUR);

    let results = manager.assign_packages(&[1, 2]);

    let lockers: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().locker_id).collect();
    assert_eq!(lockers, vec![1, 1]);
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::Full);
    assert_eq!(results[0].as_ref().unwrap().passcode, results[1].as_ref().unwrap().passcode);
}

#[tokio::test(start_paused = true)]
async fn batch_places_customer_smalls_before_their_large() {
    let manager = manager(2, 48 * HOUR);

    // Input order would put P6 (large) first; smalls of customer 7 go first.
    let results = manager.assign_packages(&[6, 1, 2, 5, 42, 1]);

    assert_eq!(results[0].as_ref().unwrap().locker_id, 2);
    assert_eq!(results[1].as_ref().unwrap().locker_id, 1);
    assert_eq!(results[2].as_ref().unwrap().locker_id, 1);
    assert_eq!(results[3], Err(AllocationError::NoLockerAvailable(5)));
    assert_eq!(results[4], Err(AllocationError::PackageNotFound(42)));
    assert!(matches!(results[5], Err(AllocationError::AlreadyAssigned { package_id: 1, .. })));
    assert_eq!(manager.package_status(5), None);
}

#[tokio::test(start_paused = true)]
async fn prune_resolved_forgets_only_terminal_packages() {
    let manager = manager(2, 48 * HOUR);
    manager.assign_package(1).unwrap();
    manager.assign_package(3).unwrap();
    manager.unlock_locker(1, "ABC123").unwrap();

    assert_eq!(manager.prune_resolved(), 1);
    assert_eq!(manager.package_status(1), None);
    assert_eq!(manager.package_status(3), Some(PackageStatus::Stored));
    assert_eq!(manager.prune_resolved(), 0);

    // A forgotten package is accepted again.
    assert!(manager.assign_package(1).is_ok());
}

#[tokio::test(start_paused = true)]
async fn unavailable_source_leaves_no_reservation() {
    let manager = AllocationManager::builder(
        SystemEnv::new(),
        LockerPool::uniform(1, LockerClass::Standard),
        Arc::new(OfflineSource),
    )
    .build(Handle::current());

    let err = manager.assign_package(1).unwrap_err();

    assert!(matches!(err, AllocationError::Source(SourceError::Unavailable { .. })));
    assert!(err.is_retryable());
    assert_eq!(manager.package_status(1), None);
    assert_eq!(manager.locker_status(1).unwrap(), LockerStatus::Empty);
    assert_eq!(manager.active_tickets(), 0);
}

#[derive(Debug, Clone)]
enum Step {
    Assign(u64),
    Pickup(u64),
    Expire(u64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (1u64..=6).prop_map(Step::Assign),
        1 => (1u64..=3).prop_map(Step::Pickup),
        1 => (1u64..=8).prop_map(Step::Expire),
    ]
}

proptest! {
    #[test]
    fn ledger_agrees_with_lockers(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let manager = AllocationManager::builder(
                SystemEnv::new(),
                LockerPool::uniform(3, LockerClass::Standard),
                catalog(),
            )
            .build(Handle::current());
            let mut codes = std::collections::HashMap::new();

            for step in steps {
                match step {
                    Step::Assign(package_id) => {
                        if let Ok(ticket) = manager.assign_package(package_id) {
                            codes.insert(ticket.locker_id, ticket.passcode.clone());
                        }
                    },
                    Step::Pickup(locker_id) => {
                        if let Some(code) = codes.get(&locker_id) {
                            let _ = manager.unlock_locker(locker_id, code.as_str());
                        }
                    },
                    Step::Expire(ticket_id) => {
                        manager.on_expire(ticket_id);
                    },
                }

                let mut stored = 0;
                for snapshot in manager.snapshots() {
                    prop_assert!(snapshot.packages.len() <= 2);
                    prop_assert_eq!(snapshot.assigned, !snapshot.packages.is_empty());
                    for package_id in &snapshot.packages {
                        prop_assert_eq!(
                            manager.package_status(*package_id),
                            Some(PackageStatus::Stored)
                        );
                        stored += 1;
                    }
                }
                let ledger_stored = (1..=6)
                    .filter(|&id| manager.package_status(id) == Some(PackageStatus::Stored))
                    .count();
                prop_assert_eq!(stored, ledger_stored);
                prop_assert_eq!(manager.active_tickets(), stored);
                prop_assert_eq!(manager.active_watches(), stored);
            }
            Ok(())
        })?;
    }
}
