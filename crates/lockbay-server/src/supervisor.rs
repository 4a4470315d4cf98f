//! Expiration Supervisor
//!
//! One watch per ticket: a spawned task that sleeps until the ticket's
//! deadline and then reports the ticket to an [`ExpiryHandler`], unless the
//! watch was cancelled first.
//!
//! The remaining sleep is measured against [`Environment::now`] when the task
//! first runs, so scheduling delay never pushes expiry past the deadline.
//!
//! ## Exactly-once resolution
//!
//! Each watch carries an atomic state that starts `ARMED` and moves exactly
//! once, to `FIRED` (by the task, after the sleep) or to `CANCELLED` (by
//! [`ExpirationSupervisor::cancel`]). Only the side that wins the
//! compare-exchange acts:
//!
//! - cancel wins: the task observes `CANCELLED` and exits without calling
//!   the handler, so no expiry can follow an acknowledged cancel
//! - fire wins: cancel reports [`CancelOutcome::AlreadyFired`]; the handler
//!   is expected to tolerate running after the pickup it raced with
//!
//! The supervisor never touches lockers or tickets; it only knows ticket IDs.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, Ordering},
    },
    time::Instant,
};

use lockbay_core::{Environment, ShardedMap, TicketId};
use tokio::{runtime::Handle, sync::Notify};

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Callback invoked when a watch fires.
///
/// Must be idempotent and must not panic: it runs on a detached task and
/// nobody observes its result.
pub trait ExpiryHandler: Send + Sync + 'static {
    /// The dwell time of `ticket_id` elapsed without a cancel.
    fn on_expire(&self, ticket_id: TicketId);
}

/// Result of cancelling a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The watch was armed and will never fire.
    Cancelled,
    /// The watch fired before the cancel landed.
    AlreadyFired,
    /// No watch exists for this ticket (never armed, already fired and
    /// reaped, or already cancelled).
    Unknown,
}

struct Watch {
    state: Arc<AtomicU8>,
    wake: Arc<Notify>,
}

impl Watch {
    fn disarm(&self) -> CancelOutcome {
        match self.state.compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                self.wake.notify_one();
                CancelOutcome::Cancelled
            },
            Err(FIRED) => CancelOutcome::AlreadyFired,
            Err(_) => CancelOutcome::Unknown,
        }
    }
}

/// Owns the expiration watches of every active ticket.
pub struct ExpirationSupervisor<E: Environment> {
    env: E,
    runtime: Handle,
    watches: Arc<ShardedMap<Watch>>,
    handler: Weak<dyn ExpiryHandler>,
}

impl<E: Environment> ExpirationSupervisor<E> {
    /// Supervisor spawning watches on `runtime` and reporting to `handler`.
    ///
    /// The handler is held weakly so the owner of the supervisor can also be
    /// its handler without a reference cycle.
    pub fn new(env: E, runtime: Handle, handler: Weak<dyn ExpiryHandler>) -> Self {
        Self { env, runtime, watches: Arc::new(ShardedMap::new()), handler }
    }

    /// Arm a watch for `ticket_id` that fires once `deadline` has passed.
    ///
    /// Re-arming an existing ticket cancels the previous watch.
    pub fn watch(&self, ticket_id: TicketId, deadline: Instant) {
        let state = Arc::new(AtomicU8::new(ARMED));
        let wake = Arc::new(Notify::new());

        let watch = Watch { state: Arc::clone(&state), wake: Arc::clone(&wake) };
        if let Some(previous) = self.watches.insert(ticket_id, watch) {
            tracing::warn!(ticket_id, "re-arming ticket, previous watch cancelled");
            previous.disarm();
        }

        let env = self.env.clone();
        let watches = Arc::clone(&self.watches);
        let handler = self.handler.clone();

        self.runtime.spawn(async move {
            let remaining = deadline.saturating_duration_since(env.now());
            tokio::select! {
                () = env.sleep(remaining) => {},
                () = wake.notified() => return,
            }

            if state.compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire).is_err() {
                return;
            }

            watches.with(ticket_id, |map| {
                if map.get(&ticket_id).is_some_and(|w| Arc::ptr_eq(&w.state, &state)) {
                    map.remove(&ticket_id);
                }
            });

            match handler.upgrade() {
                Some(handler) => handler.on_expire(ticket_id),
                None => tracing::debug!(ticket_id, "expiry handler dropped, watch discarded"),
            }
        });

        tracing::trace!(ticket_id, ?deadline, "expiration watch armed");
    }

    /// Cancel the watch for `ticket_id`. Never blocks, never errors.
    pub fn cancel(&self, ticket_id: TicketId) -> CancelOutcome {
        let Some(watch) = self.watches.remove(ticket_id) else {
            return CancelOutcome::Unknown;
        };
        let outcome = watch.disarm();
        tracing::trace!(ticket_id, ?outcome, "expiration watch cancelled");
        outcome
    }

    /// Cancel every armed watch, returning how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.watches
            .drain()
            .into_iter()
            .filter(|(_, watch)| watch.disarm() == CancelOutcome::Cancelled)
            .count()
    }

    /// Number of armed watches.
    pub fn active(&self) -> usize {
        self.watches.len()
    }
}

impl<E: Environment> std::fmt::Debug for ExpirationSupervisor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationSupervisor").field("active", &self.watches.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::SystemEnv;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<TicketId>>,
    }

    impl ExpiryHandler for Recorder {
        fn on_expire(&self, ticket_id: TicketId) {
            self.fired.lock().push(ticket_id);
        }
    }

    fn supervisor(recorder: &Arc<Recorder>) -> ExpirationSupervisor<SystemEnv> {
        let recorder: Arc<dyn ExpiryHandler> = Arc::clone(recorder) as Arc<dyn ExpiryHandler>;
        let handler = Arc::downgrade(&recorder);
        ExpirationSupervisor::new(SystemEnv::new(), Handle::current(), handler)
    }

    fn in_secs(secs: u64) -> Instant {
        SystemEnv::new().now() + Duration::from_secs(secs)
    }

    // Paused clock: lets every due watch run before returning.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn watch_fires_after_dwell() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        supervisor.watch(1, in_secs(10));
        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        assert!(recorder.fired.lock().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(*recorder.fired.lock(), vec![1]);
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_fixed_at_arming_not_first_poll() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        // The task is first polled during the advance, 8 s after arming.
        supervisor.watch(1, in_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(*recorder.fired.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        let deadline = in_secs(2);
        tokio::time::advance(Duration::from_secs(5)).await;
        supervisor.watch(4, deadline);
        settle().await;
        assert_eq!(*recorder.fired.lock(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watch_never_fires() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        supervisor.watch(1, in_secs(10));
        assert_eq!(supervisor.cancel(1), CancelOutcome::Cancelled);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(recorder.fired.lock().is_empty());
        assert_eq!(supervisor.cancel(1), CancelOutcome::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_noop() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        supervisor.watch(7, in_secs(0));
        settle().await;

        assert_eq!(*recorder.fired.lock(), vec![7]);
        assert_eq!(supervisor.cancel(7), CancelOutcome::Unknown);
        assert_eq!(supervisor.cancel(7), CancelOutcome::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_watch() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        supervisor.watch(3, in_secs(5));
        supervisor.watch(3, in_secs(20));
        assert_eq!(supervisor.active(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert!(recorder.fired.lock().is_empty());

        tokio::time::advance(Duration::from_secs(15)).await;
        settle().await;
        assert_eq!(*recorder.fired.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_disarms_everything() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);

        for ticket_id in 1..=5 {
            supervisor.watch(ticket_id, in_secs(30));
        }
        assert_eq!(supervisor.cancel_all(), 5);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert!(recorder.fired.lock().is_empty());
        assert_eq!(supervisor.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handler_is_tolerated() {
        let recorder = Arc::new(Recorder::default());
        let supervisor = supervisor(&recorder);
        drop(recorder);

        supervisor.watch(1, in_secs(0));
        settle().await;
        assert_eq!(supervisor.active(), 0);
    }
}
