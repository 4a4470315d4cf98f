//! Time and entropy behind a trait.
//!
//! Ticket deadlines, expiration sleeps and passcode bytes all go through
//! [`Environment`]. Production plugs in the OS clock and `getrandom`; the
//! harness plugs in a paused tokio clock and a seeded RNG, which makes
//! expiry races and generated passcodes reproducible run to run.
//!
//! # Invariants
//!
//! - `now()` is monotonic and agrees with the clock `sleep()` waits on
//! - A seeded implementation replays the same `random_bytes()` stream
//! - No implementation keeps process-global state

use std::time::{Duration, Instant};

/// Clock, timer and entropy source for the locker service.
///
/// Implementations are cloned into every expiration watch, so cloning should
/// be cheap. Passcodes are drawn from `random_bytes`, which therefore has to
/// be a cryptographic source outside of tests.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current instant.
    ///
    /// Ticket issue and deadline timestamps are taken from this clock.
    fn now(&self) -> Instant;

    /// Resolves after `duration` on the same clock as [`Environment::now`].
    ///
    /// Only the expiration supervisor awaits this; allocation and pickup
    /// never suspend.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Overwrite `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// One random `u64`, big-endian from [`Environment::random_bytes`].
    fn random_u64(&self) -> u64 {
        let mut raw = [0u8; 8];
        self.random_bytes(&mut raw);
        u64::from_be_bytes(raw)
    }
}
