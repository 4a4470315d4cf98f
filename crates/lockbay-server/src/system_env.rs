//! Wall-clock environment for running a real locker bank.
//!
//! Deadlines are read from the tokio clock, the same clock expiration watches
//! sleep on, and passcode entropy comes from the operating system. Outside a
//! paused runtime the tokio clock is the monotonic system clock.

use std::time::{Duration, Instant};

use lockbay_core::env::Environment;

/// [`Environment`] backed by the OS clock and OS entropy.
///
/// Must be used from inside a tokio runtime with the time driver enabled,
/// because expiration watches await [`Environment::sleep`].
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// The process-wide system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        if let Err(err) = getrandom::fill(buffer) {
            // Zeroed entropy yields guessable passcodes; make it loud.
            tracing::error!(%err, len = buffer.len(), "OS entropy unavailable");
            buffer.fill(0);
        }
    }
}
