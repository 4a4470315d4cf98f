//! Allocation manager configuration.

use std::time::Duration;

use lockbay_core::DEFAULT_PASSCODE_LENGTH;

/// Default time a package may wait in a locker before it is evicted.
pub const DEFAULT_DWELL_TIME: Duration = Duration::from_secs(48 * 60 * 60);

/// Tunables for the allocation manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationConfig {
    /// Dwell time granted to every placement.
    pub dwell_time: Duration,
    /// Length of generated passcodes, raised to `MIN_PASSCODE_LENGTH` if
    /// shorter. Ignored when a custom generator is supplied to the builder.
    pub passcode_length: usize,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self { dwell_time: DEFAULT_DWELL_TIME, passcode_length: DEFAULT_PASSCODE_LENGTH }
    }
}

impl AllocationConfig {
    /// Default config with a different dwell time.
    pub fn with_dwell_time(dwell_time: Duration) -> Self {
        Self { dwell_time, ..Self::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_locker_policy() {
        let config = AllocationConfig::default();
        assert_eq!(config.dwell_time, Duration::from_secs(172_800));
        assert_eq!(config.passcode_length, 8);
    }

    #[test]
    fn with_dwell_time_keeps_other_defaults() {
        let config = AllocationConfig::with_dwell_time(Duration::ZERO);
        assert_eq!(config.dwell_time, Duration::ZERO);
        assert_eq!(config.passcode_length, DEFAULT_PASSCODE_LENGTH);
    }
}
