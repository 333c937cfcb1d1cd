//! Admission protocol settings

use crate::attendance::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defaults for new matches and the conflict retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    /// Capacity used when a match is scheduled without one
    pub default_capacity: u32,
    /// Waitlist flag used when a match is scheduled without one
    pub default_waitlist_enabled: bool,
    /// Attempts per operation before a conflict reaches the caller
    pub max_transaction_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Run the background waitlist sweeper
    pub enable_sweeper: bool,
    pub sweep_interval_seconds: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            default_capacity: 14,
            default_waitlist_enabled: true,
            max_transaction_attempts: 10,
            retry_base_delay_ms: 5,
            retry_max_delay_ms: 200,
            enable_sweeper: true,
            sweep_interval_seconds: 30,
        }
    }
}

impl AdmissionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_transaction_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let settings = AdmissionSettings::default();
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.default_capacity, 14);
    }
}
