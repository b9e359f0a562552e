use std::time::Duration;

use crate::settings::ReconnectionSettings;

/// Exponential backoff between reconnection attempts.
///
/// Attempt 1 runs immediately. Attempt `n > 1` waits
/// `min(base * multiplier^(n-2), cap)`, so the defaults give 0s, 2s, 4s, 8s, 16s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            multiplier: 2,
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn from_settings(settings: &ReconnectionSettings) -> Self {
        Self {
            base: Duration::from_secs(settings.base_delay_secs),
            multiplier: settings.multiplier.max(1),
            cap: Duration::from_secs(settings.max_delay_secs),
            max_attempts: settings.max_attempts.max(1),
        }
    }

    /// Delay to sleep before attempt number `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self
            .multiplier
            .checked_pow(attempt - 2)
            .unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Delays before each attempt, `attempts` long.
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (1..=attempts).map(|n| self.delay_before(n)).collect()
    }
}
