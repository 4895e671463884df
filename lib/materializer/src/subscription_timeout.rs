use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use vise::EncodeLabelValue;

/// What to do with an orphaned endpoint once its subscription timeout elapses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EncodeLabelValue,
)]
#[serde(rename_all = "lowercase")]
#[metrics(rename_all = "snake_case")]
pub enum SubscriptionTimeoutMode {
    /// Leave the endpoint alone.
    #[serde(alias = "no", alias = "off", alias = "false")]
    Noop,
    /// Log a warning and keep the endpoint connectable.
    Warn,
    /// Attach a terminal peer that cancels the endpoint.
    #[default]
    Cancel,
}

impl fmt::Display for SubscriptionTimeoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => write!(f, "noop"),
            Self::Warn => write!(f, "warn"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// How long an orphaned publisher or subscriber may stay without a peer, and what happens after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionTimeoutSettings {
    mode: SubscriptionTimeoutMode,
    timeout: Duration,
}

impl SubscriptionTimeoutSettings {
    const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);
    const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

    pub const fn new(mode: SubscriptionTimeoutMode, timeout: Duration) -> Self {
        Self { mode, timeout }
    }

    pub const fn mode(&self) -> SubscriptionTimeoutMode {
        self.mode
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub const fn with_mode(self, mode: SubscriptionTimeoutMode) -> Self {
        Self { mode, ..self }
    }

    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Whether orphans governed by these settings need to be tracked at all.
    pub fn is_enforced(&self) -> bool {
        self.mode != SubscriptionTimeoutMode::Noop
    }

    /// Granularity of the orphan sweep: a quarter of the timeout, within [1ms, 1s].
    pub fn sweep_interval(&self) -> Duration {
        (self.timeout / 4).clamp(Self::MIN_SWEEP_INTERVAL, Self::MAX_SWEEP_INTERVAL)
    }
}

impl Default for SubscriptionTimeoutSettings {
    fn default() -> Self {
        Self::new(SubscriptionTimeoutMode::Cancel, Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = SubscriptionTimeoutSettings::new(SubscriptionTimeoutMode::Warn, Duration::from_millis(100));
        let b = SubscriptionTimeoutSettings::default()
            .with_mode(SubscriptionTimeoutMode::Warn)
            .with_timeout(Duration::from_millis(100));
        assert_eq!(a, b);
        assert_ne!(a, a.with_timeout(Duration::from_millis(101)));
        assert_ne!(a, a.with_mode(SubscriptionTimeoutMode::Cancel));
    }

    #[test]
    fn sweep_interval_is_clamped() {
        let settings = SubscriptionTimeoutSettings::default();
        assert_eq!(
            settings.with_timeout(Duration::from_millis(100)).sweep_interval(),
            Duration::from_millis(25)
        );
        assert_eq!(
            settings.with_timeout(Duration::ZERO).sweep_interval(),
            Duration::from_millis(1)
        );
        assert_eq!(
            settings.with_timeout(Duration::from_secs(60)).sweep_interval(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn noop_is_not_enforced() {
        let settings = SubscriptionTimeoutSettings::default();
        assert!(settings.is_enforced());
        assert!(!settings.with_mode(SubscriptionTimeoutMode::Noop).is_enforced());
    }
}
