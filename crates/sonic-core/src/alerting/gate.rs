//! Time-window gates
//!
//! [`CooldownGate`] limits how often a logical alert condition may produce a
//! message. [`NotificationGate`] limits how often the physical call channel
//! may be used. Both are keyed timestamp maps over the same primitive.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::AlertKey;

/// Keyed "last stamped at" map with a minimum interval check
#[derive(Debug, Default)]
pub struct TimedGate {
    last_at: HashMap<AlertKey, DateTime<Utc>>,
}

impl TimedGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `window` has elapsed since `key` was last stamped. Does not mutate.
    pub fn is_open(&self, key: &AlertKey, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_at.get(key) {
            None => true,
            Some(last) => now.signed_duration_since(*last) >= window,
        }
    }

    /// Stamp `key` at `now`
    pub fn stamp(&mut self, key: &AlertKey, now: DateTime<Utc>) {
        self.last_at.insert(key.clone(), now);
    }

    /// Check and, if open, stamp
    pub fn allow(&mut self, key: &AlertKey, now: DateTime<Utc>, window: Duration) -> bool {
        if self.is_open(key, now, window) {
            self.stamp(key, now);
            true
        } else {
            false
        }
    }

    /// Time `key` was last stamped
    pub fn last(&self, key: &AlertKey) -> Option<DateTime<Utc>> {
        self.last_at.get(key).copied()
    }
}

/// Minimum interval between two messages for the same alert key
#[derive(Debug, Default)]
pub struct CooldownGate {
    inner: TimedGate,
}

impl CooldownGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a message for `key` and stamp it, or refuse inside the window
    pub fn allow(&mut self, key: &AlertKey, now: DateTime<Utc>, window: Duration) -> bool {
        self.inner.allow(key, now, window)
    }

    /// Time a message for `key` was last admitted
    pub fn last_fired(&self, key: &AlertKey) -> Option<DateTime<Utc>> {
        self.inner.last(key)
    }
}

/// Refractory period of the outbound call channel.
///
/// Checked before a call and stamped only once the call was placed or the
/// provider reported one already active, so a failed call is retried next cycle.
#[derive(Debug, Default)]
pub struct NotificationGate {
    inner: TimedGate,
}

impl NotificationGate {
    /// Create an empty gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the channel for `key` may be used at `now`
    pub fn is_open(&self, key: &AlertKey, now: DateTime<Utc>, window: Duration) -> bool {
        self.inner.is_open(key, now, window)
    }

    /// Record a call on the channel for `key`
    pub fn record_call(&mut self, key: &AlertKey, now: DateTime<Utc>) {
        self.inner.stamp(key, now);
    }

    /// Time the channel for `key` was last used
    pub fn last_call(&self, key: &AlertKey) -> Option<DateTime<Utc>> {
        self.inner.last(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricFamily;
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn key() -> AlertKey {
        AlertKey::subject(MetricFamily::Profit, "pos-1")
    }

    #[rstest]
    #[case(500, false)]
    #[case(899, false)]
    #[case(900, true)]
    #[case(901, true)]
    fn test_cooldown_window(#[case] offset_secs: i64, #[case] allowed: bool) {
        let mut gate = CooldownGate::new();
        let window = Duration::seconds(900);
        assert!(gate.allow(&key(), t0(), window));
        assert_eq!(
            gate.allow(&key(), t0() + Duration::seconds(offset_secs), window),
            allowed
        );
    }

    #[test]
    fn test_cooldown_refusal_does_not_restamp() {
        let mut gate = CooldownGate::new();
        let window = Duration::seconds(900);
        assert!(gate.allow(&key(), t0(), window));
        assert!(!gate.allow(&key(), t0() + Duration::seconds(500), window));
        assert_eq!(gate.last_fired(&key()), Some(t0()));
        assert!(gate.allow(&key(), t0() + Duration::seconds(901), window));
    }

    #[test]
    fn test_zero_window_always_allows() {
        let mut gate = CooldownGate::new();
        assert!(gate.allow(&key(), t0(), Duration::zero()));
        assert!(gate.allow(&key(), t0(), Duration::zero()));
    }

    #[test]
    fn test_notification_gate_only_closes_on_record() {
        let mut gate = NotificationGate::new();
        let window = Duration::seconds(3600);
        let channel = AlertKey::aggregated();

        assert!(gate.is_open(&channel, t0(), window));
        assert!(gate.is_open(&channel, t0(), window));

        gate.record_call(&channel, t0());
        assert!(!gate.is_open(&channel, t0() + Duration::seconds(1800), window));
        assert!(gate.is_open(&channel, t0() + Duration::seconds(3600), window));
        assert_eq!(gate.last_call(&channel), Some(t0()));
    }
}
