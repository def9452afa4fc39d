//! Severity latch per alert key

use std::collections::HashMap;

use tracing::debug;

use crate::models::{AlertKey, Severity};

/// Last observed severity per alert key.
///
/// Only a strict upward transition notifies. Every observation is recorded,
/// including downward moves, so a recovered condition can escalate again.
#[derive(Debug, Default)]
pub struct AlertStateStore {
    last_level: HashMap<AlertKey, Severity>,
}

impl AlertStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `new_level` for `key` and report whether it is an escalation
    pub fn should_notify(&mut self, key: &AlertKey, new_level: Severity) -> bool {
        let previous = self
            .last_level
            .insert(key.clone(), new_level)
            .unwrap_or_default();

        let escalated = new_level > previous;

        debug!(
            key = %key,
            previous = ?previous,
            current = ?new_level,
            escalated,
            "Latch updated"
        );

        escalated
    }

    /// Last recorded severity for `key`
    pub fn level(&self, key: &AlertKey) -> Severity {
        self.last_level.get(key).copied().unwrap_or_default()
    }

    /// Number of keys tracked
    pub fn len(&self) -> usize {
        self.last_level.len()
    }

    /// Whether no key has been observed yet
    pub fn is_empty(&self) -> bool {
        self.last_level.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricFamily;

    fn key() -> AlertKey {
        AlertKey::subject(MetricFamily::Profit, "pos-1")
    }

    #[test]
    fn test_same_level_notifies_once() {
        let mut store = AlertStateStore::new();
        assert!(store.should_notify(&key(), Severity::Medium));
        assert!(!store.should_notify(&key(), Severity::Medium));
    }

    #[test]
    fn test_first_none_does_not_notify() {
        let mut store = AlertStateStore::new();
        assert!(!store.should_notify(&key(), Severity::None));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_recovery_resets_floor() {
        let mut store = AlertStateStore::new();
        assert!(store.should_notify(&key(), Severity::High));
        assert!(!store.should_notify(&key(), Severity::Low));
        assert_eq!(store.level(&key()), Severity::Low);
        assert!(store.should_notify(&key(), Severity::Medium));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut store = AlertStateStore::new();
        let other = AlertKey::subject(MetricFamily::Profit, "pos-2");
        assert!(store.should_notify(&key(), Severity::High));
        assert!(store.should_notify(&other, Severity::Low));
        assert_eq!(store.level(&key()), Severity::High);
    }
}
