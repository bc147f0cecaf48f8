//! # Presence Tracker
//!
//! The set of identities whose client currently reports an online-equivalent
//! status. Updated by presence events and replaced wholesale by snapshot
//! reconciliation. Never persisted.

use std::collections::HashSet;
use std::sync::RwLock;

/// Thread-safe online set.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: RwLock<HashSet<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_online(&self, identity: &str) {
        let mut online = self.online.write().unwrap_or_else(|p| p.into_inner());
        if !online.contains(identity) {
            online.insert(identity.to_string());
        }
    }

    pub fn mark_offline(&self, identity: &str) {
        let mut online = self.online.write().unwrap_or_else(|p| p.into_inner());
        online.remove(identity);
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.online
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(identity)
    }

    /// Copy of the current set; later mutations do not affect it.
    pub fn snapshot(&self) -> HashSet<String> {
        self.online.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.online.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the whole set with `online` (a fresh full snapshot).
    pub fn reconcile<I>(&self, online: I)
    where
        I: IntoIterator<Item = String>,
    {
        let fresh: HashSet<String> = online.into_iter().collect();
        let mut current = self.online.write().unwrap_or_else(|p| p.into_inner());
        let joined = fresh.difference(&current).count();
        let left = current.difference(&fresh).count();
        *current = fresh;
        tracing::debug!(online = current.len(), joined, left, "presence reconciled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_call_wins() {
        let presence = PresenceTracker::new();
        presence.mark_online("a");
        presence.mark_offline("a");
        presence.mark_online("a");
        assert!(presence.is_online("a"));
        presence.mark_offline("a");
        assert!(!presence.is_online("a"));
    }

    #[test]
    fn test_repeated_calls_are_idempotent() {
        let presence = PresenceTracker::new();
        presence.mark_online("a");
        presence.mark_online("a");
        assert_eq!(presence.len(), 1);
        presence.mark_offline("b");
        presence.mark_offline("b");
        assert_eq!(presence.snapshot(), HashSet::from(["a".to_string()]));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let presence = PresenceTracker::new();
        presence.mark_online("a");
        let snap = presence.snapshot();
        presence.mark_offline("a");
        assert!(snap.contains("a"));
        assert!(presence.is_empty());
    }

    #[test]
    fn test_reconcile_replaces_set() {
        let presence = PresenceTracker::new();
        presence.mark_online("stale");
        presence.mark_online("kept");
        presence.reconcile(vec!["kept".to_string(), "new".to_string()]);
        assert!(!presence.is_online("stale"));
        assert!(presence.is_online("kept"));
        assert!(presence.is_online("new"));
        assert_eq!(presence.len(), 2);
    }
}
