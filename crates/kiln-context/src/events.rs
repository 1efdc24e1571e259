//! Event subscription hub shared by all modules.
//!
//! The hub only records who listens to what. Translating host events into
//! module calls is the job of the adapter that owns the module instances.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use kiln_workspace::ModuleId;

use crate::error::{ContextError, ContextResult};
use crate::lock;

/// Host-wide subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id.
    #[must_use]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id, as handed to module code.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug)]
struct Subscription {
    owner: ModuleId,
    topic: String,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

/// Registry of event subscriptions across all modules.
#[derive(Debug, Default)]
pub struct EventHub {
    state: Mutex<HubState>,
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `owner` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidName`] for a blank topic.
    pub fn subscribe(&self, owner: &ModuleId, topic: &str) -> ContextResult<SubscriptionId> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ContextError::InvalidName("event topic must not be blank".into()));
        }
        let mut state = lock(&self.state);
        let id = SubscriptionId(state.next_id);
        state.next_id = state.next_id.saturating_add(1);
        state.subscriptions.insert(
            id,
            Subscription {
                owner: owner.clone(),
                topic: topic.to_string(),
            },
        );
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.state).subscriptions.remove(&id).is_some()
    }

    /// Subscribers of `topic`, in subscription order.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<(ModuleId, SubscriptionId)> {
        lock(&self.state)
            .subscriptions
            .iter()
            .filter(|(_, s)| s.topic == topic)
            .map(|(id, s)| (s.owner.clone(), *id))
            .collect()
    }

    /// Number of subscriptions held by `owner`.
    #[must_use]
    pub fn subscription_count(&self, owner: &ModuleId) -> usize {
        lock(&self.state)
            .subscriptions
            .values()
            .filter(|s| &s.owner == owner)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_unsubscribe() {
        let hub = EventHub::new();
        let a = ModuleId::from_static("a");
        let b = ModuleId::from_static("b");

        let s1 = hub.subscribe(&a, "player.join").unwrap();
        let s2 = hub.subscribe(&b, "player.join").unwrap();
        hub.subscribe(&b, "tick").unwrap();

        assert_eq!(hub.subscribers("player.join"), vec![(a.clone(), s1), (b.clone(), s2)]);
        assert_eq!(hub.subscription_count(&b), 2);

        assert!(hub.unsubscribe(s1));
        assert!(!hub.unsubscribe(s1));
        assert_eq!(hub.subscription_count(&a), 0);
    }

    #[test]
    fn blank_topic_is_rejected() {
        let hub = EventHub::new();
        assert!(hub.subscribe(&ModuleId::from_static("a"), "  ").is_err());
    }
}
