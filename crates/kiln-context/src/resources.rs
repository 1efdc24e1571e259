//! Per-module resource registry.
//!
//! Resources are released in [`ResourceKind`] order: subscriptions first so
//! no new work arrives, then tasks, then commands. Storage is owned by the
//! context and flushed after the registry is empty.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::error::{ContextError, ContextResult};
use crate::events::SubscriptionId;
use crate::lock;

/// Registry-local handle of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of a tracked resource, in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// Event subscription.
    Subscription,
    /// Spawned background task.
    Task,
    /// Registered command.
    Command,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Subscription => "subscription",
            Self::Task => "task",
            Self::Command => "command",
        })
    }
}

/// A resource the registry tracks on a module's behalf.
#[derive(Debug)]
pub enum TrackedResource {
    /// Event subscription.
    Subscription(SubscriptionId),
    /// Spawned task.
    Task(JoinHandle<()>),
    /// Registered command (normalized name).
    Command(String),
}

impl TrackedResource {
    /// Kind of this resource.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Subscription(_) => ResourceKind::Subscription,
            Self::Task(_) => ResourceKind::Task,
            Self::Command(_) => ResourceKind::Command,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Subscription(id) => format!("subscription {id}"),
            Self::Task(_) => "task".to_string(),
            Self::Command(name) => format!("command `{name}`"),
        }
    }
}

/// A resource found alive, or acquired, after teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Human-readable description.
    pub description: String,
}

#[derive(Debug, Default)]
struct State {
    closed: bool,
    next_id: u64,
    live: BTreeMap<ResourceId, TrackedResource>,
    draining: Vec<(ResourceId, AbortHandle)>,
    late: Vec<LeakedResource>,
}

/// Every resource one module currently holds.
#[derive(Debug)]
pub struct ResourceRegistry {
    owner: String,
    state: Mutex<State>,
}

impl ResourceRegistry {
    /// Create an empty registry for `owner`.
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Track a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Closed`] once the registry has been released.
    /// The rejected resource is recorded as a leak and, if it is a task,
    /// aborted.
    pub fn register(&self, resource: TrackedResource) -> ContextResult<ResourceId> {
        let mut state = lock(&self.state);
        if state.closed {
            warn!(module_id = %self.owner, resource = %resource.describe(), "Resource acquired after teardown");
            state.late.push(LeakedResource {
                kind: resource.kind(),
                description: format!("{} acquired after teardown", resource.describe()),
            });
            if let TrackedResource::Task(handle) = resource {
                handle.abort();
            }
            return Err(ContextError::Closed(self.owner.clone()));
        }
        let id = ResourceId(state.next_id);
        state.next_id = state.next_id.saturating_add(1);
        state.live.insert(id, resource);
        Ok(id)
    }

    /// Stop tracking a resource the module released itself.
    pub fn untrack(&self, id: ResourceId) -> Option<TrackedResource> {
        lock(&self.state).live.remove(&id)
    }

    /// Number of live resources of `kind`. Finished tasks are not counted.
    #[must_use]
    pub fn count(&self, kind: ResourceKind) -> usize {
        lock(&self.state)
            .live
            .values()
            .filter(|r| r.kind() == kind)
            .filter(|r| !matches!(r, TrackedResource::Task(h) if h.is_finished()))
            .count()
    }

    /// Whether [`release_all`](Self::release_all) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Close the registry and hand back everything it tracked, in release
    /// order. Tasks are aborted here and kept for the leak scan; the caller
    /// releases the rest. Returns an empty list on the second call.
    pub fn release_all(&self) -> Vec<TrackedResource> {
        let mut state = lock(&self.state);
        if state.closed {
            return Vec::new();
        }
        state.closed = true;

        let mut drained: Vec<_> = std::mem::take(&mut state.live).into_iter().collect();
        drained.sort_by_key(|(id, r)| (r.kind(), *id));

        let mut rest = Vec::with_capacity(drained.len());
        for (id, resource) in drained {
            match resource {
                TrackedResource::Task(handle) => {
                    let abort = handle.abort_handle();
                    handle.abort();
                    state.draining.push((id, abort));
                },
                other => rest.push(other),
            }
        }
        debug!(
            module_id = %self.owner,
            released = rest.len().saturating_add(state.draining.len()),
            "Released module resources"
        );
        rest
    }

    /// Resources still alive after teardown, plus any acquired after it.
    ///
    /// Before [`release_all`](Self::release_all) this is always empty.
    #[must_use]
    pub fn leaks(&self) -> Vec<LeakedResource> {
        let state = lock(&self.state);
        if !state.closed {
            return Vec::new();
        }
        state
            .draining
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| LeakedResource {
                kind: ResourceKind::Task,
                description: format!("task {id} still running after teardown"),
            })
            .chain(state.late.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn release_order_follows_kind() {
        let reg = ResourceRegistry::new("m");
        reg.register(TrackedResource::Command("b".into())).unwrap();
        reg.register(TrackedResource::Subscription(SubscriptionId::new(7)))
            .unwrap();
        reg.register(TrackedResource::Command("a".into())).unwrap();

        let released = reg.release_all();
        let kinds: Vec<_> = released.iter().map(TrackedResource::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Subscription,
                ResourceKind::Command,
                ResourceKind::Command
            ]
        );
        assert!(reg.release_all().is_empty());
    }

    #[tokio::test]
    async fn late_registration_is_rejected_and_leaked() {
        let reg = ResourceRegistry::new("m");
        reg.release_all();

        let err = reg
            .register(TrackedResource::Command("late".into()))
            .unwrap_err();
        assert!(matches!(err, ContextError::Closed(_)));

        let leaks = reg.leaks();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].kind, ResourceKind::Command);
    }

    #[tokio::test]
    async fn aborted_tasks_are_not_leaks_once_finished() {
        let reg = ResourceRegistry::new("m");
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        reg.register(TrackedResource::Task(handle)).unwrap();
        assert_eq!(reg.count(ResourceKind::Task), 1);

        reg.release_all();
        for _ in 0..50 {
            if reg.leaks().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reg.leaks().is_empty());
    }

    #[test]
    fn untrack_removes_resource() {
        let reg = ResourceRegistry::new("m");
        let id = reg.register(TrackedResource::Command("x".into())).unwrap();
        assert_eq!(reg.count(ResourceKind::Command), 1);
        assert!(reg.untrack(id).is_some());
        assert_eq!(reg.count(ResourceKind::Command), 0);
    }
}
