use crate::node_description::NodeDescription;
use crate::probe::IdentityProbeResult;
use docdb_common::types::Endpoint;
use docdb_common::DocDbError;
use metrics::counter;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::warn;

/// A published transition from one description to the next
#[derive(Debug, Clone)]
pub struct DescriptionChangedEvent {
    pub previous: Arc<NodeDescription>,
    pub current: Arc<NodeDescription>,
}

/// Observer of a node monitor.
///
/// Every hook has a no-op default. Hooks run on the heartbeat loop and must
/// return quickly; a panicking hook is logged and skipped.
pub trait MonitorListener: Send + Sync {
    fn sending_heartbeat(&self, _endpoint: &Endpoint) {}

    fn sent_heartbeat(&self, _endpoint: &Endpoint, _round_trip: Duration, _identity: &IdentityProbeResult) {}

    fn heartbeat_failed(&self, _endpoint: &Endpoint, _error: &DocDbError) {}

    fn description_changed(&self, _event: &DescriptionChangedEvent) {}
}

type Entry = (u64, Arc<dyn MonitorListener>);

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Entry>>,
}

/// Set of listeners attached to one monitor
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn MonitorListener>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
            active: true,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `hook` against every listener registered right now. Panics are
    /// contained per listener.
    pub(crate) fn notify<F>(&self, hook: &'static str, f: F)
    where
        F: Fn(&dyn MonitorListener),
    {
        let snapshot: Vec<Arc<dyn MonitorListener>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))) {
                warn!(hook, "Monitor listener panicked: {}", panic_message(panic.as_ref()));
                counter!("docdb.monitor.listener_failures", "hook" => hook).increment(1);
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle for one registered listener; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<RegistryInner>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the listener registered for the monitor's whole lifetime
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
