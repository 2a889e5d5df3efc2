use std::sync::{Arc, Mutex, Weak};

use super::events::BusEvent;

type Listener = Arc<dyn Fn(&BusEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Process-wide synchronous broadcast channel.
///
/// `publish` delivers to every listener registered at publish time, in
/// registration order, before returning. There is no history and no replay:
/// a listener mounted after a publish misses it, which is exactly why the
/// persistent view store exists as the durable fallback.
#[derive(Clone, Default)]
pub struct BroadcastBus {
    registry: Arc<Mutex<Registry>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Registration takes effect for subsequent
    /// publishes only. Dropping the returned guard unsubscribes.
    pub fn subscribe(&self, listener: impl Fn(&BusEvent) + Send + Sync + 'static) -> Subscription {
        let mut registry = self.lock_registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Synchronous fan-out. The listener list is snapshotted first, so a
    /// listener may subscribe or unsubscribe reentrantly; such changes apply
    /// to the next publish, never the in-flight one.
    pub fn publish(&self, event: &BusEvent) {
        let snapshot: Vec<Listener> = {
            let registry = self.lock_registry();
            registry
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        tracing::trace!(event = event.wire_name(), listeners = snapshot.len(), "bus publish");
        for listener in snapshot {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_registry().listeners.len()
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().expect("bus registry mutex poisoned")
    }
}

/// Subscription guard; dropping it removes the listener.
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade()
            && let Ok(mut registry) = registry.lock()
        {
            registry.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
