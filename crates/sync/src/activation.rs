use std::sync::Arc;

use tokio::sync::mpsc;
use wisp_storage::ThreadId;

use super::bus::BroadcastBus;
use super::events::{BusEvent, ScopeKey};
use super::view_store::ViewStateStore;

/// Consumes the backend's activation signal and finishes the temporary →
/// listed transition on the view side.
///
/// The backend already cleared its own temporary flag; this monitor clears
/// the persisted overlay and the auto-select suppression flag, then
/// republishes activation so surfaces refresh their listings. A temporary
/// thread that never activates simply never reaches this path; it stays
/// invisible and is not reaped here.
#[derive(Clone)]
pub struct ActivationMonitor {
    scope: ScopeKey,
    store: Arc<ViewStateStore>,
    bus: BroadcastBus,
}

impl ActivationMonitor {
    pub fn new(scope: ScopeKey, store: Arc<ViewStateStore>, bus: BroadcastBus) -> Self {
        Self { scope, store, bus }
    }

    /// Marks (or unmarks) a thread as ephemeral in the persisted overlay and
    /// broadcasts the toggle.
    pub fn mark_temporary(&self, thread_id: ThreadId, is_temporary: bool) {
        let result = if is_temporary {
            self.store.set_temp_flag(&self.scope, thread_id, true)
        } else {
            self.store.clear_temp_flag(&self.scope, thread_id)
        };
        if let Err(error) = result {
            tracing::warn!(thread_id = %thread_id, "failed to persist temp flag: {error}");
        }

        self.bus.publish(&BusEvent::TempToggled {
            scope: self.scope.clone(),
            thread_id,
            is_temporary,
        });
    }

    /// One activation: clear the suppression flag and the temp overlay, then
    /// announce the thread so listings refresh.
    pub fn handle_activation(&self, thread_id: ThreadId) {
        if let Err(error) = self.store.set_suppress_auto_select(&self.scope, false) {
            tracing::warn!(scope = %self.scope, "failed to clear suppression on activation: {error}");
        }
        if let Err(error) = self.store.clear_temp_flag(&self.scope, thread_id) {
            tracing::warn!(thread_id = %thread_id, "failed to clear temp overlay on activation: {error}");
        }

        tracing::debug!(thread_id = %thread_id, "thread activated");
        self.bus.publish(&BusEvent::ThreadActivated { thread_id });
    }

    /// Drains the backend signal until the backend drops its sender.
    pub fn spawn(self, mut signal: mpsc::UnboundedReceiver<ThreadId>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(thread_id) = signal.recv().await {
                self.handle_activation(thread_id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use wisp_storage::{ChatBackend, LatencyProfile, MemoryBackend, NewMessage, Role};

    use crate::view_store::VIEW_STATE_FILE_NAME;

    use super::*;

    fn scope() -> ScopeKey {
        ScopeKey::new("history")
    }

    #[tokio::test]
    async fn activation_clears_overlay_and_suppression_then_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ViewStateStore::open(
            dir.path().join(VIEW_STATE_FILE_NAME),
        ));
        let bus = BroadcastBus::new();
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        let _subscription = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let monitor = ActivationMonitor::new(scope(), Arc::clone(&store), bus);
        let thread_id = ThreadId::new_v7();
        store.set_suppress_auto_select(&scope(), true).unwrap();
        monitor.mark_temporary(thread_id, true);

        monitor.handle_activation(thread_id);

        assert!(!store.suppress_auto_select(&scope()));
        assert!(!store.is_marked_temporary(&scope(), thread_id));
        assert_eq!(
            published.lock().unwrap().last(),
            Some(&BusEvent::ThreadActivated { thread_id })
        );
    }

    #[tokio::test]
    async fn backend_signal_drives_the_monitor_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ViewStateStore::open(
            dir.path().join(VIEW_STATE_FILE_NAME),
        ));
        let bus = BroadcastBus::new();
        let backend = MemoryBackend::new(LatencyProfile::Disabled);
        let signal = backend.take_activation_signal().unwrap();

        let monitor = ActivationMonitor::new(scope(), Arc::clone(&store), bus.clone());
        let worker = monitor.spawn(signal);

        store.set_suppress_auto_select(&scope(), true).unwrap();
        let thread = backend.create_thread(None).await.unwrap();
        backend
            .add_message(thread.id, NewMessage::new(Role::User, "first"))
            .await
            .unwrap()
            .unwrap();

        // The signal is drained on the same current-thread runtime; yield
        // until the monitor has observed it.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if !store.suppress_auto_select(&scope()) {
                break;
            }
        }
        assert!(!store.suppress_auto_select(&scope()));

        drop(backend);
        worker.await.unwrap();
    }
}
