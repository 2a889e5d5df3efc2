use std::sync::Arc;

use wisp_storage::{ThreadId, ThreadRecord};

use super::bus::BroadcastBus;
use super::events::{BusEvent, ScopeKey};
use super::view_store::ViewStateStore;

/// Decides and republishes the active thread id whenever the thread set or
/// the stored selection changes.
///
/// Two informal states: *unresolved* (no valid selection, or auto-selection
/// suppressed while a new chat is being staged) and *resolved* (the stored id
/// points at a thread present in the current list). Reaffirming an unchanged
/// selection is deliberate: late-mounting surfaces missed the original
/// publish and converge off the repeat.
pub struct SelectionController {
    scope: ScopeKey,
    store: Arc<ViewStateStore>,
    bus: BroadcastBus,
}

impl SelectionController {
    pub fn new(scope: ScopeKey, store: Arc<ViewStateStore>, bus: BroadcastBus) -> Self {
        Self { scope, store, bus }
    }

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// Reconciles the stored selection against the current thread list and
    /// republishes the outcome. Returns the resolved id, or `None` while
    /// unresolved.
    pub fn reconcile(&self, threads: &[ThreadRecord]) -> Option<ThreadId> {
        if self.store.suppress_auto_select(&self.scope) {
            return None;
        }

        if let Some(stored) = self.store.selected_id(&self.scope)
            && threads.iter().any(|thread| thread.id == stored)
        {
            self.publish_selection(stored);
            return Some(stored);
        }

        let first = threads.first()?;
        if let Err(error) = self.store.set_selected_id(&self.scope, Some(first.id)) {
            tracing::warn!(scope = %self.scope, "failed to persist fallback selection: {error}");
        }
        self.publish_selection(first.id);
        Some(first.id)
    }

    /// Explicit selection request from a surface. Clears any staging
    /// suppression: the user picked something concrete.
    pub fn select(&self, thread_id: ThreadId) {
        if let Err(error) = self.store.set_suppress_auto_select(&self.scope, false) {
            tracing::warn!(scope = %self.scope, "failed to clear suppression flag: {error}");
        }
        if let Err(error) = self.store.set_selected_id(&self.scope, Some(thread_id)) {
            tracing::warn!(scope = %self.scope, "failed to persist selection: {error}");
        }
        self.publish_selection(thread_id);
    }

    pub fn clear(&self) {
        if let Err(error) = self.store.set_selected_id(&self.scope, None) {
            tracing::warn!(scope = %self.scope, "failed to clear persisted selection: {error}");
        }
        self.bus.publish(&BusEvent::SelectionCleared {
            scope: self.scope.clone(),
        });
    }

    /// "Start a new chat" was requested: force the controller unresolved so
    /// list refreshes don't steal the selection while the new thread is still
    /// temporary and invisible.
    pub fn begin_new_chat(&self) {
        if let Err(error) = self.store.set_suppress_auto_select(&self.scope, true) {
            tracing::warn!(scope = %self.scope, "failed to set suppression flag: {error}");
        }
        self.bus.publish(&BusEvent::SelectionCleared {
            scope: self.scope.clone(),
        });
    }

    /// Records the freshly created (still temporary) thread as the stored
    /// selection. Suppression stays on until activation clears it, at which
    /// point reconciliation finds this id in the list and resolves to it.
    pub fn stage_new_chat(&self, thread_id: ThreadId) {
        if let Err(error) = self.store.set_selected_id(&self.scope, Some(thread_id)) {
            tracing::warn!(scope = %self.scope, "failed to stage new-chat selection: {error}");
        }
    }

    /// Reacts to selection requests broadcast by other surfaces in the same
    /// scope.
    pub fn handle_event(&self, event: &BusEvent) {
        if let BusEvent::SelectRequested { scope, thread_id } = event
            && *scope == self.scope
        {
            self.select(*thread_id);
        }
    }

    fn publish_selection(&self, thread_id: ThreadId) {
        self.bus.publish(&BusEvent::SelectionChanged {
            scope: self.scope.clone(),
            thread_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::view_store::VIEW_STATE_FILE_NAME;

    use super::*;

    fn listed(id: ThreadId) -> ThreadRecord {
        ThreadRecord {
            id,
            title: "thread".to_string(),
            created_at_unix_ms: 1,
            updated_at_unix_ms: 1,
            last_msg_at_unix_ms: 1,
            size_chars: 0,
            size_tokens: 0,
            active: true,
            deleted: false,
            pinned: false,
            temporary: false,
        }
    }

    struct Fixture {
        controller: SelectionController,
        store: Arc<ViewStateStore>,
        published: Arc<Mutex<Vec<BusEvent>>>,
        _subscription: crate::bus::Subscription,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ViewStateStore::open(
            dir.path().join(VIEW_STATE_FILE_NAME),
        ));
        let bus = BroadcastBus::new();
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        let subscription = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        Fixture {
            controller: SelectionController::new(
                ScopeKey::new("history"),
                Arc::clone(&store),
                bus,
            ),
            store,
            published,
            _subscription: subscription,
            _dir: dir,
        }
    }

    fn scope() -> ScopeKey {
        ScopeKey::new("history")
    }

    #[test]
    fn stored_id_present_in_list_is_republished_unchanged() {
        let fixture = fixture();
        let kept = ThreadId::new_v7();
        fixture.store.set_selected_id(&scope(), Some(kept)).unwrap();

        let resolved = fixture
            .controller
            .reconcile(&[listed(ThreadId::new_v7()), listed(kept)]);

        assert_eq!(resolved, Some(kept));
        assert_eq!(fixture.store.selected_id(&scope()), Some(kept));
        assert_eq!(
            fixture.published.lock().unwrap().as_slice(),
            &[BusEvent::SelectionChanged {
                scope: scope(),
                thread_id: kept
            }]
        );
    }

    #[test]
    fn stale_stored_id_falls_back_to_first_listed_thread() {
        let fixture = fixture();
        fixture
            .store
            .set_selected_id(&scope(), Some(ThreadId::new_v7()))
            .unwrap();

        let first = ThreadId::new_v7();
        let resolved = fixture
            .controller
            .reconcile(&[listed(first), listed(ThreadId::new_v7())]);

        assert_eq!(resolved, Some(first));
        assert_eq!(fixture.store.selected_id(&scope()), Some(first));
    }

    #[test]
    fn empty_list_stays_unresolved_and_silent() {
        let fixture = fixture();
        assert_eq!(fixture.controller.reconcile(&[]), None);
        assert!(fixture.published.lock().unwrap().is_empty());
    }

    #[test]
    fn suppression_blocks_auto_selection_until_cleared() {
        let fixture = fixture();
        let staged = ThreadId::new_v7();

        fixture.controller.begin_new_chat();
        fixture.controller.stage_new_chat(staged);

        let other = ThreadId::new_v7();
        assert_eq!(fixture.controller.reconcile(&[listed(other)]), None);

        // Activation clears the flag; the staged id is now in the list.
        fixture
            .store
            .set_suppress_auto_select(&scope(), false)
            .unwrap();
        let resolved = fixture.controller.reconcile(&[listed(staged), listed(other)]);
        assert_eq!(resolved, Some(staged));
    }

    #[test]
    fn explicit_select_clears_suppression() {
        let fixture = fixture();
        fixture.controller.begin_new_chat();

        let picked = ThreadId::new_v7();
        fixture.controller.select(picked);

        assert!(!fixture.store.suppress_auto_select(&scope()));
        assert_eq!(fixture.store.selected_id(&scope()), Some(picked));
    }

    #[test]
    fn select_requests_from_other_scopes_are_ignored() {
        let fixture = fixture();
        let foreign = ThreadId::new_v7();
        fixture.controller.handle_event(&BusEvent::SelectRequested {
            scope: ScopeKey::new("workbench"),
            thread_id: foreign,
        });
        assert_eq!(fixture.store.selected_id(&scope()), None);

        let ours = ThreadId::new_v7();
        fixture.controller.handle_event(&BusEvent::SelectRequested {
            scope: scope(),
            thread_id: ours,
        });
        assert_eq!(fixture.store.selected_id(&scope()), Some(ours));
    }
}
