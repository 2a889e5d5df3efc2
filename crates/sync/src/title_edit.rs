use std::sync::{Arc, Mutex};

use wisp_storage::{ChatBackend, ThreadId};

use super::bus::BroadcastBus;
use super::events::{BusEvent, ScopeKey, SurfaceTag};
use super::view_store::ViewStateStore;

#[derive(Debug, Clone)]
struct ActiveDraft {
    thread_id: ThreadId,
    draft: String,
}

/// Per-thread ephemeral title edit session.
///
/// While a session is open every keystroke is broadcast as a typing event so
/// other mounted surfaces can mirror the draft without committing it. Commit
/// writes the trimmed draft to the backend *and* the persisted title map;
/// cancel discards the draft and publishes nothing. A whitespace-only commit
/// is a silent no-op and the prior title survives.
pub struct TitleEditController {
    scope: ScopeKey,
    surface: SurfaceTag,
    store: Arc<ViewStateStore>,
    backend: Arc<dyn ChatBackend>,
    bus: BroadcastBus,
    active: Mutex<Option<ActiveDraft>>,
}

impl TitleEditController {
    pub fn new(
        scope: ScopeKey,
        surface: SurfaceTag,
        store: Arc<ViewStateStore>,
        backend: Arc<dyn ChatBackend>,
        bus: BroadcastBus,
    ) -> Self {
        Self {
            scope,
            surface,
            store,
            backend,
            bus,
            active: Mutex::new(None),
        }
    }

    pub fn surface(&self) -> &SurfaceTag {
        &self.surface
    }

    /// Opens an edit session seeded from the currently displayed title.
    /// Returns `None` (and opens nothing) when the thread is gone or the
    /// backend lookup fails.
    pub async fn begin(&self, thread_id: ThreadId) -> Option<String> {
        let thread = match self.backend.get_by_id(thread_id).await {
            Ok(thread) => thread?,
            Err(error) => {
                tracing::warn!(thread_id = %thread_id, "title edit begin failed: {error}");
                return None;
            }
        };

        let seeded = self.store.display_title(&self.scope, &thread);
        *self.lock_active() = Some(ActiveDraft {
            thread_id,
            draft: seeded.clone(),
        });
        Some(seeded)
    }

    /// Replaces the draft and broadcasts it live. Ignored when no session is
    /// open.
    pub fn input(&self, draft: impl Into<String>) {
        let mut active = self.lock_active();
        let Some(session) = active.as_mut() else {
            return;
        };
        session.draft = draft.into();

        self.bus.publish(&BusEvent::TitleTyping {
            scope: self.scope.clone(),
            thread_id: session.thread_id,
            draft: session.draft.clone(),
            source: self.surface.clone(),
        });
    }

    /// Commits the trimmed draft and closes the session. Returns the
    /// committed title, or `None` when the draft was blank or persistence
    /// failed (either way the prior title stands).
    pub async fn commit(&self) -> Option<String> {
        let session = self.lock_active().take()?;
        let trimmed = session.draft.trim();
        if trimmed.is_empty() {
            return None;
        }
        let title = trimmed.to_string();

        if let Err(error) = self
            .backend
            .update_title(session.thread_id, title.clone())
            .await
        {
            tracing::warn!(thread_id = %session.thread_id, "title commit rejected by backend: {error}");
            return None;
        }
        if let Err(error) = self
            .store
            .set_title_overlay(&self.scope, session.thread_id, title.clone())
        {
            tracing::warn!(thread_id = %session.thread_id, "failed to persist committed title: {error}");
        }

        self.bus.publish(&BusEvent::TitleCommitted {
            scope: self.scope.clone(),
            thread_id: session.thread_id,
            title: title.clone(),
        });
        Some(title)
    }

    /// Discards the draft; nothing is published.
    pub fn cancel(&self) {
        self.lock_active().take();
    }

    pub fn active_draft(&self) -> Option<(ThreadId, String)> {
        self.lock_active()
            .as_ref()
            .map(|session| (session.thread_id, session.draft.clone()))
    }

    /// Filters a typing event down to drafts this surface should mirror:
    /// same scope, different originating surface. The tag check is the guard
    /// that keeps an editor from re-applying its own echo.
    pub fn mirror(&self, event: &BusEvent) -> Option<(ThreadId, String)> {
        match event {
            BusEvent::TitleTyping {
                scope,
                thread_id,
                draft,
                source,
            } if *scope == self.scope && *source != self.surface => {
                Some((*thread_id, draft.clone()))
            }
            _ => None,
        }
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveDraft>> {
        self.active.lock().expect("title draft mutex poisoned")
    }
}
