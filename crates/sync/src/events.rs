use std::fmt;

use wisp_storage::{ThreadId, ThreadRecord};

/// Partitions events and persisted keys by owning feature area, so multiple
/// independent surface instances can share one process without cross-talk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifies which mounted surface originated a live-typing event, so an
/// editor never re-applies its own echoed draft.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SurfaceTag(String);

impl SurfaceTag {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceTag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Closed union of everything the broadcast bus carries. One variant per wire
/// event, so dispatch sites get exhaustiveness checking instead of duck-typed
/// payload probing.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// The active thread changed for a scope.
    SelectionChanged { scope: ScopeKey, thread_id: ThreadId },
    /// A surface is live-typing a title draft; nothing is committed yet.
    TitleTyping {
        scope: ScopeKey,
        thread_id: ThreadId,
        draft: String,
        source: SurfaceTag,
    },
    /// A title edit session committed.
    TitleCommitted {
        scope: ScopeKey,
        thread_id: ThreadId,
        title: String,
    },
    /// The ephemeral overlay flag flipped for a thread.
    TempToggled {
        scope: ScopeKey,
        thread_id: ThreadId,
        is_temporary: bool,
    },
    /// A temporary thread received its first user message.
    ThreadActivated { thread_id: ThreadId },
    /// A freshly created (still temporary) thread exists in the backend.
    ThreadCreated { thread: ThreadRecord },
    /// Drop any active selection for a scope.
    SelectionCleared { scope: ScopeKey },
    /// A surface asks the thread list to select a specific thread.
    SelectRequested { scope: ScopeKey, thread_id: ThreadId },
    /// A surface asks the panel for a tab to toggle.
    PanelToggleRequested { scope: ScopeKey, tab: String },
    /// The panel reports its open state after a toggle.
    PanelStateChanged {
        scope: ScopeKey,
        tab: String,
        is_open: bool,
    },
}

impl BusEvent {
    /// Stable wire name, used for logging and diagnostics only; dispatch
    /// always matches on the variant.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::SelectionChanged { .. } => "chat-selection-change",
            Self::TitleTyping { .. } => "chat-title-typing",
            Self::TitleCommitted { .. } => "chat-title-update",
            Self::TempToggled { .. } => "chat-temp-toggle",
            Self::ThreadActivated { .. } => "chat-activated",
            Self::ThreadCreated { .. } => "new-chat-created",
            Self::SelectionCleared { .. } => "clear-history-selection",
            Self::SelectRequested { .. } => "select-history-chat",
            Self::PanelToggleRequested { .. } => "toggle-second-layer-menu",
            Self::PanelStateChanged { .. } => "second-layer-menu-state-change",
        }
    }

    /// Owning scope, when the event is scope-partitioned. Activation and
    /// creation are process-global.
    pub fn scope(&self) -> Option<&ScopeKey> {
        match self {
            Self::SelectionChanged { scope, .. }
            | Self::TitleTyping { scope, .. }
            | Self::TitleCommitted { scope, .. }
            | Self::TempToggled { scope, .. }
            | Self::SelectionCleared { scope }
            | Self::SelectRequested { scope, .. }
            | Self::PanelToggleRequested { scope, .. }
            | Self::PanelStateChanged { scope, .. } => Some(scope),
            Self::ThreadActivated { .. } | Self::ThreadCreated { .. } => None,
        }
    }
}
