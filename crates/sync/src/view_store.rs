use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};
use snafu::ResultExt;
use wisp_storage::{ThreadId, ThreadRecord};

use super::error::{
    CreateStateDirectorySnafu, ReplaceStateFileSnafu, SerializeStateSnafu, SyncResult,
    WriteStateSnafu,
};
use super::events::ScopeKey;
use super::folders::FolderRecord;

pub const VIEW_STATE_FILE_NAME: &str = "view-state.json";

/// Global (scope-independent) key holding folder membership records.
pub const FOLDERS_KEY: &str = "chat_folders";

const TITLES_SUFFIX: &str = "chat-titles";
const TEMP_CHATS_SUFFIX: &str = "temp-chats";
const SELECTED_ID_SUFFIX: &str = "selected-chat-id";
const PANEL_OPEN_SUFFIX: &str = "chat-history-menu-open";
const SUPPRESS_AUTO_SELECT_SUFFIX: &str = "suppress-auto-select";

/// Durable key-value store reconciling UI state across independently mounted
/// surfaces and across reloads.
///
/// Semantics are deliberately simple: last write wins, no versioning, and a
/// missing key always reads as the default. Where the backend and this store
/// disagree on a thread's title, the store wins for display purposes.
pub struct ViewStateStore {
    path: PathBuf,
    state: Mutex<Map<String, Value>>,
}

impl ViewStateStore {
    /// Opens the store at `path`, loading whatever state survived the last
    /// run. An unreadable or unparseable file degrades to empty state with a
    /// warning; it never fails the caller.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_from_disk(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Map<String, Value> {
        if !path.exists() {
            tracing::info!("view state not found at {:?}, starting empty", path);
            return Map::new();
        }

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!("failed to read view state from {:?}: {error}. starting empty", path);
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!(
                    "view state at {:?} is {} rather than an object. starting empty",
                    path,
                    json_type_name(&other)
                );
                Map::new()
            }
            Err(error) => {
                tracing::warn!("failed to parse view state at {:?}: {error}. starting empty", path);
                Map::new()
            }
        }
    }

    fn persist_locked(&self, state: &Map<String, Value>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateStateDirectorySnafu {
                stage: "create-view-state-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(&Value::Object(state.clone())).context(
            SerializeStateSnafu {
                stage: "serialize-view-state",
            },
        )?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteStateSnafu {
            stage: "write-temporary-view-state",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, &self.path).context(ReplaceStateFileSnafu {
            stage: "rename-temporary-view-state",
            from: temp_path,
            to: self.path.clone(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.state.lock().expect("view state mutex poisoned")
    }

    fn scoped_key(scope: &ScopeKey, suffix: &str) -> String {
        format!("{scope}-{suffix}")
    }

    // --- title overlay -----------------------------------------------------

    /// Overlay entry for a thread, if one has been persisted.
    pub fn title_overlay(&self, scope: &ScopeKey, thread_id: ThreadId) -> Option<String> {
        let state = self.lock_state();
        map_entry(&state, &Self::scoped_key(scope, TITLES_SUFFIX), thread_id)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_title_overlay(
        &self,
        scope: &ScopeKey,
        thread_id: ThreadId,
        title: impl Into<String>,
    ) -> SyncResult<()> {
        let mut state = self.lock_state();
        set_map_entry(
            &mut state,
            Self::scoped_key(scope, TITLES_SUFFIX),
            thread_id,
            Value::String(title.into()),
        );
        self.persist_locked(&state)
    }

    /// Title to display for a thread: the persisted overlay when present,
    /// otherwise the backend title, which is then lazily back-filled into
    /// the overlay so later disagreements keep resolving the same way.
    pub fn display_title(&self, scope: &ScopeKey, thread: &ThreadRecord) -> String {
        let mut state = self.lock_state();
        let key = Self::scoped_key(scope, TITLES_SUFFIX);
        if let Some(overlay) = map_entry(&state, &key, thread.id).and_then(Value::as_str) {
            return overlay.to_string();
        }

        set_map_entry(&mut state, key, thread.id, Value::String(thread.title.clone()));
        if let Err(error) = self.persist_locked(&state) {
            tracing::warn!(thread_id = %thread.id, "failed to back-fill title overlay: {error}");
        }
        thread.title.clone()
    }

    // --- temporary-flag overlay --------------------------------------------

    /// Missing entry reads as "not temporary".
    pub fn is_marked_temporary(&self, scope: &ScopeKey, thread_id: ThreadId) -> bool {
        let state = self.lock_state();
        map_entry(&state, &Self::scoped_key(scope, TEMP_CHATS_SUFFIX), thread_id)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_temp_flag(
        &self,
        scope: &ScopeKey,
        thread_id: ThreadId,
        is_temporary: bool,
    ) -> SyncResult<()> {
        let mut state = self.lock_state();
        set_map_entry(
            &mut state,
            Self::scoped_key(scope, TEMP_CHATS_SUFFIX),
            thread_id,
            Value::Bool(is_temporary),
        );
        self.persist_locked(&state)
    }

    pub fn clear_temp_flag(&self, scope: &ScopeKey, thread_id: ThreadId) -> SyncResult<()> {
        let mut state = self.lock_state();
        remove_map_entry(
            &mut state,
            &Self::scoped_key(scope, TEMP_CHATS_SUFFIX),
            thread_id,
        );
        self.persist_locked(&state)
    }

    // --- selection ----------------------------------------------------------

    pub fn selected_id(&self, scope: &ScopeKey) -> Option<ThreadId> {
        let state = self.lock_state();
        let raw = state
            .get(&Self::scoped_key(scope, SELECTED_ID_SUFFIX))
            .and_then(Value::as_str)?;
        match ThreadId::parse(raw) {
            Ok(thread_id) => Some(thread_id),
            Err(error) => {
                tracing::warn!(scope = %scope, "discarding unparseable selected id: {error}");
                None
            }
        }
    }

    pub fn set_selected_id(
        &self,
        scope: &ScopeKey,
        thread_id: Option<ThreadId>,
    ) -> SyncResult<()> {
        let mut state = self.lock_state();
        let key = Self::scoped_key(scope, SELECTED_ID_SUFFIX);
        match thread_id {
            Some(thread_id) => {
                state.insert(key, Value::String(thread_id.to_string()));
            }
            None => {
                state.remove(&key);
            }
        }
        self.persist_locked(&state)
    }

    // --- panel state --------------------------------------------------------

    pub fn panel_open(&self, scope: &ScopeKey) -> bool {
        let state = self.lock_state();
        state
            .get(&Self::scoped_key(scope, PANEL_OPEN_SUFFIX))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_panel_open(&self, scope: &ScopeKey, is_open: bool) -> SyncResult<()> {
        let mut state = self.lock_state();
        state.insert(
            Self::scoped_key(scope, PANEL_OPEN_SUFFIX),
            Value::Bool(is_open),
        );
        self.persist_locked(&state)
    }

    // --- auto-select suppression -------------------------------------------

    pub fn suppress_auto_select(&self, scope: &ScopeKey) -> bool {
        let state = self.lock_state();
        state
            .get(&Self::scoped_key(scope, SUPPRESS_AUTO_SELECT_SUFFIX))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The suppression flag is transient: clearing removes the key entirely
    /// rather than storing `false`.
    pub fn set_suppress_auto_select(&self, scope: &ScopeKey, suppress: bool) -> SyncResult<()> {
        let mut state = self.lock_state();
        let key = Self::scoped_key(scope, SUPPRESS_AUTO_SELECT_SUFFIX);
        if suppress {
            state.insert(key, Value::Bool(true));
        } else {
            state.remove(&key);
        }
        self.persist_locked(&state)
    }

    // --- folders ------------------------------------------------------------

    pub fn folders(&self) -> Vec<FolderRecord> {
        let state = self.lock_state();
        let Some(raw) = state.get(FOLDERS_KEY) else {
            return Vec::new();
        };
        match serde_json::from_value::<Vec<FolderRecord>>(raw.clone()) {
            Ok(folders) => folders,
            Err(error) => {
                tracing::warn!("discarding unparseable folder records: {error}");
                Vec::new()
            }
        }
    }

    pub fn set_folders(&self, folders: &[FolderRecord]) -> SyncResult<()> {
        let mut state = self.lock_state();
        let serialized = serde_json::to_value(folders).context(SerializeStateSnafu {
            stage: "serialize-folder-records",
        })?;
        state.insert(FOLDERS_KEY.to_string(), serialized);
        self.persist_locked(&state)
    }
}

fn map_entry<'state>(
    state: &'state Map<String, Value>,
    key: &str,
    thread_id: ThreadId,
) -> Option<&'state Value> {
    state
        .get(key)
        .and_then(Value::as_object)
        .and_then(|entries| entries.get(&thread_id.to_string()))
}

fn set_map_entry(state: &mut Map<String, Value>, key: String, thread_id: ThreadId, value: Value) {
    let entries = state
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    if !entries.is_object() {
        // A scalar under a map key is stale garbage; replace it wholesale.
        *entries = Value::Object(Map::new());
    }
    if let Some(entries) = entries.as_object_mut() {
        entries.insert(thread_id.to_string(), value);
    }
}

fn remove_map_entry(state: &mut Map<String, Value>, key: &str, thread_id: ThreadId) {
    if let Some(entries) = state.get_mut(key).and_then(Value::as_object_mut) {
        entries.remove(&thread_id.to_string());
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use wisp_storage::DEFAULT_THREAD_TITLE;

    use super::*;

    fn scope() -> ScopeKey {
        ScopeKey::new("history")
    }

    fn thread_named(title: &str) -> ThreadRecord {
        ThreadRecord {
            id: ThreadId::new_v7(),
            title: title.to_string(),
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

    fn store_in(dir: &tempfile::TempDir) -> ViewStateStore {
        ViewStateStore::open(dir.path().join(VIEW_STATE_FILE_NAME))
    }

    #[test]
    fn persisted_title_wins_over_backend_title() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let thread = thread_named(DEFAULT_THREAD_TITLE);

        store
            .set_title_overlay(&scope(), thread.id, "Renamed locally")
            .unwrap();
        assert_eq!(store.display_title(&scope(), &thread), "Renamed locally");
    }

    #[test]
    fn missing_title_entry_backfills_from_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let thread = thread_named("Backend title");

        assert_eq!(store.title_overlay(&scope(), thread.id), None);
        assert_eq!(store.display_title(&scope(), &thread), "Backend title");
        // The read seeded the overlay.
        assert_eq!(
            store.title_overlay(&scope(), thread.id),
            Some("Backend title".to_string())
        );
    }

    #[test]
    fn missing_keys_read_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(!store.is_marked_temporary(&scope(), ThreadId::new_v7()));
        assert_eq!(store.selected_id(&scope()), None);
        assert!(!store.panel_open(&scope()));
        assert!(!store.suppress_auto_select(&scope()));
        assert!(store.folders().is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VIEW_STATE_FILE_NAME);
        let thread_id = ThreadId::new_v7();

        {
            let store = ViewStateStore::open(&path);
            store.set_selected_id(&scope(), Some(thread_id)).unwrap();
            store.set_temp_flag(&scope(), thread_id, true).unwrap();
            store.set_panel_open(&scope(), true).unwrap();
        }

        let reopened = ViewStateStore::open(&path);
        assert_eq!(reopened.selected_id(&scope()), Some(thread_id));
        assert!(reopened.is_marked_temporary(&scope(), thread_id));
        assert!(reopened.panel_open(&scope()));
    }

    #[test]
    fn clearing_the_suppress_flag_removes_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VIEW_STATE_FILE_NAME);
        let store = ViewStateStore::open(&path);

        store.set_suppress_auto_select(&scope(), true).unwrap();
        assert!(store.suppress_auto_select(&scope()));
        store.set_suppress_auto_select(&scope(), false).unwrap();
        assert!(!store.suppress_auto_select(&scope()));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("suppress-auto-select"));
    }

    #[test]
    fn corrupt_state_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VIEW_STATE_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let store = ViewStateStore::open(&path);
        assert_eq!(store.selected_id(&scope()), None);

        // Writes still work after the degraded load.
        store
            .set_selected_id(&scope(), Some(ThreadId::new_v7()))
            .unwrap();
        assert!(store.selected_id(&scope()).is_some());
    }

    #[test]
    fn scopes_do_not_leak_into_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let thread_id = ThreadId::new_v7();

        store
            .set_selected_id(&ScopeKey::new("history"), Some(thread_id))
            .unwrap();
        assert_eq!(store.selected_id(&ScopeKey::new("workbench")), None);
    }

    #[test]
    fn unparseable_selected_id_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(VIEW_STATE_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "history-selected-chat-id": "not-a-uuid" }"#,
        )
        .unwrap();

        let store = ViewStateStore::open(&path);
        assert_eq!(store.selected_id(&scope()), None);
    }
}
