use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wisp_storage::{ThreadId, ThreadRecord};

use super::error::{SyncResult, ValidationSnafu};
use super::view_store::ViewStateStore;

/// The reserved folder's well-known id. It always exists, cannot be renamed
/// away from its role, and cannot be deleted.
pub const RESERVED_FOLDER_ID: &str = "general";
pub const RESERVED_FOLDER_NAME: &str = "General";

/// Folder ids are plain strings rather than uuids because the reserved
/// folder's id is the fixed word "general"; user-created folders get uuid-v7
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn reserved() -> Self {
        Self(RESERVED_FOLDER_ID.to_string())
    }

    pub fn random() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn is_reserved(&self) -> bool {
        self.0 == RESERVED_FOLDER_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Membership, not ownership: deleting a folder never destroys its threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: FolderId,
    pub name: String,
    #[serde(rename = "created_at")]
    pub created_at_unix_ms: u64,
    pub chat_ids: Vec<ThreadId>,
}

impl FolderRecord {
    fn reserved() -> Self {
        Self {
            id: FolderId::reserved(),
            name: RESERVED_FOLDER_NAME.to_string(),
            created_at_unix_ms: now_unix_ms(),
            chat_ids: Vec::new(),
        }
    }
}

/// What a dragged thread row was dropped onto.
#[derive(Debug, Clone, PartialEq)]
pub enum DropTarget {
    /// Dropping onto a folder reassigns membership.
    Folder(FolderId),
    /// Dropping onto another thread row reorders the display list only;
    /// membership is untouched.
    Thread(ThreadId),
}

/// Groups thread ids into named folders persisted under the global
/// `chat_folders` key.
pub struct FolderManager {
    store: Arc<ViewStateStore>,
}

impl FolderManager {
    pub fn new(store: Arc<ViewStateStore>) -> Self {
        Self { store }
    }

    /// Current folder list, reserved folder always first.
    pub fn folders(&self) -> Vec<FolderRecord> {
        self.load()
    }

    pub fn folder_of(&self, thread_id: ThreadId) -> Option<FolderId> {
        self.load()
            .into_iter()
            .find(|folder| folder.chat_ids.contains(&thread_id))
            .map(|folder| folder.id)
    }

    pub fn create(&self, name: impl Into<String>) -> SyncResult<FolderRecord> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return ValidationSnafu {
                stage: "folder-create-empty-name",
                details: "folder name must not be blank".to_string(),
            }
            .fail();
        }

        let folder = FolderRecord {
            id: FolderId::random(),
            name,
            created_at_unix_ms: now_unix_ms(),
            chat_ids: Vec::new(),
        };

        let mut folders = self.load();
        folders.push(folder.clone());
        self.store.set_folders(&folders)?;
        Ok(folder)
    }

    /// Renaming the reserved folder is rejected without mutation; renaming a
    /// missing folder is a no-op.
    pub fn rename(&self, folder_id: &FolderId, name: impl Into<String>) -> SyncResult<()> {
        if folder_id.is_reserved() {
            return ValidationSnafu {
                stage: "folder-rename-reserved",
                details: format!("folder '{RESERVED_FOLDER_ID}' cannot be renamed"),
            }
            .fail();
        }

        let name = name.into().trim().to_string();
        if name.is_empty() {
            return ValidationSnafu {
                stage: "folder-rename-empty-name",
                details: "folder name must not be blank".to_string(),
            }
            .fail();
        }

        let mut folders = self.load();
        let Some(folder) = folders.iter_mut().find(|folder| &folder.id == folder_id) else {
            return Ok(());
        };
        folder.name = name;
        self.store.set_folders(&folders)
    }

    /// Deleting the reserved folder is rejected without mutation. Deleting
    /// any other folder migrates its members into the reserved folder before
    /// the record disappears.
    pub fn delete(&self, folder_id: &FolderId) -> SyncResult<()> {
        if folder_id.is_reserved() {
            return ValidationSnafu {
                stage: "folder-delete-reserved",
                details: format!("folder '{RESERVED_FOLDER_ID}' cannot be deleted"),
            }
            .fail();
        }

        let mut folders = self.load();
        let Some(position) = folders.iter().position(|folder| &folder.id == folder_id) else {
            return Ok(());
        };

        let removed = folders.remove(position);
        let reserved = reserved_slot(&mut folders);
        for thread_id in removed.chat_ids {
            if !reserved.chat_ids.contains(&thread_id) {
                reserved.chat_ids.push(thread_id);
            }
        }
        self.store.set_folders(&folders)
    }

    /// Moves a thread into `target` (the reserved folder when `None`). The
    /// thread id is first removed from every folder, so membership stays
    /// exclusive, and insertion checks for presence so replayed moves stay
    /// idempotent.
    pub fn move_thread(&self, thread_id: ThreadId, target: Option<&FolderId>) -> SyncResult<()> {
        let mut folders = self.load();

        let target_id = target.cloned().unwrap_or_else(FolderId::reserved);
        if !folders.iter().any(|folder| folder.id == target_id) {
            tracing::warn!(folder_id = %target_id, "move target folder is gone; leaving membership unchanged");
            return Ok(());
        }

        for folder in &mut folders {
            folder.chat_ids.retain(|member| *member != thread_id);
        }
        if let Some(destination) = folders.iter_mut().find(|folder| folder.id == target_id)
            && !destination.chat_ids.contains(&thread_id)
        {
            destination.chat_ids.push(thread_id);
        }

        self.store.set_folders(&folders)
    }

    /// First-sight adoption: any listed thread not yet in some folder joins
    /// the reserved folder. Idempotent; persists only when something changed.
    pub fn adopt_unfiled(&self, threads: &[ThreadRecord]) -> SyncResult<()> {
        let mut folders = self.load();
        let mut changed = false;

        for thread in threads {
            let filed = folders
                .iter()
                .any(|folder| folder.chat_ids.contains(&thread.id));
            if !filed {
                reserved_slot(&mut folders).chat_ids.push(thread.id);
                changed = true;
            }
        }

        if changed {
            self.store.set_folders(&folders)?;
        }
        Ok(())
    }

    /// Drag-and-drop resolution: a folder target reassigns membership, a
    /// thread target reorders the caller's display list in place.
    pub fn handle_drop(
        &self,
        dragged: ThreadId,
        target: DropTarget,
        display_order: &mut Vec<ThreadId>,
    ) -> SyncResult<()> {
        match target {
            DropTarget::Folder(folder_id) => self.move_thread(dragged, Some(&folder_id)),
            DropTarget::Thread(anchor) => {
                if dragged == anchor {
                    return Ok(());
                }
                let Some(from) = display_order.iter().position(|id| *id == dragged) else {
                    return Ok(());
                };
                let Some(to) = display_order.iter().position(|id| *id == anchor) else {
                    return Ok(());
                };
                let moved = display_order.remove(from);
                let to = if from < to { to - 1 } else { to };
                display_order.insert(to, moved);
                Ok(())
            }
        }
    }

    fn load(&self) -> Vec<FolderRecord> {
        let mut folders = self.store.folders();
        if !folders.iter().any(|folder| folder.id.is_reserved()) {
            folders.insert(0, FolderRecord::reserved());
        }
        folders
    }
}

fn reserved_slot(folders: &mut Vec<FolderRecord>) -> &mut FolderRecord {
    match folders.iter().position(|folder| folder.id.is_reserved()) {
        Some(position) => &mut folders[position],
        None => {
            folders.insert(0, FolderRecord::reserved());
            &mut folders[0]
        }
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use crate::view_store::VIEW_STATE_FILE_NAME;

    use super::*;

    fn manager_in(dir: &tempfile::TempDir) -> FolderManager {
        let store = Arc::new(ViewStateStore::open(
            dir.path().join(VIEW_STATE_FILE_NAME),
        ));
        FolderManager::new(store)
    }

    fn listed_thread() -> ThreadRecord {
        ThreadRecord {
            id: ThreadId::new_v7(),
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

    fn membership_count(manager: &FolderManager, thread_id: ThreadId) -> usize {
        manager
            .folders()
            .iter()
            .filter(|folder| folder.chat_ids.contains(&thread_id))
            .count()
    }

    #[test]
    fn reserved_folder_always_exists_and_leads() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let folders = manager.folders();
        assert_eq!(folders[0].id, FolderId::reserved());
        assert_eq!(folders[0].name, RESERVED_FOLDER_NAME);
    }

    #[test]
    fn deleting_the_reserved_folder_fails_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let thread = listed_thread();
        manager.adopt_unfiled(&[thread.clone()]).unwrap();

        let before = manager.folders();
        assert!(manager.delete(&FolderId::reserved()).is_err());
        assert_eq!(manager.folders(), before);
    }

    #[test]
    fn deleting_a_folder_migrates_members_to_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let first = listed_thread();
        let second = listed_thread();

        let work = manager.create("Work").unwrap();
        manager.move_thread(first.id, Some(&work.id)).unwrap();
        manager.move_thread(second.id, Some(&work.id)).unwrap();

        manager.delete(&work.id).unwrap();

        let folders = manager.folders();
        assert!(!folders.iter().any(|folder| folder.id == work.id));
        let reserved = &folders[0];
        assert!(reserved.chat_ids.contains(&first.id));
        assert!(reserved.chat_ids.contains(&second.id));
        assert_eq!(membership_count(&manager, first.id), 1);
    }

    #[test]
    fn membership_stays_exclusive_across_move_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let thread = listed_thread();

        let work = manager.create("Work").unwrap();
        let personal = manager.create("Personal").unwrap();

        manager.adopt_unfiled(&[thread.clone()]).unwrap();
        manager.move_thread(thread.id, Some(&work.id)).unwrap();
        manager.move_thread(thread.id, Some(&personal.id)).unwrap();
        manager.move_thread(thread.id, Some(&personal.id)).unwrap();
        manager.move_thread(thread.id, None).unwrap();

        assert_eq!(membership_count(&manager, thread.id), 1);
        assert_eq!(manager.folder_of(thread.id), Some(FolderId::reserved()));
    }

    #[test]
    fn renaming_the_reserved_folder_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        assert!(manager.rename(&FolderId::reserved(), "Archive").is_err());
        assert_eq!(manager.folders()[0].name, RESERVED_FOLDER_NAME);
    }

    #[test]
    fn blank_folder_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        assert!(manager.create("   ").is_err());

        let work = manager.create("Work").unwrap();
        assert!(manager.rename(&work.id, "  ").is_err());
        assert_eq!(
            manager
                .folders()
                .iter()
                .find(|folder| folder.id == work.id)
                .unwrap()
                .name,
            "Work"
        );
    }

    #[test]
    fn adoption_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let thread = listed_thread();
        let work = manager.create("Work").unwrap();
        manager.move_thread(thread.id, Some(&work.id)).unwrap();

        // Re-running adoption must not pull the thread back into General.
        manager.adopt_unfiled(&[thread.clone()]).unwrap();
        manager.adopt_unfiled(&[thread.clone()]).unwrap();

        assert_eq!(membership_count(&manager, thread.id), 1);
        assert_eq!(manager.folder_of(thread.id), Some(work.id));
    }

    #[test]
    fn dropping_on_a_thread_reorders_display_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let first = listed_thread();
        let second = listed_thread();
        let third = listed_thread();
        manager
            .adopt_unfiled(&[first.clone(), second.clone(), third.clone()])
            .unwrap();

        let mut display = vec![first.id, second.id, third.id];
        manager
            .handle_drop(third.id, DropTarget::Thread(first.id), &mut display)
            .unwrap();

        assert_eq!(display, vec![third.id, first.id, second.id]);
        // Membership untouched: all three still live in General.
        assert_eq!(manager.folder_of(third.id), Some(FolderId::reserved()));
    }

    #[test]
    fn dropping_on_a_folder_reassigns_membership() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let thread = listed_thread();
        manager.adopt_unfiled(&[thread.clone()]).unwrap();
        let work = manager.create("Work").unwrap();

        let mut display = vec![thread.id];
        manager
            .handle_drop(thread.id, DropTarget::Folder(work.id.clone()), &mut display)
            .unwrap();

        assert_eq!(manager.folder_of(thread.id), Some(work.id));
    }

    #[test]
    fn moving_to_a_vanished_folder_leaves_membership_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(&dir);
        let thread = listed_thread();
        manager.adopt_unfiled(&[thread.clone()]).unwrap();

        manager
            .move_thread(thread.id, Some(&FolderId::new("missing")))
            .unwrap();
        assert_eq!(manager.folder_of(thread.id), Some(FolderId::reserved()));
    }
}
