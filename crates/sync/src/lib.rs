pub mod activation;
pub mod bus;
pub mod error;
pub mod events;
pub mod folders;
pub mod selection;
pub mod title_edit;
pub mod view_store;

pub use activation::ActivationMonitor;
pub use bus::{BroadcastBus, Subscription};
pub use error::{SyncError, SyncResult};
pub use events::{BusEvent, ScopeKey, SurfaceTag};
pub use folders::{
    DropTarget, FolderId, FolderManager, FolderRecord, RESERVED_FOLDER_ID, RESERVED_FOLDER_NAME,
};
pub use selection::SelectionController;
pub use title_edit::TitleEditController;
pub use view_store::{FOLDERS_KEY, VIEW_STATE_FILE_NAME, ViewStateStore};
