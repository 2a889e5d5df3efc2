use std::future::Future;
use std::pin::Pin;

use super::error::StorageResult;
use super::ids::{MessageId, ThreadId};
use super::types::{
    MessageRecord, NewMessage, SearchHit, ThreadRecord, ThreadStats, TrimOutcome,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The thread/message API surface consumed by every mounted surface.
///
/// This is a closed boundary: presentational screens see nothing of the
/// backend beyond these operations and the activation signal. Missing or
/// soft-deleted records resolve to `None`/empty results rather than errors.
pub trait ChatBackend: Send + Sync {
    /// Non-deleted, active, non-temporary threads; pinned first, then most
    /// recent message first.
    fn list_threads(&self) -> BoxFuture<'_, StorageResult<Vec<ThreadRecord>>>;

    /// Creates a thread at the head of the canonical order. The thread starts
    /// temporary and is excluded from `list_threads` until activation.
    fn create_thread(&self, title: Option<String>)
    -> BoxFuture<'_, StorageResult<ThreadRecord>>;

    /// Appends a message and recomputes the owning thread's aggregates. The
    /// first user-authored message activates a temporary thread.
    fn add_message(
        &self,
        thread_id: ThreadId,
        message: NewMessage,
    ) -> BoxFuture<'_, StorageResult<Option<MessageRecord>>>;

    /// Synthesizes an assistant reply to `user_content` and appends it,
    /// contributing to aggregates exactly like `add_message`.
    fn generate_response(
        &self,
        thread_id: ThreadId,
        user_content: String,
    ) -> BoxFuture<'_, StorageResult<Option<MessageRecord>>>;

    /// Truncates the thread so it ends at the nearest user message at or
    /// before `message_id`, inclusive. Resolves to `None` when no user
    /// message precedes the target.
    fn trim_messages_from(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
    ) -> BoxFuture<'_, StorageResult<Option<TrimOutcome>>>;

    fn update_title(
        &self,
        thread_id: ThreadId,
        title: String,
    ) -> BoxFuture<'_, StorageResult<()>>;

    /// Soft delete. The record stays addressable internally but resolves to
    /// `None`/empty through every read operation.
    fn delete_thread(&self, thread_id: ThreadId) -> BoxFuture<'_, StorageResult<()>>;

    fn get_by_id(&self, thread_id: ThreadId)
    -> BoxFuture<'_, StorageResult<Option<ThreadRecord>>>;

    fn list_messages(
        &self,
        thread_id: ThreadId,
    ) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>>;

    /// Case-insensitive substring match over every non-deleted thread.
    fn search_messages(&self, query: String) -> BoxFuture<'_, StorageResult<Vec<SearchHit>>>;

    fn thread_stats(
        &self,
        thread_id: ThreadId,
    ) -> BoxFuture<'_, StorageResult<Option<ThreadStats>>>;
}
