pub mod backend;
pub mod error;
pub mod ids;
pub mod latency;
pub mod memory;
pub mod types;

pub use backend::{BoxFuture, ChatBackend};
pub use error::{StorageError, StorageResult};
pub use ids::{MessageId, ThreadId};
pub use latency::{LatencyProfile, OpWeight};
pub use memory::MemoryBackend;
pub use types::{
    DEFAULT_THREAD_TITLE, FileAttachment, FinishReason, MessageRecord, NewMessage, Role,
    SearchHit, ThreadRecord, ThreadStats, TrimOutcome, char_count, token_estimate,
};
