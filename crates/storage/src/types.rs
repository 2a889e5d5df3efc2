use super::ids::{MessageId, ThreadId};

/// Default thread title used when a thread is created without one.
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";

/// Backend-local message role, intentionally decoupled from any surface-layer
/// role enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Why an assistant completion stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub size_bytes: u64,
    pub extension: String,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>, size_bytes: u64, extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            extension: extension.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: ThreadId,
    pub title: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
    pub last_msg_at_unix_ms: u64,
    pub size_chars: u64,
    pub size_tokens: u64,
    pub active: bool,
    pub deleted: bool,
    pub pinned: bool,
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    pub content: String,
    pub created_at_unix_ms: u64,
    pub size_chars: u64,
    pub size_tokens: u64,
    pub attachment: Option<FileAttachment>,
    pub finish_reason: Option<FinishReason>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub attachment: Option<FileAttachment>,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: FileAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Result of truncating a thread back to its nearest user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimOutcome {
    pub retained_user_message_id: MessageId,
    pub retained_user_content: String,
    pub removed_messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStats {
    pub thread_id: ThreadId,
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub size_chars: u64,
    pub size_tokens: u64,
    pub last_msg_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub thread_id: ThreadId,
    pub message_id: MessageId,
    pub thread_title: String,
    pub role: Role,
    pub content: String,
}

/// Character count is Unicode scalar values, not bytes.
pub fn char_count(content: &str) -> u64 {
    content.chars().count() as u64
}

/// Token estimate mirrors the 4-chars-per-token heuristic used everywhere a
/// size badge is rendered; aggregates sum per-message estimates.
pub fn token_estimate(size_chars: u64) -> u64 {
    size_chars.div_ceil(4)
}
