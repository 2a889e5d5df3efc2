use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use super::backend::{BoxFuture, ChatBackend};
use super::error::StorageResult;
use super::ids::{MessageId, ThreadId};
use super::latency::{LatencyProfile, OpWeight};
use super::types::{
    DEFAULT_THREAD_TITLE, FinishReason, MessageRecord, NewMessage, Role, SearchHit, ThreadRecord,
    ThreadStats, TrimOutcome, char_count, token_estimate,
};

/// Replies longer than this are cut off and flagged as truncated.
const MAX_REPLY_CHARS: usize = 320;

/// How much of the prompt the generic fallback reply echoes back.
const FALLBACK_ECHO_CHARS: usize = 400;

/// Keyword-matched canned replies; first matching row wins, so order encodes
/// priority.
const REPLY_RULES: &[(&[&str], &str)] = &[
    (
        &["hello", "hi ", "hey"],
        "Hello! What would you like to work on today?",
    ),
    (
        &["error", "bug", "crash", "panic"],
        "Let's narrow that failure down. What was the exact message, and what \
         changed right before it first appeared?",
    ),
    (
        &["code", "function", "implement", "refactor"],
        "Start with the smallest version that compiles, put a test on the \
         boundary you care about, then grow it one case at a time.",
    ),
    (
        &["cost", "price", "hardware", "gpu"],
        "Rough sizing first: pick the model tier, multiply by expected \
         utilization, and compare that against the dedicated-hardware estimate \
         before committing.",
    ),
    (
        &["thanks", "thank you"],
        "Happy to help. Anything else you want to look at?",
    ),
];

#[derive(Default)]
struct BackendState {
    /// Canonical order, newest creation first. Listing filters and re-sorts
    /// this; the canonical order itself is append-at-head only.
    order: Vec<ThreadId>,
    threads: HashMap<ThreadId, ThreadRecord>,
    messages: HashMap<ThreadId, Vec<MessageRecord>>,
}

/// In-memory simulated backend.
///
/// Single source of canonical thread/message records. Every operation
/// suspends for a profile-dependent artificial delay before touching state,
/// so near-simultaneous calls interleave the way a remote backend's would.
pub struct MemoryBackend {
    state: Mutex<BackendState>,
    latency: LatencyProfile,
    activation_tx: mpsc::UnboundedSender<ThreadId>,
    activation_rx: Mutex<Option<mpsc::UnboundedReceiver<ThreadId>>>,
}

impl MemoryBackend {
    pub fn new(latency: LatencyProfile) -> Self {
        let (activation_tx, activation_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(BackendState::default()),
            latency,
            activation_tx,
            activation_rx: Mutex::new(Some(activation_rx)),
        }
    }

    /// Hands out the activation signal receiver. The channel is single-
    /// consumer: the first caller gets it, later callers get `None`.
    pub fn take_activation_signal(&self) -> Option<mpsc::UnboundedReceiver<ThreadId>> {
        self.activation_rx
            .lock()
            .expect("activation receiver mutex poisoned")
            .take()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BackendState> {
        // Single-process cooperative execution; a poisoned mutex means a
        // panic already tore the backend down.
        self.state.lock().expect("backend state mutex poisoned")
    }

    async fn list_threads_inner(&self) -> StorageResult<Vec<ThreadRecord>> {
        self.latency.simulate(OpWeight::Medium).await;

        let state = self.lock_state();
        let mut listed: Vec<ThreadRecord> = state
            .order
            .iter()
            .filter_map(|thread_id| state.threads.get(thread_id))
            .filter(|thread| !thread.deleted && thread.active && !thread.temporary)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            right
                .pinned
                .cmp(&left.pinned)
                .then_with(|| right.last_msg_at_unix_ms.cmp(&left.last_msg_at_unix_ms))
                .then_with(|| right.created_at_unix_ms.cmp(&left.created_at_unix_ms))
        });
        Ok(listed)
    }

    async fn create_thread_inner(&self, title: Option<String>) -> StorageResult<ThreadRecord> {
        self.latency.simulate(OpWeight::Medium).await;

        let title = match title {
            Some(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
            _ => DEFAULT_THREAD_TITLE.to_string(),
        };

        let now = now_unix_ms();
        let thread = ThreadRecord {
            id: ThreadId::new_v7(),
            title,
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
            last_msg_at_unix_ms: now,
            size_chars: 0,
            size_tokens: 0,
            active: true,
            deleted: false,
            pinned: false,
            temporary: true,
        };

        let mut state = self.lock_state();
        state.order.insert(0, thread.id);
        state.threads.insert(thread.id, thread.clone());
        state.messages.insert(thread.id, Vec::new());
        Ok(thread)
    }

    async fn add_message_inner(
        &self,
        thread_id: ThreadId,
        message: NewMessage,
    ) -> StorageResult<Option<MessageRecord>> {
        self.latency.simulate(OpWeight::Heavy).await;

        let finish_reason = match message.role {
            Role::User => None,
            Role::Assistant => Some(FinishReason::Stop),
        };

        let appended = {
            let mut state = self.lock_state();
            append_message(&mut state, thread_id, message, finish_reason, false)
        };

        let Some((record, activated)) = appended else {
            return Ok(None);
        };

        if activated {
            tracing::debug!(thread_id = %thread_id, "thread activated by first user message");
            // Receiver may be gone when no activation monitor is mounted.
            let _ = self.activation_tx.send(thread_id);
        }

        Ok(Some(record))
    }

    async fn generate_response_inner(
        &self,
        thread_id: ThreadId,
        user_content: String,
    ) -> StorageResult<Option<MessageRecord>> {
        self.latency.simulate(OpWeight::Heavy).await;

        let (content, finish_reason, truncated) = synthesize_reply(&user_content);
        let appended = {
            let mut state = self.lock_state();
            append_message(
                &mut state,
                thread_id,
                NewMessage::new(Role::Assistant, content),
                Some(finish_reason),
                truncated,
            )
        };

        Ok(appended.map(|(record, _)| record))
    }

    async fn trim_messages_from_inner(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
    ) -> StorageResult<Option<TrimOutcome>> {
        self.latency.simulate(OpWeight::Medium).await;

        let mut state = self.lock_state();
        if !thread_is_live(&state, thread_id) {
            return Ok(None);
        }

        let Some(messages) = state.messages.get_mut(&thread_id) else {
            return Ok(None);
        };
        let Some(target_index) = messages.iter().position(|message| message.id == message_id)
        else {
            return Ok(None);
        };

        // Walk back from an assistant target to the user message that
        // prompted it; a user target is retained as-is.
        let Some(user_index) = (0..=target_index)
            .rev()
            .find(|index| messages[*index].role == Role::User)
        else {
            return Ok(None);
        };

        let removed_messages = messages.len() - (user_index + 1);
        messages.truncate(user_index + 1);
        let retained = messages[user_index].clone();

        let aggregates = compute_aggregates(messages);
        if let Some(thread) = state.threads.get_mut(&thread_id) {
            apply_aggregates(thread, aggregates);
            thread.updated_at_unix_ms = now_unix_ms();
        }

        Ok(Some(TrimOutcome {
            retained_user_message_id: retained.id,
            retained_user_content: retained.content,
            removed_messages,
        }))
    }

    async fn update_title_inner(&self, thread_id: ThreadId, title: String) -> StorageResult<()> {
        self.latency.simulate(OpWeight::Light).await;

        let mut state = self.lock_state();
        if let Some(thread) = state.threads.get_mut(&thread_id)
            && !thread.deleted
        {
            thread.title = title;
            thread.updated_at_unix_ms = now_unix_ms();
        }
        Ok(())
    }

    async fn delete_thread_inner(&self, thread_id: ThreadId) -> StorageResult<()> {
        self.latency.simulate(OpWeight::Light).await;

        let mut state = self.lock_state();
        if let Some(thread) = state.threads.get_mut(&thread_id)
            && !thread.deleted
        {
            thread.deleted = true;
            thread.updated_at_unix_ms = now_unix_ms();
        }
        Ok(())
    }

    async fn get_by_id_inner(&self, thread_id: ThreadId) -> StorageResult<Option<ThreadRecord>> {
        self.latency.simulate(OpWeight::Light).await;

        let state = self.lock_state();
        Ok(state
            .threads
            .get(&thread_id)
            .filter(|thread| !thread.deleted)
            .cloned())
    }

    async fn list_messages_inner(&self, thread_id: ThreadId) -> StorageResult<Vec<MessageRecord>> {
        self.latency.simulate(OpWeight::Light).await;

        let state = self.lock_state();
        if !thread_is_live(&state, thread_id) {
            return Ok(Vec::new());
        }
        Ok(state.messages.get(&thread_id).cloned().unwrap_or_default())
    }

    async fn search_messages_inner(&self, query: String) -> StorageResult<Vec<SearchHit>> {
        self.latency.simulate(OpWeight::Medium).await;

        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.lock_state();
        let mut hits = Vec::new();
        for thread_id in &state.order {
            let Some(thread) = state.threads.get(thread_id) else {
                continue;
            };
            if thread.deleted {
                continue;
            }
            let Some(messages) = state.messages.get(thread_id) else {
                continue;
            };
            for message in messages {
                if message.content.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        thread_id: *thread_id,
                        message_id: message.id,
                        thread_title: thread.title.clone(),
                        role: message.role,
                        content: message.content.clone(),
                    });
                }
            }
        }
        Ok(hits)
    }

    async fn thread_stats_inner(&self, thread_id: ThreadId) -> StorageResult<Option<ThreadStats>> {
        self.latency.simulate(OpWeight::Light).await;

        let state = self.lock_state();
        let Some(thread) = state.threads.get(&thread_id).filter(|thread| !thread.deleted) else {
            return Ok(None);
        };
        let messages = state.messages.get(&thread_id).map_or(&[][..], Vec::as_slice);

        Ok(Some(ThreadStats {
            thread_id,
            message_count: messages.len(),
            user_messages: messages
                .iter()
                .filter(|message| message.role == Role::User)
                .count(),
            assistant_messages: messages
                .iter()
                .filter(|message| message.role == Role::Assistant)
                .count(),
            size_chars: thread.size_chars,
            size_tokens: thread.size_tokens,
            last_msg_at_unix_ms: thread.last_msg_at_unix_ms,
        }))
    }
}

impl ChatBackend for MemoryBackend {
    fn list_threads(&self) -> BoxFuture<'_, StorageResult<Vec<ThreadRecord>>> {
        Box::pin(self.list_threads_inner())
    }

    fn create_thread(&self, title: Option<String>) -> BoxFuture<'_, StorageResult<ThreadRecord>> {
        Box::pin(self.create_thread_inner(title))
    }

    fn add_message(
        &self,
        thread_id: ThreadId,
        message: NewMessage,
    ) -> BoxFuture<'_, StorageResult<Option<MessageRecord>>> {
        Box::pin(self.add_message_inner(thread_id, message))
    }

    fn generate_response(
        &self,
        thread_id: ThreadId,
        user_content: String,
    ) -> BoxFuture<'_, StorageResult<Option<MessageRecord>>> {
        Box::pin(self.generate_response_inner(thread_id, user_content))
    }

    fn trim_messages_from(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
    ) -> BoxFuture<'_, StorageResult<Option<TrimOutcome>>> {
        Box::pin(self.trim_messages_from_inner(thread_id, message_id))
    }

    fn update_title(&self, thread_id: ThreadId, title: String) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(self.update_title_inner(thread_id, title))
    }

    fn delete_thread(&self, thread_id: ThreadId) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(self.delete_thread_inner(thread_id))
    }

    fn get_by_id(&self, thread_id: ThreadId) -> BoxFuture<'_, StorageResult<Option<ThreadRecord>>> {
        Box::pin(self.get_by_id_inner(thread_id))
    }

    fn list_messages(&self, thread_id: ThreadId) -> BoxFuture<'_, StorageResult<Vec<MessageRecord>>> {
        Box::pin(self.list_messages_inner(thread_id))
    }

    fn search_messages(&self, query: String) -> BoxFuture<'_, StorageResult<Vec<SearchHit>>> {
        Box::pin(self.search_messages_inner(query))
    }

    fn thread_stats(
        &self,
        thread_id: ThreadId,
    ) -> BoxFuture<'_, StorageResult<Option<ThreadStats>>> {
        Box::pin(self.thread_stats_inner(thread_id))
    }
}

fn thread_is_live(state: &BackendState, thread_id: ThreadId) -> bool {
    state
        .threads
        .get(&thread_id)
        .is_some_and(|thread| !thread.deleted)
}

/// Appends a message, recomputes aggregates, and reports whether this append
/// activated a temporary thread. Returns `None` for missing/deleted threads.
fn append_message(
    state: &mut BackendState,
    thread_id: ThreadId,
    message: NewMessage,
    finish_reason: Option<FinishReason>,
    truncated: bool,
) -> Option<(MessageRecord, bool)> {
    let thread = state.threads.get_mut(&thread_id)?;
    if thread.deleted {
        return None;
    }

    let now = now_unix_ms();
    let size_chars = char_count(&message.content);
    let record = MessageRecord {
        id: MessageId::new_v7(),
        thread_id,
        role: message.role,
        content: message.content,
        created_at_unix_ms: now,
        size_chars,
        size_tokens: token_estimate(size_chars),
        attachment: message.attachment,
        finish_reason,
        truncated,
    };

    let messages = state.messages.entry(thread_id).or_default();
    messages.push(record.clone());
    let aggregates = compute_aggregates(messages);

    apply_aggregates(thread, aggregates);
    thread.updated_at_unix_ms = now;

    // Activation is one-way: only the first user-authored message clears the
    // temporary flag.
    let activated = thread.temporary && record.role == Role::User;
    if activated {
        thread.temporary = false;
    }

    Some((record, activated))
}

struct Aggregates {
    size_chars: u64,
    size_tokens: u64,
    last_msg_at_unix_ms: Option<u64>,
}

/// Aggregates are always recomputed from the retained messages, never
/// drifted incrementally.
fn compute_aggregates(messages: &[MessageRecord]) -> Aggregates {
    Aggregates {
        size_chars: messages.iter().map(|message| message.size_chars).sum(),
        size_tokens: messages.iter().map(|message| message.size_tokens).sum(),
        last_msg_at_unix_ms: messages.last().map(|message| message.created_at_unix_ms),
    }
}

fn apply_aggregates(thread: &mut ThreadRecord, aggregates: Aggregates) {
    thread.size_chars = aggregates.size_chars;
    thread.size_tokens = aggregates.size_tokens;
    thread.last_msg_at_unix_ms = aggregates
        .last_msg_at_unix_ms
        .unwrap_or(thread.created_at_unix_ms);
}

fn synthesize_reply(user_content: &str) -> (String, FinishReason, bool) {
    let lowered = user_content.to_lowercase();
    let reply = REPLY_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|(_, reply)| (*reply).to_string())
        .unwrap_or_else(|| {
            let echoed: String = user_content.trim().chars().take(FALLBACK_ECHO_CHARS).collect();
            format!(
                "Here's what I can tell you about \"{echoed}\": give me one more \
                 detail and I can be more specific."
            )
        });

    if reply.chars().count() > MAX_REPLY_CHARS {
        let cut: String = reply.chars().take(MAX_REPLY_CHARS).collect();
        (cut, FinishReason::Length, true)
    } else {
        (reply, FinishReason::Stop, false)
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::new(LatencyProfile::Disabled)
    }

    async fn seeded_thread(backend: &MemoryBackend, contents: &[(Role, &str)]) -> ThreadRecord {
        let thread = backend.create_thread_inner(None).await.unwrap();
        for (role, content) in contents {
            backend
                .add_message_inner(thread.id, NewMessage::new(*role, *content))
                .await
                .unwrap()
                .expect("append against a live thread");
        }
        backend.get_by_id_inner(thread.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn aggregates_track_retained_messages_exactly() {
        let backend = backend();
        let thread = seeded_thread(
            &backend,
            &[
                (Role::User, "abcde"),
                (Role::Assistant, "12345678"),
                (Role::User, "xyz"),
            ],
        )
        .await;

        let messages = backend.list_messages_inner(thread.id).await.unwrap();
        let expected_chars: u64 = messages.iter().map(|message| message.size_chars).sum();
        let expected_tokens: u64 = messages
            .iter()
            .map(|message| token_estimate(message.size_chars))
            .sum();

        assert_eq!(thread.size_chars, expected_chars);
        assert_eq!(thread.size_chars, 16);
        assert_eq!(thread.size_tokens, expected_tokens);
        // ceil(5/4) + ceil(8/4) + ceil(3/4)
        assert_eq!(thread.size_tokens, 2 + 2 + 1);
    }

    #[tokio::test]
    async fn created_thread_stays_hidden_until_first_user_message() {
        let backend = backend();
        let thread = backend.create_thread_inner(None).await.unwrap();
        assert!(thread.temporary);
        assert!(backend.list_threads_inner().await.unwrap().is_empty());

        backend
            .add_message_inner(thread.id, NewMessage::new(Role::User, "first"))
            .await
            .unwrap()
            .unwrap();

        let listed = backend.list_threads_inner().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, thread.id);
        assert!(!listed[0].temporary);

        // A second message must not re-trigger visibility changes.
        backend
            .add_message_inner(thread.id, NewMessage::new(Role::User, "second"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backend.list_threads_inner().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn activation_signal_fires_once_per_thread() {
        let backend = backend();
        let mut signal = backend.take_activation_signal().unwrap();
        assert!(backend.take_activation_signal().is_none());

        let thread = backend.create_thread_inner(None).await.unwrap();
        backend
            .add_message_inner(thread.id, NewMessage::new(Role::User, "activate"))
            .await
            .unwrap()
            .unwrap();
        backend
            .add_message_inner(thread.id, NewMessage::new(Role::User, "again"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(signal.try_recv().ok(), Some(thread.id));
        assert!(signal.try_recv().is_err());
    }

    #[tokio::test]
    async fn assistant_first_message_does_not_activate() {
        let backend = backend();
        let thread = backend.create_thread_inner(None).await.unwrap();
        backend
            .add_message_inner(thread.id, NewMessage::new(Role::Assistant, "greeting"))
            .await
            .unwrap()
            .unwrap();

        assert!(backend.list_threads_inner().await.unwrap().is_empty());
        let record = backend.get_by_id_inner(thread.id).await.unwrap().unwrap();
        assert!(record.temporary);
    }

    #[tokio::test]
    async fn trim_from_assistant_walks_back_to_prompting_user_message() {
        let backend = backend();
        let thread = seeded_thread(
            &backend,
            &[
                (Role::User, "u1"),
                (Role::Assistant, "a1"),
                (Role::User, "u2"),
                (Role::Assistant, "a2"),
            ],
        )
        .await;
        let messages = backend.list_messages_inner(thread.id).await.unwrap();
        let a2 = messages[3].id;

        let outcome = backend
            .trim_messages_from_inner(thread.id, a2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.retained_user_content, "u2");
        assert_eq!(outcome.removed_messages, 1);

        let retained = backend.list_messages_inner(thread.id).await.unwrap();
        assert_eq!(retained.len(), 3);
        assert_eq!(retained.last().unwrap().content, "u2");

        let record = backend.get_by_id_inner(thread.id).await.unwrap().unwrap();
        assert_eq!(record.size_chars, 6);
        assert_eq!(record.last_msg_at_unix_ms, retained[2].created_at_unix_ms);
    }

    #[tokio::test]
    async fn trim_from_user_message_retains_it_inclusively() {
        let backend = backend();
        let thread = seeded_thread(
            &backend,
            &[
                (Role::User, "u1"),
                (Role::Assistant, "a1"),
                (Role::User, "u2"),
                (Role::Assistant, "a2"),
            ],
        )
        .await;
        let messages = backend.list_messages_inner(thread.id).await.unwrap();
        let u2 = messages[2].id;

        let outcome = backend
            .trim_messages_from_inner(thread.id, u2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.retained_user_content, "u2");
        assert_eq!(backend.list_messages_inner(thread.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn trim_without_preceding_user_message_is_a_noop() {
        let backend = backend();
        let thread = backend.create_thread_inner(None).await.unwrap();
        let greeting = backend
            .add_message_inner(thread.id, NewMessage::new(Role::Assistant, "welcome"))
            .await
            .unwrap()
            .unwrap();

        let outcome = backend
            .trim_messages_from_inner(thread.id, greeting.id)
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(backend.list_messages_inner(thread.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trim_with_unknown_message_id_is_a_noop() {
        let backend = backend();
        let thread = seeded_thread(&backend, &[(Role::User, "u1")]).await;

        let outcome = backend
            .trim_messages_from_inner(thread.id, MessageId::new_v7())
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(backend.list_messages_inner(thread.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn soft_deleted_thread_resolves_to_empty_reads() {
        let backend = backend();
        let thread = seeded_thread(&backend, &[(Role::User, "keep me")]).await;

        backend.delete_thread_inner(thread.id).await.unwrap();

        assert!(backend.get_by_id_inner(thread.id).await.unwrap().is_none());
        assert!(backend.list_threads_inner().await.unwrap().is_empty());
        assert!(backend.list_messages_inner(thread.id).await.unwrap().is_empty());
        assert!(backend.thread_stats_inner(thread.id).await.unwrap().is_none());
        assert!(
            backend
                .add_message_inner(thread.id, NewMessage::new(Role::User, "late"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn generated_replies_are_deterministic_and_counted() {
        let backend = backend();
        let thread = seeded_thread(&backend, &[(Role::User, "I hit an error in my build")]).await;

        let first = backend
            .generate_response_inner(thread.id, "I hit an error in my build".to_string())
            .await
            .unwrap()
            .unwrap();
        let (expected, finish, truncated) = synthesize_reply("I hit an error in my build");
        assert_eq!(first.content, expected);
        assert_eq!(first.finish_reason, Some(finish));
        assert_eq!(first.truncated, truncated);

        let record = backend.get_by_id_inner(thread.id).await.unwrap().unwrap();
        assert_eq!(
            record.size_chars,
            char_count("I hit an error in my build") + first.size_chars
        );
    }

    #[test]
    fn overlong_fallback_reply_is_truncated_with_length_reason() {
        let long_prompt = "zq".repeat(400);
        let (content, finish, truncated) = synthesize_reply(&long_prompt);
        assert_eq!(content.chars().count(), MAX_REPLY_CHARS);
        assert_eq!(finish, FinishReason::Length);
        assert!(truncated);
    }

    #[tokio::test]
    async fn search_matches_case_insensitively_across_threads() {
        let backend = backend();
        let first = seeded_thread(&backend, &[(Role::User, "Deploy the Estimator")]).await;
        let second = seeded_thread(&backend, &[(Role::User, "nothing relevant")]).await;
        seeded_thread(&backend, &[(Role::User, "estimator budget follow-up")]).await;

        let hits = backend
            .search_messages_inner("ESTIMATOR".to_string())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|hit| hit.thread_id == first.id));
        assert!(hits.iter().all(|hit| hit.thread_id != second.id));

        assert!(
            backend
                .search_messages_inner("   ".to_string())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn listing_sorts_pinned_ahead_of_recency() {
        let backend = backend();
        let older = seeded_thread(&backend, &[(Role::User, "older")]).await;
        let newer = seeded_thread(&backend, &[(Role::User, "newer")]).await;

        {
            let mut state = backend.lock_state();
            let thread = state.threads.get_mut(&older.id).unwrap();
            thread.pinned = true;
            // Force a strict recency gap regardless of timer resolution.
            thread.last_msg_at_unix_ms = newer.last_msg_at_unix_ms.saturating_sub(10);
        }

        let listed = backend.list_threads_inner().await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
    }

    #[tokio::test]
    async fn blank_create_title_falls_back_to_default() {
        let backend = backend();
        let thread = backend
            .create_thread_inner(Some("   ".to_string()))
            .await
            .unwrap();
        assert_eq!(thread.title, DEFAULT_THREAD_TITLE);

        let named = backend
            .create_thread_inner(Some("  Budget run  ".to_string()))
            .await
            .unwrap();
        assert_eq!(named.title, "Budget run");
    }

    #[tokio::test]
    async fn thread_stats_count_roles_and_mirror_aggregates() {
        let backend = backend();
        let thread = seeded_thread(
            &backend,
            &[
                (Role::User, "one"),
                (Role::Assistant, "two"),
                (Role::User, "three"),
            ],
        )
        .await;

        let stats = backend
            .thread_stats_inner(thread.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.user_messages, 2);
        assert_eq!(stats.assistant_messages, 1);
        assert_eq!(stats.size_chars, thread.size_chars);
        assert_eq!(stats.size_tokens, thread.size_tokens);
    }
}
