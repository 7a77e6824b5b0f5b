//! Unified `Database` trait — single async interface for conversation and
//! message persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{
    Conversation, ConversationId, Endpoint, Message, MessageId, MessageStatus, NewMessage,
    ProviderRef,
};

/// Backend-agnostic database trait.
///
/// Lookups by id return `Ok(None)` for a missing row; `Err` is reserved for
/// storage failures.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Find the conversation for an unordered endpoint pair, creating it if
    /// absent. `(a, b)` and `(b, a)` resolve to the same id.
    async fn resolve_conversation(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<ConversationId, DatabaseError>;

    /// Look up a conversation by id.
    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// List conversations in creation order.
    async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>, DatabaseError>;

    /// Check whether a conversation with this id exists.
    async fn conversation_exists(&self, id: ConversationId) -> Result<bool, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Append a freshly submitted message. If its provider pair is already
    /// taken, touch the existing row's `updated_at` and return that row's id.
    async fn insert_message(&self, message: &NewMessage) -> Result<MessageId, DatabaseError>;

    /// Insert, or overwrite status/payload of the row holding the same
    /// provider pair. Replays converge on one row and one id.
    async fn upsert_message_by_provider(
        &self,
        message: &NewMessage,
    ) -> Result<MessageId, DatabaseError>;

    /// Set status and payload. When `provider` is given it is written only if
    /// no other row already holds that pair; otherwise the row keeps its
    /// current provider fields.
    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        provider: Option<&ProviderRef>,
        status_payload: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Up to `limit` messages in `outbox` or `retry`, oldest `sent_at` first.
    async fn poll_outbox_or_retry(&self, limit: usize) -> Result<Vec<Message>, DatabaseError>;

    /// Look up a message by id.
    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, DatabaseError>;

    /// Messages of one conversation, oldest first.
    async fn list_conversation_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DatabaseError>;

    /// All messages, newest first.
    async fn list_messages(&self, limit: usize, offset: usize)
    -> Result<Vec<Message>, DatabaseError>;
}
