//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. No row locks are taken:
//! duplicate conversations and duplicate provider pairs are prevented by
//! unique indexes plus `ON CONFLICT` clauses in the statements below.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::model::{
    Conversation, ConversationId, Direction, Endpoint, EndpointKind, Message, MessageId,
    MessageStatus, NewMessage, PhoneChannel, ProviderRef,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use,
/// so the HTTP handlers and the outbox poller share one backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::connect(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::connect(db).await
    }

    async fn connect(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Symmetric lookup: kind and channel must match, and the stored pair
    /// must equal the given pair under min/max ordering.
    async fn find_conversation(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<Option<ConversationId>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT id FROM conversations
                 WHERE endpoint_kind = ?1
                   AND phone_channel IS ?2
                   AND min(endpoint_source, endpoint_target) = min(?3, ?4)
                   AND max(endpoint_source, endpoint_target) = max(?3, ?4)
                 LIMIT 1",
                params![
                    source.kind().as_str(),
                    opt_text(source.channel().map(|c| c.as_str())),
                    source.payload(),
                    target.payload(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation: {e}")))?;

        first_id(rows, "find_conversation").await
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 (microseconds, `Z`) so text order equals time order.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp {s:?}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn text(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

fn int(row: &libsql::Row, idx: i32) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Serialization(format!("column {idx}: {e}")))
}

fn opt_string(row: &libsql::Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    match row.get_value(idx) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Text(s)) => Ok(Some(s)),
        Ok(other) => Err(DatabaseError::Serialization(format!(
            "column {idx}: expected text or null, got {other:?}"
        ))),
        Err(e) => Err(DatabaseError::Serialization(format!("column {idx}: {e}"))),
    }
}

/// Attachments are stored as a JSON array, NULL when there are none.
fn encode_attachments(attachments: &[String]) -> Result<Value, DatabaseError> {
    if attachments.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::to_string(attachments)
        .map(Value::Text)
        .map_err(|e| DatabaseError::Serialization(format!("attachments: {e}")))
}

fn decode_attachments(raw: Option<String>) -> Result<Vec<String>, DatabaseError> {
    match raw {
        None => Ok(Vec::new()),
        Some(s) if s.is_empty() => Ok(Vec::new()),
        Some(s) => serde_json::from_str(&s)
            .map_err(|e| DatabaseError::Serialization(format!("attachments: {e}"))),
    }
}

/// Rebuild the source/target endpoints from the shared kind/channel columns.
fn decode_endpoints(
    kind: &str,
    channel: Option<String>,
    source: String,
    target: String,
) -> Result<(Endpoint, Endpoint), DatabaseError> {
    let kind: EndpointKind = kind.parse().map_err(DatabaseError::Serialization)?;
    let channel: Option<PhoneChannel> = channel
        .map(|c| c.parse())
        .transpose()
        .map_err(DatabaseError::Serialization)?;

    let invalid = || {
        DatabaseError::Serialization(format!(
            "endpoint kind {kind} does not allow channel {channel:?}"
        ))
    };
    let source = Endpoint::from_parts(kind, channel, source).ok_or_else(invalid)?;
    let target = Endpoint::from_parts(kind, channel, target).ok_or_else(invalid)?;
    Ok((source, target))
}

/// Both ends of a conversation or message must share kind and channel; the
/// schema stores them once per row.
fn check_same_class(source: &Endpoint, target: &Endpoint) -> Result<(), DatabaseError> {
    if source.same_class(target) {
        return Ok(());
    }
    Err(DatabaseError::Constraint(format!(
        "endpoints differ in kind/channel: {}/{:?} vs {}/{:?}",
        source.kind(),
        source.channel(),
        target.kind(),
        target.channel()
    )))
}

/// Map a libsql Row to a Conversation.
///
/// Column order matches CONVERSATION_COLUMNS:
/// 0:id, 1:endpoint_kind, 2:phone_channel, 3:endpoint_source, 4:endpoint_target,
/// 5:created_at, 6:updated_at
fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let (source, target) =
        decode_endpoints(&text(row, 1)?, opt_string(row, 2)?, text(row, 3)?, text(row, 4)?)?;

    Ok(Conversation {
        id: int(row, 0)?,
        source,
        target,
        created_at: parse_datetime(&text(row, 5)?)?,
        updated_at: parse_datetime(&text(row, 6)?)?,
    })
}

/// Map a libsql Row to a Message.
///
/// Column order matches MESSAGE_COLUMNS:
/// 0:id, 1:conversation_id, 2:endpoint_source, 3:endpoint_target, 4:provider_id,
/// 5:provider_message_id, 6:direction, 7:sent_at, 8:endpoint_kind, 9:phone_channel,
/// 10:body, 11:attachments, 12:status_tag, 13:status_payload, 14:created_at, 15:updated_at
fn row_to_message(row: &libsql::Row) -> Result<Message, DatabaseError> {
    let (source, target) =
        decode_endpoints(&text(row, 8)?, opt_string(row, 9)?, text(row, 2)?, text(row, 3)?)?;

    let provider = match (opt_string(row, 4)?, opt_string(row, 5)?) {
        (Some(provider_id), Some(message_id)) => ProviderRef::new(provider_id, message_id),
        _ => None,
    };

    let direction: Direction = text(row, 6)?
        .parse()
        .map_err(DatabaseError::Serialization)?;
    let status: MessageStatus = text(row, 12)?
        .parse()
        .map_err(DatabaseError::Serialization)?;

    Ok(Message {
        id: int(row, 0)?,
        conversation_id: int(row, 1)?,
        source,
        target,
        direction,
        sent_at: parse_datetime(&text(row, 7)?)?,
        body: text(row, 10)?,
        attachments: decode_attachments(opt_string(row, 11)?)?,
        status,
        status_payload: opt_string(row, 13)?,
        provider,
        created_at: parse_datetime(&text(row, 14)?)?,
        updated_at: parse_datetime(&text(row, 15)?)?,
    })
}

/// Bind values for INSERT_MESSAGE_SQL (?1..?14).
fn message_params(message: &NewMessage, now: &str) -> Result<Vec<Value>, DatabaseError> {
    let provider = message.provider.as_ref();
    Ok(vec![
        Value::Integer(message.conversation_id),
        Value::Text(message.source.payload().to_string()),
        Value::Text(message.target.payload().to_string()),
        opt_text(provider.map(|p| p.provider_id.as_str())),
        opt_text(provider.map(|p| p.message_id.as_str())),
        Value::Text(message.direction.as_str().to_string()),
        Value::Text(fmt_ts(&message.sent_at)),
        Value::Text(message.source.kind().as_str().to_string()),
        opt_text(message.source.channel().map(|c| c.as_str())),
        Value::Text(message.body.clone()),
        encode_attachments(&message.attachments)?,
        Value::Text(message.status.as_str().to_string()),
        opt_text(message.status_payload.as_deref()),
        Value::Text(now.to_string()),
    ])
}

/// SQLite reads a negative LIMIT as unbounded, so saturate instead of wrapping.
fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

async fn first_id(mut rows: libsql::Rows, op: &str) -> Result<Option<i64>, DatabaseError> {
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(int(&row, 0)?)),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

async fn collect_messages(mut rows: libsql::Rows, op: &str) -> Result<Vec<Message>, DatabaseError> {
    let mut messages = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!("Skipping message row: {e}"),
            },
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
    Ok(messages)
}

// ── Trait implementation ────────────────────────────────────────────

const CONVERSATION_COLUMNS: &str =
    "id, endpoint_kind, phone_channel, endpoint_source, endpoint_target, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, endpoint_source, endpoint_target, provider_id, provider_message_id, direction, sent_at, endpoint_kind, phone_channel, body, attachments, status_tag, status_payload, created_at, updated_at";

const INSERT_MESSAGE_SQL: &str = "INSERT INTO messages (
        conversation_id, endpoint_source, endpoint_target, provider_id, provider_message_id,
        direction, sent_at, endpoint_kind, phone_channel, body, attachments,
        status_tag, status_payload, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn resolve_conversation(
        &self,
        source: &Endpoint,
        target: &Endpoint,
    ) -> Result<ConversationId, DatabaseError> {
        check_same_class(source, target)?;

        if let Some(id) = self.find_conversation(source, target).await? {
            return Ok(id);
        }

        let now = fmt_ts(&Utc::now());
        let rows = self
            .conn()
            .query(
                "INSERT INTO conversations (endpoint_kind, phone_channel, endpoint_source,
                    endpoint_target, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT DO NOTHING
                 RETURNING id",
                params![
                    source.kind().as_str(),
                    opt_text(source.channel().map(|c| c.as_str())),
                    source.payload(),
                    target.payload(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("resolve_conversation: {e}")))?;

        if let Some(id) = first_id(rows, "resolve_conversation").await? {
            info!(
                id,
                kind = %source.kind(),
                source = source.payload(),
                target = target.payload(),
                "Conversation created"
            );
            return Ok(id);
        }

        // Lost the race to a concurrent resolver; its row is the thread.
        debug!(
            source = source.payload(),
            target = target.payload(),
            "Conversation insert conflicted, re-reading"
        );
        self.find_conversation(source, target)
            .await?
            .ok_or_else(|| {
                DatabaseError::Query(
                    "resolve_conversation: conflicting conversation not found on re-read".into(),
                )
            })
    }

    async fn get_conversation(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn list_conversations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations ORDER BY id ASC LIMIT ?1 OFFSET ?2"
                ),
                params![sql_count(limit), sql_count(offset)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?;

        let mut conversations = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => match row_to_conversation(&row) {
                    Ok(conv) => conversations.push(conv),
                    Err(e) => warn!("Skipping conversation row: {e}"),
                },
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_conversations: {e}"))),
            }
        }
        Ok(conversations)
    }

    async fn conversation_exists(&self, id: ConversationId) -> Result<bool, DatabaseError> {
        let rows = self
            .conn()
            .query("SELECT id FROM conversations WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("conversation_exists: {e}")))?;

        Ok(first_id(rows, "conversation_exists").await?.is_some())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &NewMessage) -> Result<MessageId, DatabaseError> {
        check_same_class(&message.source, &message.target)?;

        let now = fmt_ts(&Utc::now());
        let rows = self
            .conn()
            .query(
                &format!(
                    "{INSERT_MESSAGE_SQL}
                     ON CONFLICT (provider_id, provider_message_id)
                     DO UPDATE SET updated_at = excluded.updated_at
                     RETURNING id"
                ),
                message_params(message, &now)?,
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        let id = first_id(rows, "insert_message")
            .await?
            .ok_or_else(|| DatabaseError::Query("insert_message: no id returned".into()))?;

        debug!(
            id,
            conversation_id = message.conversation_id,
            status = %message.status,
            "Message inserted into DB"
        );
        Ok(id)
    }

    async fn upsert_message_by_provider(
        &self,
        message: &NewMessage,
    ) -> Result<MessageId, DatabaseError> {
        check_same_class(&message.source, &message.target)?;

        let now = fmt_ts(&Utc::now());
        let rows = self
            .conn()
            .query(
                &format!(
                    "{INSERT_MESSAGE_SQL}
                     ON CONFLICT (provider_id, provider_message_id)
                     DO UPDATE SET
                       status_tag     = excluded.status_tag,
                       status_payload = excluded.status_payload,
                       updated_at     = excluded.updated_at
                     RETURNING id"
                ),
                message_params(message, &now)?,
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_message_by_provider: {e}")))?;

        let id = first_id(rows, "upsert_message_by_provider")
            .await?
            .ok_or_else(|| {
                DatabaseError::Query("upsert_message_by_provider: no id returned".into())
            })?;

        debug!(
            id,
            provider = ?message.provider,
            status = %message.status,
            "Message upserted by provider pair"
        );
        Ok(id)
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        provider: Option<&ProviderRef>,
        status_payload: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let now = fmt_ts(&Utc::now());

        let Some(provider) = provider else {
            let updated = self
                .conn()
                .execute(
                    "UPDATE messages SET status_tag = ?1, status_payload = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![status.as_str(), opt_text(status_payload), now, id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("update_message_status: {e}")))?;

            if updated == 0 {
                warn!(id, "update_message_status: no such message");
            } else {
                debug!(id, status = %status, "Message status updated in DB");
            }
            return Ok(());
        };

        // One statement: provider fields keep their old values when another
        // row already holds the pair, so the unique index is never hit.
        let mut rows = self
            .conn()
            .query(
                "UPDATE messages
                 SET
                   status_tag     = ?1,
                   status_payload = ?2,
                   updated_at     = ?3,
                   provider_id = CASE
                     WHEN EXISTS (
                       SELECT 1 FROM messages m2
                       WHERE m2.provider_id = ?4
                         AND m2.provider_message_id = ?5
                         AND m2.id <> messages.id
                     ) THEN provider_id
                     ELSE ?4
                   END,
                   provider_message_id = CASE
                     WHEN EXISTS (
                       SELECT 1 FROM messages m2
                       WHERE m2.provider_id = ?4
                         AND m2.provider_message_id = ?5
                         AND m2.id <> messages.id
                     ) THEN provider_message_id
                     ELSE ?5
                   END
                 WHERE id = ?6
                 RETURNING provider_id, provider_message_id",
                params![
                    status.as_str(),
                    opt_text(status_payload),
                    now,
                    provider.provider_id.as_str(),
                    provider.message_id.as_str(),
                    id,
                ],
            )
            .await
            .map_err(|e| {
                DatabaseError::Query(format!("update_message_status (CASE-guard): {e}"))
            })?;

        let row = rows.next().await.map_err(|e| {
            DatabaseError::Query(format!("update_message_status (CASE-guard): {e}"))
        })?;

        let Some(row) = row else {
            warn!(id, "update_message_status: no such message");
            return Ok(());
        };

        let kept_provider = opt_string(&row, 0)?;
        let kept_message_id = opt_string(&row, 1)?;
        if kept_provider.as_deref() != Some(provider.provider_id.as_str())
            || kept_message_id.as_deref() != Some(provider.message_id.as_str())
        {
            warn!(
                id,
                provider = %provider.provider_id,
                provider_message_id = %provider.message_id,
                "Provider pair already held by another message; correlation not recorded"
            );
        }
        debug!(id, status = %status, "Message status updated in DB");
        Ok(())
    }

    async fn poll_outbox_or_retry(&self, limit: usize) -> Result<Vec<Message>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE status_tag IN ('outbox', 'retry')
                     ORDER BY sent_at ASC, id ASC
                     LIMIT ?1"
                ),
                params![sql_count(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("poll_outbox_or_retry: {e}")))?;

        collect_messages(rows, "poll_outbox_or_retry").await
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<Message>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn list_conversation_messages(
        &self,
        conversation_id: ConversationId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY sent_at ASC, id ASC
                     LIMIT ?2 OFFSET ?3"
                ),
                params![conversation_id, sql_count(limit), sql_count(offset)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversation_messages: {e}")))?;

        collect_messages(rows, "list_conversation_messages").await
    }

    async fn list_messages(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     ORDER BY sent_at DESC, id DESC
                     LIMIT ?1 OFFSET ?2"
                ),
                params![sql_count(limit), sql_count(offset)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        collect_messages(rows, "list_messages").await
    }
}
