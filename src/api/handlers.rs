//! Request handlers.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::ApiState;
use super::error::ApiError;
use super::types::{
    ConversationView, ConversationsResponse, EmailInboundFields, EmailOutboundRequest,
    IdResponse, MessageView, MessagesResponse, PageParams, SmsInboundFields, SmsOutboundRequest,
    decode_fields, parse_channel, parse_id, parse_timestamp, take_provider_ref,
};
use crate::model::{Endpoint, MessageId, NewMessage, ProviderRef};

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Outbound submissions ────────────────────────────────────────────────

/// POST /api/messages/sms
pub async fn create_sms(
    State(state): State<ApiState>,
    payload: Result<Json<SmsOutboundRequest>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let Json(req) = payload?;
    let sent_at = parse_timestamp(&req.timestamp)?;
    let channel = parse_channel(&req.kind)?;

    let id = store_outbound(
        &state,
        Endpoint::phone(channel, req.from),
        Endpoint::phone(channel, req.to),
        sent_at,
        req.body,
        req.attachments.unwrap_or_default(),
    )
    .await?;
    Ok(Json(IdResponse { id: id.to_string() }))
}

/// POST /api/messages/email
pub async fn create_email(
    State(state): State<ApiState>,
    payload: Result<Json<EmailOutboundRequest>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let Json(req) = payload?;
    let sent_at = parse_timestamp(&req.timestamp)?;

    let id = store_outbound(
        &state,
        Endpoint::email(req.from),
        Endpoint::email(req.to),
        sent_at,
        req.body,
        req.attachments.unwrap_or_default(),
    )
    .await?;
    Ok(Json(IdResponse { id: id.to_string() }))
}

async fn store_outbound(
    state: &ApiState,
    source: Endpoint,
    target: Endpoint,
    sent_at: DateTime<Utc>,
    body: String,
    attachments: Vec<String>,
) -> Result<MessageId, ApiError> {
    let conversation_id = state.db.resolve_conversation(&source, &target).await?;
    let message = NewMessage::outbound(conversation_id, source, target, sent_at, body, attachments);
    let id = state.db.insert_message(&message).await?;
    info!(id, conversation_id, kind = %message.source.kind(), "Outbound message queued");
    Ok(id)
}

// ── Inbound webhooks ────────────────────────────────────────────────────

/// POST /api/webhooks/sms
pub async fn sms_webhook(
    State(state): State<ApiState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let Json(mut raw) = payload?;
    let provider = take_provider_ref(&mut raw)?;
    let fields: SmsInboundFields = decode_fields(raw)?;
    let sent_at = parse_timestamp(&fields.timestamp)?;
    let channel = parse_channel(&fields.kind)?;

    let id = store_inbound(
        &state,
        Endpoint::phone(channel, fields.from),
        Endpoint::phone(channel, fields.to),
        sent_at,
        fields.body,
        fields.attachments.unwrap_or_default(),
        provider,
    )
    .await?;
    Ok(Json(IdResponse { id: id.to_string() }))
}

/// POST /api/webhooks/email
pub async fn email_webhook(
    State(state): State<ApiState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<IdResponse>, ApiError> {
    let Json(mut raw) = payload?;
    let provider = take_provider_ref(&mut raw)?;
    let fields: EmailInboundFields = decode_fields(raw)?;
    let sent_at = parse_timestamp(&fields.timestamp)?;

    let id = store_inbound(
        &state,
        Endpoint::email(fields.from),
        Endpoint::email(fields.to),
        sent_at,
        fields.body,
        fields.attachments.unwrap_or_default(),
        provider,
    )
    .await?;
    Ok(Json(IdResponse { id: id.to_string() }))
}

async fn store_inbound(
    state: &ApiState,
    source: Endpoint,
    target: Endpoint,
    sent_at: DateTime<Utc>,
    body: String,
    attachments: Vec<String>,
    provider: ProviderRef,
) -> Result<MessageId, ApiError> {
    let conversation_id = state.db.resolve_conversation(&source, &target).await?;
    let message = NewMessage::inbound(
        conversation_id,
        source,
        target,
        sent_at,
        body,
        attachments,
        provider,
    );
    let id = state.db.upsert_message_by_provider(&message).await?;
    info!(
        id,
        conversation_id,
        provider = ?message.provider,
        "Inbound message recorded"
    );
    Ok(id)
}

// ── Reads ───────────────────────────────────────────────────────────────

/// GET /api/messages
pub async fn list_messages(
    State(state): State<ApiState>,
    page: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let Query(page) = page?;
    let messages = state.db.list_messages(page.limit(), page.offset()).await?;
    Ok(Json(MessagesResponse {
        messages: messages.iter().map(MessageView::from).collect(),
    }))
}

/// GET /api/messages/{id}
pub async fn get_message(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let id = parse_id(&id)?;
    let message = state
        .db
        .get_message(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message {id} not found")))?;
    Ok(Json(MessagesResponse {
        messages: vec![MessageView::from(&message)],
    }))
}

/// GET /api/conversations
pub async fn list_conversations(
    State(state): State<ApiState>,
    page: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let Query(page) = page?;
    let conversations = state
        .db
        .list_conversations(page.limit(), page.offset())
        .await?;
    Ok(Json(ConversationsResponse {
        conversations: conversations.iter().map(ConversationView::from).collect(),
    }))
}

/// GET /api/conversations/{id}
pub async fn get_conversation(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let id = parse_id(&id)?;
    let conversation = state
        .db
        .get_conversation(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {id} not found")))?;
    Ok(Json(ConversationsResponse {
        conversations: vec![ConversationView::from(&conversation)],
    }))
}

/// GET /api/conversations/{id}/messages
pub async fn conversation_messages(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    page: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let id = parse_id(&id)?;
    let Query(page) = page?;

    if !state.db.conversation_exists(id).await? {
        return Err(ApiError::NotFound(format!("conversation {id} not found")));
    }

    let messages = state
        .db
        .list_conversation_messages(id, page.limit(), page.offset())
        .await?;
    debug!(conversation_id = id, count = messages.len(), "Listed conversation messages");
    Ok(Json(MessagesResponse {
        messages: messages.iter().map(MessageView::from).collect(),
    }))
}
