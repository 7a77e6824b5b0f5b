//! Request bodies and JSON views for the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;
use crate::model::{Conversation, Message, PhoneChannel, ProviderRef};
use crate::providers::KnownProvider;

/// Default and fallback page size for list endpoints.
pub const DEFAULT_PAGE_SIZE: usize = 200;

// ── Requests ────────────────────────────────────────────────────────────

/// POST /api/messages/sms
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmsOutboundRequest {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    pub timestamp: String,
}

/// POST /api/messages/email
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailOutboundRequest {
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    pub timestamp: String,
}

/// Message fields of an SMS/MMS webhook. Providers add their own keys, so
/// unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct SmsInboundFields {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    pub timestamp: String,
}

/// Message fields of an email webhook.
#[derive(Debug, Deserialize)]
pub struct EmailInboundFields {
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    pub timestamp: String,
}

/// `?limit=&offset=` on list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageParams {
    pub fn limit(&self) -> usize {
        match self.limit {
            Some(0) | None => DEFAULT_PAGE_SIZE,
            Some(n) => n,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

// ── Field parsing ───────────────────────────────────────────────────────

pub fn parse_id(raw: &str) -> Result<i64, ValidationError> {
    raw.parse::<i64>()
        .map_err(|_| ValidationError::BadId(raw.to_string()))
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ValidationError::BadTimestamp(raw.to_string()))
}

pub fn parse_channel(raw: &str) -> Result<PhoneChannel, ValidationError> {
    raw.parse()
        .map_err(|_| ValidationError::BadType(raw.to_string()))
}

/// Pull the single `<provider>_id` key out of a webhook payload.
///
/// Exactly one known provider key with a non-empty string value must be
/// present. The key is removed from `raw` so the rest can be decoded as
/// message fields.
pub fn take_provider_ref(raw: &mut Map<String, Value>) -> Result<ProviderRef, ValidationError> {
    let mut found: Vec<(KnownProvider, String)> = KnownProvider::ALL
        .into_iter()
        .filter_map(|p| match raw.get(&p.id_key()) {
            Some(Value::String(id)) if !id.is_empty() => Some((p, id.clone())),
            _ => None,
        })
        .collect();

    if found.len() > 1 {
        let keys = found
            .iter()
            .map(|(p, _)| p.id_key())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ValidationError::AmbiguousProviderKey { keys });
    }

    let missing = || ValidationError::MissingProviderKey {
        expected: KnownProvider::expected_keys(),
    };
    let (provider, message_id) = found.pop().ok_or_else(missing)?;
    raw.remove(&provider.id_key());
    ProviderRef::new(provider.as_str(), message_id).ok_or_else(missing)
}

pub fn decode_fields<T: serde::de::DeserializeOwned>(
    raw: Map<String, Value>,
) -> Result<T, ValidationError> {
    serde_json::from_value(Value::Object(raw))
        .map_err(|e| ValidationError::MalformedBody(e.to_string()))
}

// ── Responses ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationView>,
}

/// Conversation as rendered to callers: kind and channel flattened, id as
/// a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub id: String,
    pub endpoint_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub endpoint_source: String,
    pub endpoint_target: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationView {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id.to_string(),
            endpoint_kind: c.kind().to_string(),
            channel: c.channel().map(|ch| ch.to_string()),
            endpoint_source: c.source.payload().to_string(),
            endpoint_target: c.target.payload().to_string(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderView {
    pub id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: String,
    pub conversation_id: String,
    pub endpoint_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub from: String,
    pub to: String,
    pub direction: String,
    pub sent_at: DateTime<Utc>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Message> for MessageView {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.to_string(),
            conversation_id: m.conversation_id.to_string(),
            endpoint_kind: m.source.kind().to_string(),
            channel: m.source.channel().map(|ch| ch.to_string()),
            from: m.source.payload().to_string(),
            to: m.target.payload().to_string(),
            direction: m.direction.to_string(),
            sent_at: m.sent_at,
            body: m.body.clone(),
            attachments: m.attachments.clone(),
            status: m.status.to_string(),
            status_payload: m.status_payload.clone(),
            provider: m.provider.as_ref().map(|p| ProviderView {
                id: p.provider_id.clone(),
                message_id: p.message_id.clone(),
            }),
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
