//! Message data model — direction, delivery status, provider correlation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conversation::ConversationId;
use super::endpoint::Endpoint;

pub type MessageId = i64;

/// Whether a message arrived from a provider or is being sent through one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

/// Delivery status of a message.
///
/// `Outbox` and `Retry` are picked up by the outbox poller; `Ok` and `Failed`
/// are terminal and never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Staged locally, not yet attempted.
    Outbox,
    /// Last attempt did not settle; poll again.
    Retry,
    /// Delivered.
    Ok,
    /// Permanently failed.
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbox => "outbox",
            Self::Retry => "retry",
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ok | Self::Failed)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbox" => Ok(Self::Outbox),
            "retry" => Ok(Self::Retry),
            "ok" => Ok(Self::Ok),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown message status: {}", s)),
        }
    }
}

/// Result of a single provider attempt. A provider cannot put a message back
/// into the outbox, so there is no `Outbox` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Ok,
    Failed,
    Retry,
}

impl DeliveryOutcome {
    pub const ALL: [DeliveryOutcome; 3] = [Self::Ok, Self::Failed, Self::Retry];
}

impl From<DeliveryOutcome> for MessageStatus {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Ok => Self::Ok,
            DeliveryOutcome::Failed => Self::Failed,
            DeliveryOutcome::Retry => Self::Retry,
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        MessageStatus::from(*self).fmt(f)
    }
}

/// Provider correlation: the provider's name plus the id it assigned.
///
/// The pair is unique across all stored messages and is the only
/// de-duplication key for provider-originated events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderRef {
    pub provider_id: String,
    pub message_id: String,
}

impl ProviderRef {
    /// Build a reference, or `None` if either half is empty.
    pub fn new(provider_id: impl Into<String>, message_id: impl Into<String>) -> Option<Self> {
        let provider_id = provider_id.into();
        let message_id = message_id.into();
        if provider_id.is_empty() || message_id.is_empty() {
            return None;
        }
        Some(Self {
            provider_id,
            message_id,
        })
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub source: Endpoint,
    pub target: Endpoint,
    pub direction: Direction,
    /// Caller-supplied event time; the poller orders by this.
    pub sent_at: DateTime<Utc>,
    pub body: String,
    pub attachments: Vec<String>,
    pub status: MessageStatus,
    pub status_payload: Option<String>,
    pub provider: Option<ProviderRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub source: Endpoint,
    pub target: Endpoint,
    pub direction: Direction,
    pub sent_at: DateTime<Utc>,
    pub body: String,
    pub attachments: Vec<String>,
    pub status: MessageStatus,
    pub status_payload: Option<String>,
    pub provider: Option<ProviderRef>,
}

impl NewMessage {
    /// A fresh outbound submission, staged in the outbox.
    pub fn outbound(
        conversation_id: ConversationId,
        source: Endpoint,
        target: Endpoint,
        sent_at: DateTime<Utc>,
        body: impl Into<String>,
        attachments: Vec<String>,
    ) -> Self {
        Self {
            conversation_id,
            source,
            target,
            direction: Direction::Outbound,
            sent_at,
            body: body.into(),
            attachments,
            status: MessageStatus::Outbox,
            status_payload: None,
            provider: None,
        }
    }

    /// A message delivered to us by a provider webhook. Already settled.
    pub fn inbound(
        conversation_id: ConversationId,
        source: Endpoint,
        target: Endpoint,
        sent_at: DateTime<Utc>,
        body: impl Into<String>,
        attachments: Vec<String>,
        provider: ProviderRef,
    ) -> Self {
        Self {
            conversation_id,
            source,
            target,
            direction: Direction::Inbound,
            sent_at,
            body: body.into(),
            attachments,
            status: MessageStatus::Ok,
            status_payload: None,
            provider: Some(provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(MessageStatus::Ok.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Outbox.is_terminal());
        assert!(!MessageStatus::Retry.is_terminal());
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            MessageStatus::Outbox,
            MessageStatus::Retry,
            MessageStatus::Ok,
            MessageStatus::Failed,
        ] {
            let back: MessageStatus = status.as_str().parse().unwrap();
            assert_eq!(back, status);
        }
        assert!("sent".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn outcomes_never_map_to_outbox() {
        for outcome in DeliveryOutcome::ALL {
            assert_ne!(MessageStatus::from(outcome), MessageStatus::Outbox);
        }
        assert_eq!(DeliveryOutcome::Retry.to_string(), "retry");
    }

    #[test]
    fn provider_ref_requires_both_halves() {
        assert!(ProviderRef::new("twilio", "").is_none());
        assert!(ProviderRef::new("", "msg-1").is_none());
        let r = ProviderRef::new("twilio", "msg-1").unwrap();
        assert_eq!(r.provider_id, "twilio");
        assert_eq!(r.message_id, "msg-1");
    }

    #[test]
    fn constructors_set_direction_and_status() {
        let src = Endpoint::email("a@x.com");
        let dst = Endpoint::email("b@x.com");

        let out = NewMessage::outbound(1, src.clone(), dst.clone(), Utc::now(), "hi", vec![]);
        assert_eq!(out.direction, Direction::Outbound);
        assert_eq!(out.status, MessageStatus::Outbox);
        assert!(out.provider.is_none());

        let provider = ProviderRef::new("sendgrid", "sg-1").unwrap();
        let inb = NewMessage::inbound(1, src, dst, Utc::now(), "yo", vec![], provider.clone());
        assert_eq!(inb.direction, Direction::Inbound);
        assert_eq!(inb.status, MessageStatus::Ok);
        assert_eq!(inb.provider, Some(provider));
    }
}
