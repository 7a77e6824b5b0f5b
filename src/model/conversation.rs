//! Conversations — threads keyed by an unordered pair of endpoints.

use chrono::{DateTime, Utc};

use super::endpoint::{Endpoint, EndpointKind, PhoneChannel};

pub type ConversationId = i64;

/// A conversation between two endpoints of the same kind and channel.
///
/// `source`/`target` keep the order of the first message that created the
/// thread; lookups treat the pair as unordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub source: Endpoint,
    pub target: Endpoint,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn kind(&self) -> EndpointKind {
        self.source.kind()
    }

    pub fn channel(&self) -> Option<PhoneChannel> {
        self.source.channel()
    }
}
