//! Endpoints — the addressable ends of a conversation (phone numbers, email addresses).

use serde::{Deserialize, Serialize};

/// Which addressing scheme an endpoint uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// E.164 phone number.
    Phone,
    /// Email address.
    Email,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
        }
    }
}

impl std::fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(Self::Phone),
            "email" => Ok(Self::Email),
            _ => Err(format!("Unknown endpoint kind: {}", s)),
        }
    }
}

/// Transport used by a phone endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneChannel {
    Sms,
    Mms,
}

impl PhoneChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Mms => "mms",
        }
    }
}

impl std::fmt::Display for PhoneChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive: request payloads send `"SMS"` as often as `"sms"`.
impl std::str::FromStr for PhoneChannel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sms" => Ok(Self::Sms),
            "mms" => Ok(Self::Mms),
            _ => Err(format!("Unknown phone channel: {}", s)),
        }
    }
}

/// One end of a conversation.
///
/// A phone endpoint always carries a [`PhoneChannel`]; an email endpoint never
/// does. Fields are private so that invariant cannot be broken after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: EndpointKind,
    channel: Option<PhoneChannel>,
    payload: String,
}

impl Endpoint {
    pub fn phone(channel: PhoneChannel, number: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Phone,
            channel: Some(channel),
            payload: number.into(),
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Email,
            channel: None,
            payload: address.into(),
        }
    }

    /// Rebuild an endpoint from stored columns.
    ///
    /// Returns `None` when the channel does not match the kind (phone without
    /// a channel, or email with one).
    pub fn from_parts(
        kind: EndpointKind,
        channel: Option<PhoneChannel>,
        payload: impl Into<String>,
    ) -> Option<Self> {
        match (kind, channel) {
            (EndpointKind::Phone, Some(ch)) => Some(Self::phone(ch, payload)),
            (EndpointKind::Email, None) => Some(Self::email(payload)),
            _ => None,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn channel(&self) -> Option<PhoneChannel> {
        self.channel
    }

    /// The phone number or email address.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Whether two endpoints can share a conversation (same kind and channel).
    pub fn same_class(&self, other: &Endpoint) -> bool {
        self.kind == other.kind && self.channel == other.channel
    }
}
