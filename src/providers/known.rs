//! Providers that may call our inbound webhooks.

/// A provider recognised in webhook payloads by its `<name>_id` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownProvider {
    Twilio,
    Sendgrid,
    MessagingProvider,
    Xillio,
}

impl KnownProvider {
    pub const ALL: [KnownProvider; 4] = [
        Self::Twilio,
        Self::Sendgrid,
        Self::MessagingProvider,
        Self::Xillio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Twilio => "twilio",
            Self::Sendgrid => "sendgrid",
            Self::MessagingProvider => "messaging_provider",
            Self::Xillio => "xillio",
        }
    }

    /// The JSON key carrying this provider's message id, e.g. `twilio_id`.
    pub fn id_key(&self) -> String {
        format!("{}_id", self.as_str())
    }

    /// All id keys, comma-separated, for error messages.
    pub fn expected_keys() -> String {
        Self::ALL
            .iter()
            .map(|p| p.id_key())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for KnownProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KnownProvider {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Unknown provider: {}", s))
    }
}
