//! Endpoint-kind based provider selection.

use std::sync::Arc;

use crate::error::RoutingError;
use crate::model::{EndpointKind, Message};

use super::Provider;

/// Maps a message's (source kind, target kind) pair to a provider.
///
/// phone → phone goes to the SMS/MMS provider, email → email to the email
/// provider. Anything else is unroutable.
#[derive(Clone, Default)]
pub struct DeliveryRouter {
    sms: Option<Arc<dyn Provider>>,
    email: Option<Arc<dyn Provider>>,
}

impl DeliveryRouter {
    pub fn new(sms: Option<Arc<dyn Provider>>, email: Option<Arc<dyn Provider>>) -> Self {
        Self { sms, email }
    }

    pub fn with_sms(mut self, provider: Arc<dyn Provider>) -> Self {
        self.sms = Some(provider);
        self
    }

    pub fn with_email(mut self, provider: Arc<dyn Provider>) -> Self {
        self.email = Some(provider);
        self
    }

    /// Pick the provider for this message.
    pub fn choose(&self, message: &Message) -> Result<Arc<dyn Provider>, RoutingError> {
        let slot = match (message.source.kind(), message.target.kind()) {
            (EndpointKind::Phone, EndpointKind::Phone) => &self.sms,
            (EndpointKind::Email, EndpointKind::Email) => &self.email,
            (from_kind, to_kind) => {
                return Err(RoutingError::UnsupportedPair { from_kind, to_kind });
            }
        };

        slot.clone().ok_or(RoutingError::NotConfigured {
            kind: message.source.kind(),
        })
    }
}

impl std::fmt::Debug for DeliveryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRouter")
            .field("sms", &self.sms.as_ref().map(|p| p.name().to_string()))
            .field("email", &self.email.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}
