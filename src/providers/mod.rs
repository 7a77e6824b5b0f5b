//! Delivery providers.
//!
//! A [`Provider`] accepts one message and reports how the attempt went. The
//! [`DeliveryRouter`] picks a provider for a message from its endpoint kinds.
//! Real vendor integrations are not wired; [`SimulatedProvider`] stands in
//! for Twilio (phone) and SendGrid (email).

pub mod known;
pub mod router;
pub mod simulated;

pub use known::KnownProvider;
pub use router::DeliveryRouter;
pub use simulated::{OutcomeSource, RandomOutcomes, ScriptedOutcomes, SimulatedProvider};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{DeliveryOutcome, Message, ProviderRef};

/// What a provider reported for one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    /// Name of the provider that handled the attempt.
    pub provider_id: String,
    /// Id the provider assigned, if it assigned one.
    pub provider_message_id: Option<String>,
    pub outcome: DeliveryOutcome,
    pub status_payload: Option<String>,
}

impl ProviderResponse {
    /// The provider correlation, present only when both halves are non-empty.
    pub fn provider_ref(&self) -> Option<ProviderRef> {
        let message_id = self.provider_message_id.as_deref()?;
        ProviderRef::new(self.provider_id.as_str(), message_id)
    }
}

/// A delivery backend.
///
/// Implementations may be slow and may fail; the outbox poller calls `send`
/// sequentially and persists whatever comes back.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, e.g. `"twilio"`.
    fn name(&self) -> &str;

    /// Attempt delivery of one message.
    async fn send(&self, message: &Message) -> Result<ProviderResponse, ProviderError>;
}
