//! Single-message transition: load, route, send, persist.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::model::{MessageId, MessageStatus};
use crate::providers::DeliveryRouter;
use crate::store::Database;

/// Drives one message one step through the status machine.
///
/// Terminal messages are left untouched. Routing and send failures park the
/// message in `retry` with a diagnostic payload so the next poll picks it up
/// again; there is no backoff and no attempt limit.
pub struct TransitionEngine {
    db: Arc<dyn Database>,
    router: DeliveryRouter,
}

impl TransitionEngine {
    pub fn new(db: Arc<dyn Database>, router: DeliveryRouter) -> Self {
        Self { db, router }
    }

    /// Attempt delivery of message `id` and persist the outcome.
    ///
    /// Returns the message's status after the attempt. Route and send
    /// failures are persisted as `retry` and then returned as errors.
    pub async fn transition(&self, id: MessageId) -> Result<MessageStatus, DeliveryError> {
        let message = self
            .db
            .get_message(id)
            .await?
            .ok_or(DeliveryError::MessageNotFound { id })?;

        if message.status.is_terminal() {
            debug!(id, status = %message.status, "Message already terminal, skipping");
            return Ok(message.status);
        }

        let provider = match self.router.choose(&message) {
            Ok(p) => p,
            Err(e) => {
                let err = DeliveryError::from(e);
                self.park_for_retry(id, &err).await;
                return Err(err);
            }
        };

        let response = match provider.send(&message).await {
            Ok(r) => r,
            Err(e) => {
                let err = DeliveryError::from(e);
                self.park_for_retry(id, &err).await;
                return Err(err);
            }
        };

        let status = MessageStatus::from(response.outcome);
        let provider_ref = response.provider_ref();
        self.db
            .update_message_status(
                id,
                status,
                provider_ref.as_ref(),
                response.status_payload.as_deref(),
            )
            .await?;

        info!(
            id,
            provider = %response.provider_id,
            provider_message_id = ?response.provider_message_id,
            status = %status,
            "Message transitioned"
        );
        Ok(status)
    }

    /// Record a failed attempt as `retry`. A failure to persist is only
    /// logged; the caller reports the original error.
    async fn park_for_retry(&self, id: MessageId, err: &DeliveryError) {
        let payload = err.to_string();
        if let Err(e) = self
            .db
            .update_message_status(id, MessageStatus::Retry, None, Some(&payload))
            .await
        {
            warn!(id, error = %e, "Failed to persist retry status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::ProviderError;
    use crate::model::{DeliveryOutcome, Endpoint, Message, NewMessage, PhoneChannel, ProviderRef};
    use crate::providers::{Provider, ProviderResponse, ScriptedOutcomes, SimulatedProvider};
    use crate::store::LibSqlBackend;

    /// Always fails at the transport level.
    struct DownProvider;

    #[async_trait]
    impl Provider for DownProvider {
        fn name(&self) -> &str {
            "down"
        }

        async fn send(&self, _message: &Message) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::RequestFailed {
                provider: "down".into(),
                reason: "connection refused".into(),
            })
        }
    }

    /// Reports a fixed response every time.
    struct FixedProvider(ProviderResponse);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            &self.0.provider_id
        }

        async fn send(&self, _message: &Message) -> Result<ProviderResponse, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn fixed(message_id: Option<&str>, outcome: DeliveryOutcome) -> Arc<dyn Provider> {
        Arc::new(FixedProvider(ProviderResponse {
            provider_id: "twilio".into(),
            provider_message_id: message_id.map(str::to_string),
            outcome,
            status_payload: Some("fixed".into()),
        }))
    }

    fn scripted(outcomes: Vec<DeliveryOutcome>) -> Arc<dyn Provider> {
        Arc::new(
            SimulatedProvider::twilio()
                .with_latency(std::time::Duration::ZERO, std::time::Duration::ZERO)
                .with_outcomes(Arc::new(ScriptedOutcomes::new(outcomes))),
        )
    }

    async fn setup() -> Arc<dyn Database> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    async fn sms_outbox(db: &Arc<dyn Database>, body: &str) -> MessageId {
        let from = Endpoint::phone(PhoneChannel::Sms, "+12016661234");
        let to = Endpoint::phone(PhoneChannel::Sms, "+18045551234");
        let conv = db.resolve_conversation(&from, &to).await.unwrap();
        db.insert_message(&NewMessage::outbound(conv, from, to, Utc::now(), body, vec![]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn terminal_message_is_not_touched() {
        let db = setup().await;
        let id = sms_outbox(&db, "hi").await;
        db.update_message_status(id, MessageStatus::Ok, None, Some("done"))
            .await
            .unwrap();
        let before = db.get_message(id).await.unwrap().unwrap();

        let engine = TransitionEngine::new(
            Arc::clone(&db),
            DeliveryRouter::default().with_sms(scripted(vec![DeliveryOutcome::Failed])),
        );
        let status = engine.transition(id).await.unwrap();

        assert_eq!(status, MessageStatus::Ok);
        let after = db.get_message(id).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn missing_message_is_not_found() {
        let db = setup().await;
        let engine = TransitionEngine::new(db, DeliveryRouter::default());
        assert!(matches!(
            engine.transition(99).await,
            Err(DeliveryError::MessageNotFound { id: 99 })
        ));
    }

    #[tokio::test]
    async fn route_failure_parks_in_retry() {
        let db = setup().await;
        let id = sms_outbox(&db, "hi").await;
        let engine = TransitionEngine::new(Arc::clone(&db), DeliveryRouter::default());

        let err = engine.transition(id).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Routing(_)));

        let msg = db.get_message(id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Retry);
        assert_eq!(
            msg.status_payload.as_deref(),
            Some("route error: no phone provider configured")
        );
    }

    #[tokio::test]
    async fn send_failure_parks_in_retry() {
        let db = setup().await;
        let id = sms_outbox(&db, "hi").await;
        let engine = TransitionEngine::new(
            Arc::clone(&db),
            DeliveryRouter::default().with_sms(Arc::new(DownProvider)),
        );

        let err = engine.transition(id).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Send(_)));

        let msg = db.get_message(id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Retry);
        let payload = msg.status_payload.unwrap();
        assert!(payload.starts_with("send error: "));
        assert!(payload.contains("connection refused"));
        assert!(msg.provider.is_none());
    }

    #[tokio::test]
    async fn success_persists_outcome_and_provider_pair() {
        let db = setup().await;
        let id = sms_outbox(&db, "hi").await;
        let engine = TransitionEngine::new(
            Arc::clone(&db),
            DeliveryRouter::default().with_sms(scripted(vec![DeliveryOutcome::Ok])),
        );

        let status = engine.transition(id).await.unwrap();
        assert_eq!(status, MessageStatus::Ok);

        let msg = db.get_message(id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Ok);
        let provider = msg.provider.unwrap();
        assert_eq!(provider.provider_id, "twilio");
        assert!(provider.message_id.starts_with("twilio-"));
        assert_eq!(
            msg.status_payload.as_deref(),
            Some("twilio simulated status: ok")
        );
    }

    #[tokio::test]
    async fn response_without_message_id_skips_provider_fields() {
        let db = setup().await;
        let id = sms_outbox(&db, "hi").await;
        let engine = TransitionEngine::new(
            Arc::clone(&db),
            DeliveryRouter::default().with_sms(fixed(None, DeliveryOutcome::Failed)),
        );

        assert_eq!(engine.transition(id).await.unwrap(), MessageStatus::Failed);
        let msg = db.get_message(id).await.unwrap().unwrap();
        assert!(msg.provider.is_none());
        assert_eq!(msg.status_payload.as_deref(), Some("fixed"));
    }

    #[tokio::test]
    async fn colliding_provider_pair_still_updates_status() {
        let db = setup().await;
        let first = sms_outbox(&db, "one").await;
        let second = sms_outbox(&db, "two").await;
        let engine = TransitionEngine::new(
            Arc::clone(&db),
            DeliveryRouter::default().with_sms(fixed(Some("twilio-same"), DeliveryOutcome::Ok)),
        );

        engine.transition(first).await.unwrap();
        engine.transition(second).await.unwrap();

        let first = db.get_message(first).await.unwrap().unwrap();
        let second = db.get_message(second).await.unwrap().unwrap();
        assert_eq!(first.provider, ProviderRef::new("twilio", "twilio-same"));
        assert_eq!(second.status, MessageStatus::Ok);
        assert!(second.provider.is_none());
    }
}
