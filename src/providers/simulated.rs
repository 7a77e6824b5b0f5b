//! Simulated vendor — sleeps for a while, then reports a drawn outcome.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Provider, ProviderResponse};
use crate::error::ProviderError;
use crate::model::{DeliveryOutcome, Message};

/// Supplies the outcome of each simulated send.
pub trait OutcomeSource: Send + Sync {
    fn next_outcome(&self) -> DeliveryOutcome;
}

/// Uniformly random outcomes.
pub struct RandomOutcomes {
    seeded: Option<Mutex<StdRng>>,
}

impl RandomOutcomes {
    /// Draw from the thread-local RNG.
    pub fn new() -> Self {
        Self { seeded: None }
    }

    /// Reproducible sequence for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            seeded: Some(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }
}

impl Default for RandomOutcomes {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSource for RandomOutcomes {
    fn next_outcome(&self) -> DeliveryOutcome {
        let n = DeliveryOutcome::ALL.len();
        let idx = match &self.seeded {
            Some(rng) => rng
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .gen_range(0..n),
            None => rand::thread_rng().gen_range(0..n),
        };
        DeliveryOutcome::ALL[idx]
    }
}

/// Plays back a fixed schedule, then repeats its last entry forever.
/// An empty schedule always yields `Retry`.
pub struct ScriptedOutcomes {
    schedule: Vec<DeliveryOutcome>,
    cursor: Mutex<usize>,
}

impl ScriptedOutcomes {
    pub fn new(schedule: Vec<DeliveryOutcome>) -> Self {
        Self {
            schedule,
            cursor: Mutex::new(0),
        }
    }
}

impl OutcomeSource for ScriptedOutcomes {
    fn next_outcome(&self) -> DeliveryOutcome {
        let Some(last) = self.schedule.len().checked_sub(1) else {
            return DeliveryOutcome::Retry;
        };
        let mut cursor = self.cursor.lock().unwrap_or_else(|p| p.into_inner());
        let outcome = self.schedule[(*cursor).min(last)];
        *cursor += 1;
        outcome
    }
}

/// A provider that never leaves the process.
///
/// Each send sleeps `latency` plus up to `jitter`, assigns a fresh
/// `<name>-<uuid>` message id and reports the next outcome from its source.
pub struct SimulatedProvider {
    name: String,
    latency: Duration,
    jitter: Duration,
    outcomes: Arc<dyn OutcomeSource>,
}

impl SimulatedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::from_millis(100),
            jitter: Duration::from_millis(200),
            outcomes: Arc::new(RandomOutcomes::new()),
        }
    }

    /// SMS/MMS stand-in.
    pub fn twilio() -> Self {
        Self::new("twilio")
    }

    /// Email stand-in.
    pub fn sendgrid() -> Self {
        Self::new("sendgrid")
    }

    pub fn with_latency(mut self, latency: Duration, jitter: Duration) -> Self {
        self.latency = latency;
        self.jitter = jitter;
        self
    }

    pub fn with_outcomes(mut self, outcomes: Arc<dyn OutcomeSource>) -> Self {
        self.outcomes = outcomes;
        self
    }

    fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.latency;
        }
        self.latency + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &Message) -> Result<ProviderResponse, ProviderError> {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.outcomes.next_outcome();
        let provider_message_id = format!("{}-{}", self.name, uuid::Uuid::new_v4());

        debug!(
            id = message.id,
            provider = %self.name,
            provider_message_id = %provider_message_id,
            outcome = %outcome,
            "Simulated send"
        );

        Ok(ProviderResponse {
            provider_id: self.name.clone(),
            provider_message_id: Some(provider_message_id),
            outcome,
            status_payload: Some(format!("{} simulated status: {}", self.name, outcome)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, Endpoint, MessageStatus, PhoneChannel};
    use chrono::Utc;
    use std::collections::HashSet;

    fn sms_message() -> Message {
        let now = Utc::now();
        Message {
            id: 1,
            conversation_id: 1,
            source: Endpoint::phone(PhoneChannel::Sms, "+12016661234"),
            target: Endpoint::phone(PhoneChannel::Sms, "+18045551234"),
            direction: Direction::Outbound,
            sent_at: now,
            body: "hi".into(),
            attachments: vec![],
            status: MessageStatus::Outbox,
            status_payload: None,
            provider: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn scripted_outcomes_repeat_last() {
        let script = ScriptedOutcomes::new(vec![DeliveryOutcome::Retry, DeliveryOutcome::Ok]);
        assert_eq!(script.next_outcome(), DeliveryOutcome::Retry);
        assert_eq!(script.next_outcome(), DeliveryOutcome::Ok);
        assert_eq!(script.next_outcome(), DeliveryOutcome::Ok);
        assert_eq!(script.next_outcome(), DeliveryOutcome::Ok);
    }

    #[test]
    fn empty_script_yields_retry() {
        let script = ScriptedOutcomes::new(vec![]);
        assert_eq!(script.next_outcome(), DeliveryOutcome::Retry);
    }

    #[test]
    fn seeded_outcomes_are_reproducible() {
        let a = RandomOutcomes::seeded(42);
        let b = RandomOutcomes::seeded(42);
        let xs: Vec<_> = (0..20).map(|_| a.next_outcome()).collect();
        let ys: Vec<_> = (0..20).map(|_| b.next_outcome()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn random_outcomes_cover_every_outcome() {
        let source = RandomOutcomes::seeded(7);
        let seen: HashSet<_> = (0..200).map(|_| source.next_outcome()).collect();
        assert_eq!(seen.len(), DeliveryOutcome::ALL.len());
    }

    #[tokio::test]
    async fn send_reports_named_unique_ids() {
        let provider = SimulatedProvider::twilio()
            .with_latency(Duration::ZERO, Duration::ZERO)
            .with_outcomes(Arc::new(ScriptedOutcomes::new(vec![DeliveryOutcome::Failed])));
        let msg = sms_message();

        let first = provider.send(&msg).await.unwrap();
        let second = provider.send(&msg).await.unwrap();

        assert_eq!(provider.name(), "twilio");
        assert_eq!(first.provider_id, "twilio");
        assert_eq!(first.outcome, DeliveryOutcome::Failed);
        assert_eq!(
            first.status_payload.as_deref(),
            Some("twilio simulated status: failed")
        );

        let id1 = first.provider_message_id.unwrap();
        let id2 = second.provider_message_id.unwrap();
        assert!(id1.starts_with("twilio-"));
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn random_provider_only_reports_settled_or_retry() {
        let provider = SimulatedProvider::sendgrid().with_latency(Duration::ZERO, Duration::ZERO);
        let msg = sms_message();
        for _ in 0..12 {
            let resp = provider.send(&msg).await.unwrap();
            assert!(DeliveryOutcome::ALL.contains(&resp.outcome));
            assert!(resp.provider_ref().is_some());
        }
    }
}
