//! Background outbox poller — repeatedly drains `outbox`/`retry` messages
//! through the [`TransitionEngine`].
//!
//! Each cycle:
//! 1. `poll_outbox_or_retry(batch_size)`, oldest `sent_at` first
//! 2. `transition()` each message in order, logging failures and moving on
//! 3. sleep `interval`, waking early on cancellation

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transition::TransitionEngine;
use crate::error::DatabaseError;
use crate::providers::DeliveryRouter;
use crate::store::Database;

/// Default pause between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of messages fetched per cycle.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Messages returned by the poll.
    pub fetched: usize,
    /// Messages whose transition returned a status.
    pub transitioned: usize,
    /// Messages whose transition returned an error.
    pub errors: usize,
    /// Cancellation stopped the batch before every message was visited.
    pub interrupted: bool,
}

pub struct OutboxPoller {
    engine: TransitionEngine,
    db: Arc<dyn Database>,
    batch_size: usize,
    interval: Duration,
}

impl OutboxPoller {
    pub fn new(db: Arc<dyn Database>, router: DeliveryRouter) -> Self {
        Self {
            engine: TransitionEngine::new(Arc::clone(&db), router),
            db,
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One fetch-and-process pass, without cancellation.
    pub async fn run_cycle(&self) -> Result<CycleSummary, DatabaseError> {
        self.cycle(&CancellationToken::new()).await
    }

    /// Run cycles until `cancel` fires. Returns the number of cycles that
    /// completed a full batch.
    pub async fn run(&self, cancel: CancellationToken) -> u64 {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Outbox poller started"
        );

        let mut cycles: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.cycle(&cancel).await {
                Ok(summary) if summary.interrupted => {
                    info!(
                        transitioned = summary.transitioned,
                        "Outbox cycle interrupted by shutdown"
                    );
                    break;
                }
                Ok(summary) => {
                    cycles += 1;
                    if summary.fetched > 0 {
                        info!(
                            fetched = summary.fetched,
                            transitioned = summary.transitioned,
                            errors = summary.errors,
                            "Outbox cycle complete"
                        );
                    }
                }
                Err(e) => error!("Outbox poll failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(cycles, "Outbox poller shutting down");
        cycles
    }

    async fn cycle(&self, cancel: &CancellationToken) -> Result<CycleSummary, DatabaseError> {
        let batch = self.db.poll_outbox_or_retry(self.batch_size).await?;
        let mut summary = CycleSummary {
            fetched: batch.len(),
            ..CycleSummary::default()
        };

        if batch.is_empty() {
            return Ok(summary);
        }
        debug!("Got {} pending message(s)", batch.len());

        for (i, message) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            debug!(
                id = message.id,
                "Processing message {}/{}",
                i + 1,
                batch.len()
            );
            match self.engine.transition(message.id).await {
                Ok(status) => {
                    summary.transitioned += 1;
                    debug!(id = message.id, status = %status, "New status");
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(id = message.id, error = %e, "Transition failed");
                }
            }
        }

        Ok(summary)
    }
}

/// Spawn the poller on its own task. The handle resolves to the number of
/// completed cycles once `cancel` fires and the in-flight message finishes.
pub fn spawn_outbox_poller(poller: OutboxPoller, cancel: CancellationToken) -> JoinHandle<u64> {
    tokio::spawn(async move { poller.run(cancel).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use crate::error::ProviderError;
    use crate::model::{
        DeliveryOutcome, Endpoint, Message, MessageId, MessageStatus, NewMessage, PhoneChannel,
    };
    use crate::providers::{Provider, ProviderResponse, ScriptedOutcomes, SimulatedProvider};
    use crate::store::LibSqlBackend;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn setup() -> Arc<dyn Database> {
        Arc::new(LibSqlBackend::new_memory().await.unwrap())
    }

    fn scripted(outcomes: Vec<DeliveryOutcome>) -> DeliveryRouter {
        DeliveryRouter::default().with_sms(Arc::new(
            SimulatedProvider::twilio()
                .with_latency(Duration::ZERO, Duration::ZERO)
                .with_outcomes(Arc::new(ScriptedOutcomes::new(outcomes))),
        ))
    }

    async fn sms_outbox(db: &Arc<dyn Database>, offset_secs: i64) -> MessageId {
        let from = Endpoint::phone(PhoneChannel::Sms, "+12016661234");
        let to = Endpoint::phone(PhoneChannel::Sms, "+18045551234");
        let conv = db.resolve_conversation(&from, &to).await.unwrap();
        let sent_at =
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(offset_secs);
        db.insert_message(&NewMessage::outbound(conv, from, to, sent_at, "hi", vec![]))
            .await
            .unwrap()
    }

    async fn status(db: &Arc<dyn Database>, id: MessageId) -> MessageStatus {
        db.get_message(id).await.unwrap().unwrap().status
    }

    /// Cancels the shared token as soon as it is asked to send.
    struct CancelOnSend(CancellationToken);

    #[async_trait]
    impl Provider for CancelOnSend {
        fn name(&self) -> &str {
            "twilio"
        }

        async fn send(&self, _message: &Message) -> Result<ProviderResponse, ProviderError> {
            self.0.cancel();
            Ok(ProviderResponse {
                provider_id: "twilio".into(),
                provider_message_id: None,
                outcome: DeliveryOutcome::Ok,
                status_payload: None,
            })
        }
    }

    #[tokio::test]
    async fn cycle_processes_whole_batch() {
        let db = setup().await;
        let a = sms_outbox(&db, 0).await;
        let b = sms_outbox(&db, 1).await;
        let poller = OutboxPoller::new(Arc::clone(&db), scripted(vec![DeliveryOutcome::Ok]));

        let summary = poller.run_cycle().await.unwrap();
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.transitioned, 2);
        assert_eq!(summary.errors, 0);
        assert!(!summary.interrupted);
        assert_eq!(status(&db, a).await, MessageStatus::Ok);
        assert_eq!(status(&db, b).await, MessageStatus::Ok);

        let again = poller.run_cycle().await.unwrap();
        assert_eq!(again.fetched, 0);
    }

    #[tokio::test]
    async fn cycle_respects_batch_size() {
        let db = setup().await;
        for i in 0..5 {
            sms_outbox(&db, i).await;
        }
        let poller = OutboxPoller::new(Arc::clone(&db), scripted(vec![DeliveryOutcome::Failed]))
            .with_batch_size(2);

        assert_eq!(poller.run_cycle().await.unwrap().fetched, 2);
        assert_eq!(db.poll_outbox_or_retry(100).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn per_message_errors_do_not_stop_the_batch() {
        let db = setup().await;
        let email_from = Endpoint::email("a@x.com");
        let email_to = Endpoint::email("b@x.com");
        let conv = db.resolve_conversation(&email_from, &email_to).await.unwrap();
        let unroutable = db
            .insert_message(&NewMessage::outbound(
                conv,
                email_from,
                email_to,
                Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                "no email provider",
                vec![],
            ))
            .await
            .unwrap();
        let sms = sms_outbox(&db, 0).await;

        // Only an SMS provider is configured.
        let poller = OutboxPoller::new(Arc::clone(&db), scripted(vec![DeliveryOutcome::Ok]));
        let summary = poller.run_cycle().await.unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.transitioned, 1);
        assert_eq!(status(&db, unroutable).await, MessageStatus::Retry);
        assert_eq!(status(&db, sms).await, MessageStatus::Ok);
    }

    #[tokio::test]
    async fn retry_is_reattempted_until_terminal() {
        let db = setup().await;
        let id = sms_outbox(&db, 0).await;
        let poller = OutboxPoller::new(
            Arc::clone(&db),
            scripted(vec![
                DeliveryOutcome::Retry,
                DeliveryOutcome::Retry,
                DeliveryOutcome::Failed,
            ]),
        );

        poller.run_cycle().await.unwrap();
        assert_eq!(status(&db, id).await, MessageStatus::Retry);
        poller.run_cycle().await.unwrap();
        assert_eq!(status(&db, id).await, MessageStatus::Retry);
        poller.run_cycle().await.unwrap();
        assert_eq!(status(&db, id).await, MessageStatus::Failed);

        assert_eq!(poller.run_cycle().await.unwrap().fetched, 0);
    }

    #[tokio::test]
    async fn cancellation_between_messages_finishes_in_flight_one() {
        let db = setup().await;
        let first = sms_outbox(&db, 0).await;
        let second = sms_outbox(&db, 1).await;

        let cancel = CancellationToken::new();
        let router = DeliveryRouter::default().with_sms(Arc::new(CancelOnSend(cancel.clone())));
        let poller = OutboxPoller::new(Arc::clone(&db), router);

        let summary = poller.cycle(&cancel).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.transitioned, 1);
        assert_eq!(status(&db, first).await, MessageStatus::Ok);
        assert_eq!(status(&db, second).await, MessageStatus::Outbox);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_no_cycles() {
        let db = setup().await;
        let poller = OutboxPoller::new(db, DeliveryRouter::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(poller.run(cancel).await, 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let db = setup().await;
        let id = sms_outbox(&db, 0).await;
        let poller = OutboxPoller::new(Arc::clone(&db), scripted(vec![DeliveryOutcome::Ok]))
            .with_interval(Duration::from_secs(3600));

        let cancel = CancellationToken::new();
        let handle = spawn_outbox_poller(poller, cancel.clone());

        // Wait for the first cycle to land, then cancel mid-sleep.
        tokio::time::timeout(TEST_TIMEOUT, async {
            while status(&db, id).await != MessageStatus::Ok {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first cycle did not complete");
        cancel.cancel();

        let cycles = tokio::time::timeout(TEST_TIMEOUT, handle)
            .await
            .expect("poller did not stop promptly")
            .unwrap();
        assert_eq!(cycles, 1);
    }
}
