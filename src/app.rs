//! Process wiring — storage, providers, outbox poller and HTTP server, plus
//! shutdown ordering.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ServiceConfig;
use crate::outbox::{OutboxPoller, spawn_outbox_poller};
use crate::providers::{DeliveryRouter, SimulatedProvider};
use crate::store::{Database, LibSqlBackend};

/// Which parts of the service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// HTTP API and outbox poller.
    #[default]
    Serve,
    /// HTTP API only.
    Api,
    /// Outbox poller, plus `/healthz`.
    Processor,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serve => "serve",
            Self::Api => "api",
            Self::Processor => "processor",
        }
    }

    pub fn runs_poller(&self) -> bool {
        matches!(self, Self::Serve | Self::Processor)
    }

    pub fn serves_api(&self) -> bool {
        matches!(self, Self::Serve | Self::Api)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serve" => Ok(Self::Serve),
            "api" => Ok(Self::Api),
            "processor" => Ok(Self::Processor),
            _ => Err(format!("Unknown mode: {} (expected serve, api or processor)", s)),
        }
    }
}

/// Simulated Twilio for phone traffic, simulated SendGrid for email.
pub fn default_router(config: &ServiceConfig) -> DeliveryRouter {
    DeliveryRouter::default()
        .with_sms(Arc::new(
            SimulatedProvider::twilio()
                .with_latency(config.simulated_latency, config.simulated_jitter),
        ))
        .with_email(Arc::new(
            SimulatedProvider::sendgrid()
                .with_latency(config.simulated_latency, config.simulated_jitter),
        ))
}

/// Run the service until `cancel` fires.
///
/// On cancellation the HTTP server stops accepting connections and drains,
/// and the poller finishes its in-flight message. Both are awaited for at
/// most `shutdown_timeout`; the database handle is released last.
pub async fn run(config: ServiceConfig, mode: Mode, cancel: CancellationToken) -> anyhow::Result<()> {
    let backend = LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    let db: Arc<dyn Database> = Arc::new(backend);

    let app = if mode.serves_api() {
        api::router(Arc::clone(&db), config.request_timeout)
    } else {
        api::with_http_layers(api::health_routes(), config.request_timeout)
    };

    // Every fallible startup step comes before the poller is spawned, so an
    // early return never leaves a detached task holding the database.
    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(
        addr = %listener.local_addr().context("listener has no local address")?,
        mode = %mode,
        "Messaging service listening"
    );

    let poller = mode.runs_poller().then(|| {
        let poller = OutboxPoller::new(Arc::clone(&db), default_router(&config))
            .with_interval(config.poll_interval)
            .with_batch_size(config.poll_batch_size);
        spawn_outbox_poller(poller, cancel.clone())
    });

    let server_cancel = cancel.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    let mut server_done = false;
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = &mut server => {
            server_done = true;
            log_server_exit(result);
            cancel.cancel();
        }
    }

    info!("Shutting down...");
    let drain = async {
        if !server_done {
            log_server_exit(server.await);
        }
        if let Some(poller) = poller {
            match poller.await {
                Ok(cycles) => info!(cycles, "Outbox poller stopped"),
                Err(e) => error!("Outbox poller task failed: {e}"),
            }
        }
    };

    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Shutdown timed out, abandoning in-flight work"
        );
    }

    drop(db);
    info!("Shutdown complete");
    Ok(())
}

fn log_server_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("HTTP server stopped"),
        Ok(Err(e)) => error!("HTTP server error: {e}"),
        Err(e) => error!("HTTP server task failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn mode_parse_and_roles() {
        assert_eq!("serve".parse::<Mode>().unwrap(), Mode::Serve);
        assert_eq!("processor".parse::<Mode>().unwrap(), Mode::Processor);
        assert!("worker".parse::<Mode>().is_err());
        assert_eq!(Mode::default(), Mode::Serve);

        assert!(Mode::Serve.runs_poller() && Mode::Serve.serves_api());
        assert!(!Mode::Api.runs_poller() && Mode::Api.serves_api());
        assert!(Mode::Processor.runs_poller() && !Mode::Processor.serves_api());
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            db_path: tmp.path().join("messaging.db"),
            addr: "127.0.0.1:0".parse().unwrap(),
            poll_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(2),
            ..ServiceConfig::default()
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(config, Mode::Serve, cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("service did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn bind_failure_starts_no_poller() {
        use crate::model::{Endpoint, MessageStatus, NewMessage, PhoneChannel};

        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("messaging.db");
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        let from = Endpoint::phone(PhoneChannel::Sms, "+12015550100");
        let to = Endpoint::phone(PhoneChannel::Sms, "+18045550100");
        let conv = db.resolve_conversation(&from, &to).await.unwrap();
        let id = db
            .insert_message(&NewMessage::outbound(
                conv,
                from,
                to,
                chrono::Utc::now(),
                "queued",
                vec![],
            ))
            .await
            .unwrap();

        let config = ServiceConfig {
            db_path,
            addr: taken.local_addr().unwrap(),
            poll_interval: Duration::from_millis(10),
            simulated_latency: Duration::ZERO,
            simulated_jitter: Duration::ZERO,
            ..ServiceConfig::default()
        };
        let cancel = CancellationToken::new();
        assert!(run(config, Mode::Serve, cancel).await.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let message = db.get_message(id).await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Outbox);
    }
}
