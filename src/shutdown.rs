//! Signal-driven shutdown.
//!
//! SIGINT (Ctrl+C) or SIGTERM cancels a single [`CancellationToken`] that
//! the HTTP server and the outbox poller both watch.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Install handlers for SIGINT and SIGTERM.
///
/// Returns a token that is cancelled when either signal arrives.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        token_clone.cancel();
        debug!("Shutdown signal handler completed");
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler, listening for Ctrl+C only: {e}");
            if ctrl_c.await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT (Ctrl+C), initiating shutdown");
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating shutdown"),
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C, signal shutdown disabled: {e}");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, initiating shutdown");
}
