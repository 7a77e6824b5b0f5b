use anyhow::Context;

use messaging_service::app::{self, Mode};
use messaging_service::config::ServiceConfig;
use messaging_service::shutdown::install_signal_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mode: Mode = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse()
            .map_err(anyhow::Error::msg)
            .context("usage: messaging-service [serve|api|processor]")?,
        None => Mode::default(),
    };

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    eprintln!("📨 Messaging service v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {}", mode);
    eprintln!("   Listening: http://{}", config.addr);
    eprintln!("   Database: {}", config.db_path.display());

    let cancel = install_signal_handler();
    app::run(config, mode, cancel).await
}
