//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::outbox::poller::{DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL};

/// Service configuration, read from `MESSAGING_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Address the HTTP server binds to.
    pub addr: SocketAddr,
    /// Pause between outbox poll cycles.
    pub poll_interval: Duration,
    /// Messages fetched per poll cycle.
    pub poll_batch_size: usize,
    /// Per-request timeout for HTTP handlers.
    pub request_timeout: Duration,
    /// How long shutdown waits for the server and poller to stop.
    pub shutdown_timeout: Duration,
    /// Base latency of the simulated providers.
    pub simulated_latency: Duration,
    /// Random extra latency of the simulated providers, up to this much.
    pub simulated_jitter: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/messaging.db"),
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(15),
            simulated_latency: Duration::from_millis(100),
            simulated_jitter: Duration::from_millis(200),
        }
    }
}

impl ServiceConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Unset or empty keys keep their
    /// defaults; values that do not parse are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let poll_batch_size: usize =
            parse_or(get("MESSAGING_POLL_BATCH_SIZE"), "MESSAGING_POLL_BATCH_SIZE", defaults.poll_batch_size)?;
        if poll_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESSAGING_POLL_BATCH_SIZE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            db_path: get("MESSAGING_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            addr: parse_or(get("MESSAGING_ADDR"), "MESSAGING_ADDR", defaults.addr)?,
            poll_interval: millis_or(
                get("MESSAGING_POLL_INTERVAL_MS"),
                "MESSAGING_POLL_INTERVAL_MS",
                defaults.poll_interval,
            )?,
            poll_batch_size,
            request_timeout: secs_or(
                get("MESSAGING_REQUEST_TIMEOUT_SECS"),
                "MESSAGING_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            )?,
            shutdown_timeout: secs_or(
                get("MESSAGING_SHUTDOWN_TIMEOUT_SECS"),
                "MESSAGING_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout,
            )?,
            simulated_latency: millis_or(
                get("MESSAGING_SIMULATED_LATENCY_MS"),
                "MESSAGING_SIMULATED_LATENCY_MS",
                defaults.simulated_latency,
            )?,
            simulated_jitter: millis_or(
                get("MESSAGING_SIMULATED_JITTER_MS"),
                "MESSAGING_SIMULATED_JITTER_MS",
                defaults.simulated_jitter,
            )?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{v:?}: {e}"),
        }),
    }
}

fn millis_or(raw: Option<String>, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(raw, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn secs_or(raw: Option<String>, key: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_or(raw, key, default.as_secs()).map(Duration::from_secs)
}
