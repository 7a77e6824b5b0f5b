//! Error types for the messaging service.

use crate::model::{EndpointKind, MessageId};

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Caller-supplied input that cannot be accepted. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid id: {0}")]
    BadId(String),

    #[error("Unknown message type: {0:?}")]
    BadType(String),

    #[error("Invalid RFC 3339 timestamp: {0:?}")]
    BadTimestamp(String),

    #[error("Payload must contain exactly one provider id key (one of {expected})")]
    MissingProviderKey { expected: String },

    #[error("Payload contains more than one provider id key: {keys}")]
    AmbiguousProviderKey { keys: String },

    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

/// No provider can carry a message.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no {kind} provider configured")]
    NotConfigured { kind: EndpointKind },

    #[error("no provider for source -> target: {from_kind} -> {to_kind}")]
    UnsupportedPair {
        from_kind: EndpointKind,
        to_kind: EndpointKind,
    },
}

/// A provider failed to accept a message.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

/// Failure of a single outbox transition.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("message {id} not found")]
    MessageNotFound { id: MessageId },

    #[error("route error: {0}")]
    Routing(#[from] RoutingError),

    #[error("send error: {0}")]
    Send(#[from] ProviderError),

    #[error("persist error: {0}")]
    Database(#[from] DatabaseError),
}
