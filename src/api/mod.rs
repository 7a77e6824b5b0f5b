//! HTTP API — outbound submission, provider webhooks, and read endpoints.

pub mod error;
pub mod handlers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::store::Database;

pub use error::ApiError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
}

/// The `/api` routes.
pub fn api_routes(db: Arc<dyn Database>) -> Router {
    let state = ApiState { db };

    Router::new()
        .route("/api/messages", get(handlers::list_messages))
        .route("/api/messages/sms", post(handlers::create_sms))
        .route("/api/messages/email", post(handlers::create_email))
        .route("/api/messages/{id}", get(handlers::get_message))
        .route("/api/webhooks/sms", post(handlers::sms_webhook))
        .route("/api/webhooks/email", post(handlers::email_webhook))
        .route("/api/conversations", get(handlers::list_conversations))
        .route("/api/conversations/{id}", get(handlers::get_conversation))
        .route(
            "/api/conversations/{id}/messages",
            get(handlers::conversation_messages),
        )
        .with_state(state)
}

/// `GET /healthz` only. Served alone in processor mode.
pub fn health_routes() -> Router {
    Router::new().route("/healthz", get(handlers::health))
}

/// Wrap a router with request tracing and a per-request timeout.
pub fn with_http_layers(router: Router, request_timeout: Duration) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                request_timeout,
            )),
    )
}

/// Full HTTP surface: health plus the `/api` routes.
pub fn router(db: Arc<dyn Database>, request_timeout: Duration) -> Router {
    with_http_layers(health_routes().merge(api_routes(db)), request_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_request_times_out_with_408() {
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let app = with_http_layers(slow, Duration::from_millis(50));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let resp = reqwest::get(format!("http://{addr}/slow")).await.unwrap();
        assert_eq!(resp.status(), 408);
    }
}
