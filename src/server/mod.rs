//! HTTP front end
//!
//! Two routers: the public hub endpoint subscribers POST subscription
//! requests to, and the loopback-only hook endpoint the git push hook POSTs
//! payloads to. Validation failures are answered synchronously with 400;
//! everything after the 202 boundary is asynchronous and logged-only, per
//! the protocol's verification contract.

use crate::hub::{Hub, VerifyMode};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared state for the hub endpoint
#[derive(Clone)]
pub struct HubState {
    pub hub: Arc<Hub>,
}

/// Shared state for the loopback hook endpoint
#[derive(Clone)]
pub struct HookState {
    pub hub: Arc<Hub>,
    /// The single topic push events are published under
    pub topic: String,
    /// Shared secret proving the POST came from our own git hook
    pub nonce: String,
}

/// Subscription request form, field names per the WebSub spec
///
/// Fields are optional so that missing ones reach the handler and come back
/// as a 400 with a reason, rather than as an extractor rejection.
#[derive(Debug, Deserialize)]
pub struct SubscriptionForm {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.callback")]
    pub callback: Option<String>,
    #[serde(rename = "hub.secret")]
    pub secret: Option<String>,
    // hub.lease_seconds is accepted but ignored; the hub's own lease
    // duration applies to everyone.
}

/// Create the public hub router, mounting the hub at `endpoint`
pub fn hub_router(endpoint: &str, state: HubState) -> Router {
    Router::new()
        .route(endpoint, post(subscription_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Create the loopback router the git hook POSTs into
pub fn hook_router(state: HookState) -> Router {
    Router::new()
        .route("/", post(hook_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn subscription_handler(
    State(state): State<HubState>,
    Form(form): Form<SubscriptionForm>,
) -> (StatusCode, String) {
    let mode = form.mode.unwrap_or_default();
    let topic = form.topic.unwrap_or_default();
    let callback = form.callback.unwrap_or_default();
    let secret = form.secret.unwrap_or_default();

    if !state.hub.topic_is_valid(&topic) {
        info!(mode = %mode, topic = %topic, "Rejected request for unknown topic");
        return (
            StatusCode::BAD_REQUEST,
            format!("Unknown topic '{}'", topic),
        );
    }

    let parsed = match url::Url::parse(&callback) {
        Ok(url) => url,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid callback '{}': not a valid URL: {}", callback, e),
            );
        }
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return (
            StatusCode::BAD_REQUEST,
            format!(
                "Invalid callback '{}': scheme must be http or https, got '{}'",
                callback,
                parsed.scheme()
            ),
        );
    }

    let mode = match mode.as_str() {
        "subscribe" => VerifyMode::Subscribe,
        "unsubscribe" => VerifyMode::Unsubscribe,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid mode: '{}'", other),
            );
        }
    };

    let sub = state.hub.new_subscription(topic, parsed, secret);

    // All synchronous checks passed: accept now, verify out of the response
    // cycle. The requester gets no further signal either way.
    let hub = state.hub.clone();
    tokio::spawn(async move {
        let (topic, callback) = (sub.topic.clone(), sub.callback.clone());
        if let Err(e) = hub.process_request(mode, sub).await {
            info!(
                mode = %mode,
                topic = %topic,
                callback = %callback,
                error = %e,
                "Verification failed, request dropped"
            );
        }
    });

    (
        StatusCode::ACCEPTED,
        format!("pubsubhubbub {} accepted, verifying", mode),
    )
}

async fn hook_handler(
    State(state): State<HookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let nonce = headers
        .get("X-Git-Pubsubhubbub-Nonce")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if nonce != state.nonce {
        warn!("Hook callback with incorrect nonce");
        return (StatusCode::FORBIDDEN, "Incorrect Nonce".to_string());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    match state.hub.notify(&state.topic, &content_type, body).await {
        Ok(dispatched) => {
            info!(topic = %state.topic, dispatched = dispatched, "Hook callback: OK");
            (StatusCode::OK, "OK".to_string())
        }
        Err(e) => {
            warn!(error = %e, "Notifying subscribers failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Notifying subscribers failed".to_string(),
            )
        }
    }
}

/// Serve a router on an already-bound listener
pub async fn serve(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bind and serve a router
pub async fn run_server(bind_addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "Hub server listening");
    serve(listener, app).await
}
