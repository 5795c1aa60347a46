//! Test subscriber for a pushhub hub
//!
//! Serves a callback endpoint that passes the hub's verification handshake,
//! subscribes itself to a topic, and prints every payload the hub delivers,
//! checking the `X-Hub-Signature` header along the way.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use clap::Parser;
use pushhub::hub::signature;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "pushhub-subscribe")]
#[command(about = "Subscribe to a pushhub hub and print delivered payloads")]
#[command(version)]
struct Args {
    /// Hub endpoint to send the subscription request to
    #[arg(long, default_value = "http://localhost:8080/hub")]
    hub: String,

    /// Topic to subscribe to
    #[arg(long, default_value = "http://localhost:8080/testrepo/events/push")]
    topic: String,

    /// Address to serve the callback endpoint on
    #[arg(short, long, default_value = "0.0.0.0:54321")]
    bind: String,

    /// Host:port the hub should call us back on
    #[arg(long, default_value = "localhost:54321")]
    advertise: String,

    /// Secret used to key delivery signatures (random if omitted)
    #[arg(long)]
    secret: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    secret: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let secret = args
        .secret
        .clone()
        .unwrap_or_else(pushhub::publisher::generate_nonce);

    let app = Router::new()
        .route("/callback", get(verification_handler).post(delivery_handler))
        .with_state(CallbackState {
            secret: secret.clone(),
        });

    let bind_addr: SocketAddr = args.bind.parse().context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind callback listener")?;
    info!(addr = %bind_addr, "Callback server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "Callback server failed");
        }
    });

    // Now that we can answer the verification GET, ask the hub to subscribe us
    let callback = format!("http://{}/callback", args.advertise);
    let response = reqwest::Client::new()
        .post(&args.hub)
        .form(&[
            ("hub.mode", "subscribe"),
            ("hub.topic", &args.topic),
            ("hub.callback", &callback),
            ("hub.secret", &secret),
        ])
        .send()
        .await
        .context("Subscription request failed")?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status != StatusCode::ACCEPTED {
        anyhow::bail!("hub rejected subscription ({}): {}", status, body);
    }
    info!(topic = %args.topic, callback = %callback, "Subscription accepted, awaiting verification");

    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn verification_handler(
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mode = params.get("hub.mode").cloned().unwrap_or_default();
    let topic = params.get("hub.topic").cloned().unwrap_or_default();
    info!(mode = %mode, topic = %topic, "Echoing verification challenge");

    match params.get("hub.challenge") {
        Some(challenge) => (StatusCode::OK, challenge.clone()),
        None => (StatusCode::BAD_REQUEST, "missing hub.challenge".to_string()),
    }
}

async fn delivery_handler(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let received = headers
        .get("X-Hub-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let expected = signature(&state.secret, &body);
    if received != expected {
        warn!(received = %received, "Delivery signature mismatch, rejecting");
        return StatusCode::BAD_REQUEST;
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("(none)");
    println!("Received {} bytes ({})", body.len(), content_type);
    println!("{}", String::from_utf8_lossy(&body));
    StatusCode::OK
}
