//! pushhub CLI entry point
//!
//! One binary, two personalities: `serve` runs the hub and installs itself
//! as the repository's post-receive hook; when git later invokes that hook
//! (argv[0] is `post-receive`, or the explicit `hook` subcommand), the same
//! binary relays the push payload to the serving process.

mod cli;

use crate::cli::{Cli, Commands};
use anyhow::{Context, Result};
use clap::Parser;
use pushhub::hub::{Hub, HubConfig};
use pushhub::publisher;
use pushhub::server::{self, HookState, HubState};
use pushhub::store::NullStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // git runs us under the hook's name; dispatch before clap sees argv
    let argv0 = std::env::args().next().unwrap_or_default();
    let invoked_as_hook = Path::new(&argv0)
        .file_name()
        .map(|n| n.to_string_lossy().starts_with("post-receive"))
        .unwrap_or(false);
    if invoked_as_hook {
        return Ok(publisher::relay_hook().await?);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            listen,
            hub_endpoint,
            topic_prefix,
            lease_seconds,
        } => serve(listen, hub_endpoint, topic_prefix, lease_seconds).await,
        Commands::Hook => Ok(publisher::relay_hook().await?),
    }
}

async fn serve(
    listen: String,
    hub_endpoint: String,
    topic_prefix: String,
    lease_seconds: i64,
) -> Result<()> {
    let git_dir = publisher::git_dir()
        .await
        .context("pushhub serve must run inside a git repository")?;
    let repo = publisher::repo_name(&git_dir).await?;
    let topic = publisher::topic_for(&topic_prefix, &repo);

    let config = HubConfig {
        lease_duration: chrono::Duration::seconds(lease_seconds),
        ..Default::default()
    };
    let valid_topic = topic.clone();
    let hub = Arc::new(Hub::new(
        config,
        Arc::new(move |t: &str| t == valid_topic),
        Arc::new(NullStore),
    ));
    hub.load().await?;

    // Loopback listener the push hook reports into, on an ephemeral port
    let nonce = publisher::generate_nonce();
    let hook_listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Listening on the local hook callback port failed")?;
    let hook_addr = hook_listener.local_addr()?;
    info!(addr = %hook_addr, "Listening for hook callbacks");

    let hook_app = server::hook_router(HookState {
        hub: hub.clone(),
        topic: topic.clone(),
        nonce: nonce.clone(),
    });
    tokio::spawn(async move {
        if let Err(e) = server::serve(hook_listener, hook_app).await {
            error!(error = %e, "Hook callback listener failed");
        }
    });

    let endpoint = format!("http://{}/", hook_addr);
    publisher::write_nonce_file(&git_dir, &endpoint, &nonce)
        .context("Failed to write pubsubhubbub nonce file")?;
    publisher::install_post_receive_hook(&git_dir)?;

    let bind_addr: SocketAddr = listen.parse().context("Invalid listen address")?;
    let app = server::hub_router(&hub_endpoint, HubState { hub: hub.clone() });

    println!("Serving pubsubhubbub on http://{}{}", listen, hub_endpoint);
    println!("Available topics:\n    {}", topic);

    // Run until a signal arrives, then clean the repo back up
    tokio::select! {
        result = server::run_server(bind_addr, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping hub");
        }
    }

    let in_flight = hub.in_flight_deliveries();
    if in_flight > 0 {
        warn!(in_flight = in_flight, "Exiting with deliveries still in flight");
    }
    publisher::remove_artifacts(&git_dir);

    info!("pushhub stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
