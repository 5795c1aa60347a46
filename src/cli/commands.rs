//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pushhub")]
#[command(about = "WebSub (PubSubHubbub) hub publishing git push events", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the hub and install the push hook in the current repository
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "PUSHHUB_LISTEN")]
        listen: String,

        /// Path the hub endpoint is mounted at
        #[arg(long, default_value = "/hub", env = "PUSHHUB_ENDPOINT")]
        hub_endpoint: String,

        /// URL prefix under which topics appear
        #[arg(
            long,
            default_value = "http://localhost:8080/",
            env = "PUSHHUB_TOPIC_PREFIX"
        )]
        topic_prefix: String,

        /// Subscription lease duration in seconds
        #[arg(long, default_value_t = 3 * 60 * 60, env = "PUSHHUB_LEASE_SECONDS")]
        lease_seconds: i64,
    },

    /// Relay a git hook invocation to the hub (run by git, not by hand)
    Hook,
}
