//! Command-line surface for the gateway binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Transparent HTTP gateway with preemptive conversation summarization.
#[derive(Debug, Parser)]
#[command(name = "gateway", version)]
pub struct Args {
    /// Path to the gateway's TOML configuration file.
    #[arg(long, env = "GATEWAY_CONFIG", default_value = "gateway.toml")]
    pub config: PathBuf,

    /// Address the gateway listens on for client requests.
    #[arg(long, env = "GATEWAY_LISTEN_ADDRESS", default_value = "127.0.0.1:8089")]
    pub listen_address: SocketAddr,

    /// Base URL of the upstream LLM provider requests are forwarded to.
    #[arg(long, env = "GATEWAY_UPSTREAM", default_value = "https://api.anthropic.com")]
    pub upstream: String,

    /// Log filter string, e.g. "info" or "gateway=debug,compactor=debug".
    #[arg(long, env = "GATEWAY_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}
