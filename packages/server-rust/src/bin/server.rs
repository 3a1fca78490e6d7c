//! Demo HTTP server with request-scoped locals.
//!
//! Usage:
//!   reqlocals-server                               # Port 8080, generated ids
//!   reqlocals-server --port 3000                   # Custom port
//!   reqlocals-server --request-id-source header    # Trust x-request-id
//!   reqlocals-server --json-logs                   # JSON log lines

use std::future::Future;
use std::io;
use std::time::Duration;

use clap::Parser;
use reqlocals_server::{init_tracing, NetworkModule, RequestIdSource, ServerConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "reqlocals-server", about = "HTTP server with request-scoped locals")]
struct Cli {
    /// Hostname to bind to
    #[arg(long, env = "REQLOCALS_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "REQLOCALS_PORT", default_value = "8080")]
    port: u16,

    /// Allowed CORS origins, comma separated ("*" for any)
    #[arg(long, env = "REQLOCALS_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// Request timeout in seconds
    #[arg(long, env = "REQLOCALS_REQUEST_TIMEOUT", default_value = "30")]
    request_timeout_secs: u64,

    /// Largest fanout accepted by /visits
    #[arg(long, env = "REQLOCALS_MAX_FANOUT", default_value = "64")]
    max_fanout: u32,

    /// Where each request's store id comes from
    #[arg(long, env = "REQLOCALS_REQUEST_ID_SOURCE", value_enum, default_value = "generate")]
    request_id_source: RequestIdSource,

    /// Header carrying the request id
    #[arg(long, env = "REQLOCALS_REQUEST_ID_HEADER", default_value = "x-request-id")]
    request_id_header: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "REQLOCALS_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            cors_origins: cli.cors_origins,
            request_timeout: Duration::from_secs(cli.request_timeout_secs),
            max_fanout: cli.max_fanout,
            request_id_source: cli.request_id_source,
            request_id_header: cli.request_id_header,
            log_level: cli.log_level,
            json_logs: cli.json_logs,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from(Cli::parse());
    init_tracing(&config)?;

    let mut module = NetworkModule::new(config);
    let port = module.start().await?;
    info!(port, "reqlocals server listening");

    module
        .serve(wait_for_shutdown(tokio::signal::ctrl_c()))
        .await
}

/// Resolves once `signal` fires. If the signal handler cannot be installed
/// the error is logged and this never resolves.
async fn wait_for_shutdown(signal: impl Future<Output = io::Result<()>>) {
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "failed to listen for shutdown signal, serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
