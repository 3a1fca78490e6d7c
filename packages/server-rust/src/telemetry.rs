//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::network::ServerConfig;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `config.log_level` is used as the
/// filter. With `config.json_logs` each event is written as one JSON line.
///
/// # Errors
///
/// Returns an error if the filter does not parse or a global subscriber is
/// already installed.
pub fn init_tracing(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
