//! Configuration types for the request-locals server.

use std::time::Duration;

/// Where each request's store id comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RequestIdSource {
    /// Always mint a fresh UUID v4, ignoring any id supplied by the client.
    #[default]
    Generate,
    /// Use the request-id header, generating one when it is missing or not
    /// valid UTF-8.
    Header,
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout: Duration,
    /// Upper bound on `/visits?fanout=N`.
    pub max_fanout: u32,
    /// Policy for choosing each request's store id.
    pub request_id_source: RequestIdSource,
    /// Header carrying the request id, both set and propagated by the HTTP
    /// layers.
    pub request_id_header: String,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_fanout: 64,
            request_id_source: RequestIdSource::Generate,
            request_id_header: "x-request-id".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
