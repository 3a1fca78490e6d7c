//! HTTP integration for request-scoped locals: Tower middleware that opens a
//! request-locals scope per request and clears it afterwards, plus a small
//! axum server built on top of it.

pub mod network;
pub mod telemetry;

pub use network::{
    build_http_layers, NetworkModule, RequestIdSource, RequestLocalsLayer, ServerConfig,
};
pub use telemetry::init_tracing;
