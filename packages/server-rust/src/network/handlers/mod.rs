//! HTTP handler definitions for the request-locals server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod visits;

pub use health::{health_handler, liveness_handler};
pub use visits::{visits_handler, ApiError};

use std::sync::Arc;
use std::time::Instant;

use reqlocals_core::RequestLocals;

use super::ServerConfig;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Cloning is cheap: every field is reference-counted or `Copy`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Request-locals facade shared with the middleware stack.
    pub locals: RequestLocals,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(locals: RequestLocals, config: Arc<ServerConfig>) -> Self {
        Self {
            locals,
            config,
            start_time: Instant::now(),
        }
    }
}
