//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. The request-locals facade exists from `new()` on, so the
//! rest of the application can share it before the server starts.

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use reqlocals_core::RequestLocals;
use tokio::net::TcpListener;
use tracing::info;

use super::config::ServerConfig;
use super::handlers::{health_handler, liveness_handler, visits_handler, AppState};
use super::middleware::build_http_layers;

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates shared state (the request-locals registry)
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled, then
///    discards every request store
pub struct NetworkModule {
    config: ServerConfig,
    listener: Option<TcpListener>,
    locals: RequestLocals,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self::with_locals(config, RequestLocals::new())
    }

    /// Creates a network module around an existing request-locals facade.
    #[must_use]
    pub fn with_locals(config: ServerConfig, locals: RequestLocals) -> Self {
        Self {
            config,
            listener: None,
            locals,
        }
    }

    /// Returns a handle to the request-locals facade used by the middleware.
    #[must_use]
    pub fn locals(&self) -> RequestLocals {
        self.locals.clone()
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- health JSON including live store count
    /// - `GET /health/live` -- liveness probe
    /// - `GET /visits` -- demo handler using request locals
    ///
    /// # Errors
    ///
    /// Returns an error if the middleware stack cannot be built from the
    /// configuration.
    pub fn build_router(&self) -> anyhow::Result<Router> {
        build_router(&self.config, self.locals.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves.
    ///
    /// After the server has drained, every request store is discarded
    /// (the application reset hook).
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, if the router
    /// cannot be built, or if the server hits a fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router()?;
        let listener = self
            .listener
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;

        info!("Serving HTTP connections");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!(
            remaining = self.locals.registry().len(),
            "server stopped, resetting request locals"
        );
        self.locals.on_application_reset();
        Ok(())
    }
}

/// Builds the router over the given configuration and request-locals facade.
///
/// # Errors
///
/// Returns an error if the middleware stack cannot be built.
pub fn build_router(config: &ServerConfig, locals: RequestLocals) -> anyhow::Result<Router> {
    let layers = build_http_layers(config, locals.clone())?;
    let state = AppState::new(locals, Arc::new(config.clone()));

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/visits", get(visits_handler))
        .layer(layers)
        .with_state(state))
}

#[cfg(test)]
mod tests {
    use reqlocals_core::StoreId;

    use super::*;

    #[test]
    fn new_creates_module_without_binding() {
        let module = NetworkModule::new(ServerConfig::default());
        assert!(module.listener.is_none());
    }

    #[test]
    fn locals_share_one_registry() {
        let module = NetworkModule::new(ServerConfig::default());
        let l1 = module.locals();
        let l2 = module.locals();
        assert!(Arc::ptr_eq(l1.registry(), l2.registry()));
    }

    #[test]
    fn build_router_creates_router() {
        let module = NetworkModule::new(ServerConfig::default());
        assert!(module.build_router().is_ok());
    }

    #[tokio::test]
    async fn start_binds_to_os_assigned_port() {
        let mut module = NetworkModule::new(ServerConfig::default());
        let port = module.start().await.expect("start should succeed");
        assert!(port > 0, "OS-assigned port should be > 0");
        assert!(module.listener.is_some());
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let module = NetworkModule::new(ServerConfig::default());
        let result = module.serve(std::future::pending::<()>()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn serve_resets_locals_after_shutdown() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            ..ServerConfig::default()
        };
        let mut module = NetworkModule::new(config);
        module.start().await.unwrap();

        let locals = module.locals();
        locals.registry().store_for(&StoreId::new("leaked")).set("foo", 1_u8);

        module.serve(async {}).await.unwrap();

        assert!(locals.registry().is_empty());
    }
}
