//! HTTP middleware stack for the request-locals server.
//!
//! Builds the Tower middleware pipeline applied to all HTTP requests.
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use axum::http::header::HeaderName;
use axum::http::{Method, StatusCode};
use reqlocals_core::RequestLocals;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::ServerConfig;
use super::request_locals::{RequestLocalsLayer, StoreIdPolicy};

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            RequestLocalsLayer<StoreIdPolicy>,
            tower::layer::util::Stack<
                CorsLayer,
                tower::layer::util::Stack<
                    TraceLayer<
                        tower_http::classify::SharedClassifier<
                            tower_http::classify::ServerErrorsAsFailures,
                        >,
                    >,
                    tower::layer::util::Stack<
                        SetRequestIdLayer<MakeRequestUuid>,
                        tower::layer::util::Identity,
                    >,
                >,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 request id when the client sent none
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `CORS` -- Cross-Origin Resource Sharing based on configured origins
/// 4. `RequestLocals` -- scopes request locals to the request, then clears them
/// 5. `Timeout` -- enforces a maximum request processing duration
/// 6. `PropagateRequestId` -- copies the request id from the request to the response
///
/// CORS preflights are answered before a store is scoped. The locals layer
/// sits outside the timeout so a timed-out handler's store is still cleared.
///
/// # Errors
///
/// Returns an error if `config.request_id_header` is not a valid header name.
pub fn build_http_layers(
    config: &ServerConfig,
    locals: RequestLocals,
) -> anyhow::Result<HttpLayers> {
    let request_id_header = HeaderName::try_from(config.request_id_header.as_str())
        .map_err(|e| anyhow::anyhow!("invalid request id header {:?}: {e}", config.request_id_header))?;

    let policy = StoreIdPolicy::from_config(config, request_id_header.clone());
    let cors = build_cors_layer(&config.cors_origins);

    let layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestLocalsLayer::with_extractor(locals, policy))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header))
        .into_inner();

    Ok(layers)
}

/// Builds the CORS layer from the configured origins.
///
/// `"*"` anywhere in the list allows any origin; otherwise only the origins
/// that parse as header values are allowed.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .allow_headers(Any)
}
