//! Demo endpoint counting visits in a request-local counter.
//!
//! Every request starts from an empty store, so the count only reflects work
//! done on behalf of the current request: one for the handler itself plus one
//! per spawned task that was handed the request's store id.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqlocals_core::{LocalsError, StoreIdExt};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use super::AppState;

const VISITS_KEY: &str = "visits";

/// Query parameters accepted by [`visits_handler`].
#[derive(Debug, Default, Deserialize)]
pub struct VisitsQuery {
    /// Number of spawned tasks that also bump the counter, at most
    /// [`ServerConfig::max_fanout`](crate::ServerConfig::max_fanout).
    #[serde(default)]
    pub fanout: u32,
    /// Fail after counting, to exercise cleanup on the error path.
    #[serde(default)]
    pub fail: bool,
}

/// Errors returned by the demo handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Locals(#[from] LocalsError),
    #[error("spawned task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("request failed on purpose")]
    Requested,
    #[error("fanout {requested} exceeds the limit of {max}")]
    FanoutTooLarge { requested: u32, max: u32 },
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::FanoutTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::Locals(_) | Self::Task(_) | Self::Requested => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "request failed");
        let body = Json(json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

/// Counts this request's visits, optionally fanning out to spawned tasks.
///
/// # Errors
///
/// Returns [`ApiError::FanoutTooLarge`] if `fanout` exceeds the configured
/// limit, otherwise [`ApiError`] if a spawned task panics, if the counter key
/// holds an unexpected type, or when `fail=true` is requested.
pub async fn visits_handler(
    State(state): State<AppState>,
    Query(query): Query<VisitsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let max = state.config.max_fanout;
    if query.fanout > max {
        return Err(ApiError::FanoutTooLarge {
            requested: query.fanout,
            max,
        });
    }

    let locals = state.locals;
    let seen_before = locals.exists(VISITS_KEY);

    let counter = locals.fetch(VISITS_KEY, || AtomicU64::new(0))?;
    counter.fetch_add(1, Ordering::SeqCst);

    let tasks: Vec<_> = (0..query.fanout)
        .map(|_| {
            let locals = locals.clone();
            tokio::spawn(
                async move {
                    let counter = locals.fetch(VISITS_KEY, || AtomicU64::new(0))?;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, LocalsError>(())
                }
                .with_current_store_id(),
            )
        })
        .collect();

    for task in tasks {
        task.await??;
    }

    if query.fail {
        return Err(ApiError::Requested);
    }

    Ok(Json(json!({
        "store_id": locals.current_store_id().to_string(),
        "visits": counter.load(Ordering::SeqCst),
        "seen_before": seen_before,
    })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqlocals_core::RequestLocals;

    use super::*;
    use crate::network::ServerConfig;

    fn test_state() -> AppState {
        AppState::new(RequestLocals::new(), Arc::new(ServerConfig::default()))
    }

    #[tokio::test]
    async fn counts_handler_and_spawned_tasks() {
        let state = test_state();
        let locals = state.locals.clone();

        let query = VisitsQuery {
            fanout: 3,
            fail: false,
        };
        let Json(body) = visits_handler(State(state), Query(query))
            .with_store_id("r1")
            .await
            .unwrap();

        assert_eq!(body["visits"], 4);
        assert_eq!(body["store_id"], "r1");
        assert_eq!(body["seen_before"], false);
        // The handler alone does not clear; that is the middleware's job.
        assert!(locals.registry().peek(&"r1".into()).is_some());
    }

    #[tokio::test]
    async fn requested_failure_maps_to_500() {
        let state = test_state();

        let query = VisitsQuery {
            fanout: 0,
            fail: true,
        };
        let err = visits_handler(State(state), Query(query))
            .with_store_id("r1")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Requested));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn fanout_above_limit_is_rejected_before_counting() {
        let config = ServerConfig {
            max_fanout: 2,
            ..ServerConfig::default()
        };
        let state = AppState::new(RequestLocals::new(), Arc::new(config));
        let locals = state.locals.clone();

        let query = VisitsQuery {
            fanout: 3,
            fail: false,
        };
        let err = visits_handler(State(state), Query(query))
            .with_store_id("r1")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::FanoutTooLarge {
                requested: 3,
                max: 2
            }
        ));
        assert!(locals.registry().is_empty());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let state = test_state();
        let locals = state.locals.clone();

        let err = async move {
            locals.set(VISITS_KEY, "not a counter");
            visits_handler(State(state), Query(VisitsQuery::default())).await
        }
        .with_store_id("r1")
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::Locals(LocalsError::TypeMismatch { .. })));
    }
}
