//! Tower middleware that scopes request locals to each HTTP request.
//!
//! For every request the service picks a [`StoreId`], makes it current while
//! the inner service is called and while its response future is polled, and
//! clears that id's store once the response future completes, fails, panics,
//! or is dropped. Worker threads are left with whatever id they had before.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::header::HeaderName;
use http::Request;
use reqlocals_core::{RequestLocals, StoreId, StoreIdExt, StoreScope};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::config::{RequestIdSource, ServerConfig};

// ---------------------------------------------------------------------------
// Store id extraction
// ---------------------------------------------------------------------------

/// Chooses the store id for an incoming request.
///
/// Whatever is returned must stay stable for the whole request.
pub trait ExtractStoreId: Clone + Send + Sync + 'static {
    fn extract<B>(&self, req: &Request<B>) -> StoreId;
}

/// Mints a random UUID v4 per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateStoreId;

impl ExtractStoreId for GenerateStoreId {
    fn extract<B>(&self, _req: &Request<B>) -> StoreId {
        StoreId::new(Uuid::new_v4().to_string())
    }
}

/// Reads the id from a request header, falling back to [`GenerateStoreId`].
#[derive(Debug, Clone)]
pub struct HeaderStoreId {
    header: HeaderName,
}

impl HeaderStoreId {
    #[must_use]
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl ExtractStoreId for HeaderStoreId {
    fn extract<B>(&self, req: &Request<B>) -> StoreId {
        req.headers()
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map_or_else(|| GenerateStoreId.extract(req), StoreId::new)
    }
}

/// The extraction policy selected by [`ServerConfig::request_id_source`].
#[derive(Debug, Clone)]
pub enum StoreIdPolicy {
    Generate(GenerateStoreId),
    Header(HeaderStoreId),
}

impl StoreIdPolicy {
    #[must_use]
    pub fn from_config(config: &ServerConfig, header: HeaderName) -> Self {
        match config.request_id_source {
            RequestIdSource::Generate => Self::Generate(GenerateStoreId),
            RequestIdSource::Header => Self::Header(HeaderStoreId::new(header)),
        }
    }
}

impl ExtractStoreId for StoreIdPolicy {
    fn extract<B>(&self, req: &Request<B>) -> StoreId {
        match self {
            Self::Generate(policy) => policy.extract(req),
            Self::Header(policy) => policy.extract(req),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestLocalsLayer
// ---------------------------------------------------------------------------

/// Tower layer that establishes and tears down a request-locals scope.
#[derive(Debug, Clone)]
pub struct RequestLocalsLayer<E = GenerateStoreId> {
    locals: RequestLocals,
    extractor: E,
}

impl RequestLocalsLayer {
    /// Scopes requests under freshly generated ids.
    #[must_use]
    pub fn new(locals: RequestLocals) -> Self {
        Self::with_extractor(locals, GenerateStoreId)
    }
}

impl<E: ExtractStoreId> RequestLocalsLayer<E> {
    #[must_use]
    pub fn with_extractor(locals: RequestLocals, extractor: E) -> Self {
        Self { locals, extractor }
    }
}

impl<S, E: Clone> Layer<S> for RequestLocalsLayer<E> {
    type Service = RequestLocalsService<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLocalsService {
            inner,
            locals: self.locals.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestLocalsService
// ---------------------------------------------------------------------------

/// Service wrapper that runs each request under its own store id.
#[derive(Debug, Clone)]
pub struct RequestLocalsService<S, E = GenerateStoreId> {
    inner: S,
    locals: RequestLocals,
    extractor: E,
}

impl<S, E, B> Service<Request<B>> for RequestLocalsService<S, E>
where
    S: Service<Request<B>>,
    S::Response: 'static,
    S::Error: 'static,
    S::Future: Send + 'static,
    E: ExtractStoreId,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let id = self.extractor.extract(&req);
        let span = info_span!("request_locals", store_id = %id);

        // Created before calling the inner service so a panic in `call`
        // still clears whatever it stored.
        let cleanup = self.locals.clear_on_drop(id.clone());

        let fut = {
            let _scope = StoreScope::enter(id.clone());
            self.inner.call(req)
        };

        Box::pin(
            async move {
                let _cleanup = cleanup;
                fut.with_store_id(id).await
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    use http::{HeaderValue, Response};
    use tower::{service_fn, ServiceExt};

    use super::*;

    /// Collects the store ids observed by the inner service.
    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<StoreId>>);

    impl Recorder {
        fn push(&self, id: StoreId) {
            self.0.lock().unwrap().push(id);
        }

        fn ids(&self) -> Vec<StoreId> {
            self.0.lock().unwrap().clone()
        }
    }

    fn request_with_id(id: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        if let Some(id) = id {
            builder = builder.header("x-request-id", id);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn header_policy_uses_header_value() {
        let policy = HeaderStoreId::new(HeaderName::from_static("x-request-id"));
        let id = policy.extract(&request_with_id(Some("abc-123")));
        assert_eq!(id, StoreId::new("abc-123"));
    }

    #[test]
    fn header_policy_generates_when_missing() {
        let policy = HeaderStoreId::new(HeaderName::from_static("x-request-id"));
        let id = policy.extract(&request_with_id(None));
        assert!(!id.is_absent());
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());
    }

    fn assert_generated(id: &StoreId) {
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok(), "{id} is not a UUID");
    }

    #[test]
    fn header_policy_generates_when_not_utf8() {
        let policy = HeaderStoreId::new(HeaderName::from_static("x-request-id"));
        let req = Request::builder()
            .header("x-request-id", HeaderValue::from_bytes(b"\xff").unwrap())
            .body(())
            .unwrap();
        assert_generated(&policy.extract(&req));
    }

    #[test]
    fn header_policy_generates_when_empty() {
        let policy = HeaderStoreId::new(HeaderName::from_static("x-request-id"));
        let req = Request::builder()
            .header("x-request-id", HeaderValue::from_static(""))
            .body(())
            .unwrap();
        assert_generated(&policy.extract(&req));
    }

    #[test]
    fn generate_policy_ignores_header() {
        let id = GenerateStoreId.extract(&request_with_id(Some("abc-123")));
        assert_ne!(id, StoreId::new("abc-123"));
        assert!(Uuid::parse_str(id.as_str().unwrap()).is_ok());
    }

    #[test]
    fn policy_from_config() {
        let header = HeaderName::from_static("x-request-id");
        let config = ServerConfig {
            request_id_source: RequestIdSource::Header,
            ..ServerConfig::default()
        };
        let policy = StoreIdPolicy::from_config(&config, header.clone());
        assert_eq!(
            policy.extract(&request_with_id(Some("r1"))),
            StoreId::new("r1")
        );

        let policy = StoreIdPolicy::from_config(&ServerConfig::default(), header);
        assert!(matches!(policy, StoreIdPolicy::Generate(_)));
    }

    #[tokio::test]
    async fn inner_service_sees_request_store() {
        let locals = RequestLocals::new();
        let recorder = Arc::new(Recorder::default());

        let inner = {
            let locals = locals.clone();
            let recorder = Arc::clone(&recorder);
            service_fn(move |_req: Request<()>| {
                let locals = locals.clone();
                let recorder = Arc::clone(&recorder);
                async move {
                    tokio::task::yield_now().await;
                    recorder.push(locals.current_store_id());
                    locals.set("user", "alice");
                    assert!(locals.exists("user"));
                    Ok::<_, Infallible>(Response::new(()))
                }
            })
        };

        let layer = RequestLocalsLayer::with_extractor(
            locals.clone(),
            HeaderStoreId::new(HeaderName::from_static("x-request-id")),
        );
        let svc = layer.layer(inner);
        svc.oneshot(request_with_id(Some("r1"))).await.unwrap();

        assert_eq!(recorder.ids(), vec![StoreId::new("r1")]);
        assert!(locals.registry().is_empty());
        assert!(locals.current_store_id().is_absent());
    }

    #[tokio::test]
    async fn store_cleared_when_inner_service_fails() {
        let locals = RequestLocals::new();

        let inner = {
            let locals = locals.clone();
            service_fn(move |_req: Request<()>| {
                let locals = locals.clone();
                async move {
                    locals.set("count", 1_u32);
                    Err::<Response<()>, _>("FAIL")
                }
            })
        };

        let svc = RequestLocalsLayer::new(locals.clone()).layer(inner);
        let err = svc.oneshot(request_with_id(None)).await.unwrap_err();

        assert_eq!(err, "FAIL");
        assert!(locals.registry().is_empty());
    }

    #[tokio::test]
    async fn store_cleared_when_future_dropped() {
        let locals = RequestLocals::new();

        let inner = {
            let locals = locals.clone();
            service_fn(move |_req: Request<()>| {
                let locals = locals.clone();
                async move {
                    locals.set("count", 1_u32);
                    std::future::pending::<()>().await;
                    Ok::<_, Infallible>(Response::new(()))
                }
            })
        };

        let svc = RequestLocalsLayer::new(locals.clone()).layer(inner);
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            svc.oneshot(request_with_id(None)),
        )
        .await;

        assert!(result.is_err());
        assert!(locals.registry().is_empty());
    }

    #[tokio::test]
    async fn sequential_requests_do_not_share_state() {
        let locals = RequestLocals::new();

        let inner = {
            let locals = locals.clone();
            service_fn(move |_req: Request<()>| {
                let locals = locals.clone();
                async move {
                    let seen_before = locals.exists("count");
                    locals.set("count", 1_u32);
                    Ok::<_, Infallible>(seen_before)
                }
            })
        };

        let mut svc = RequestLocalsLayer::with_extractor(
            locals.clone(),
            HeaderStoreId::new(HeaderName::from_static("x-request-id")),
        )
        .layer(inner);

        for id in ["r1", "r2", "r1"] {
            let seen = ServiceExt::ready(&mut svc)
                .await
                .unwrap()
                .call(request_with_id(Some(id)))
                .await
                .unwrap();
            assert!(!seen, "store for {id} leaked across requests");
        }
        assert!(locals.registry().is_empty());
    }
}
