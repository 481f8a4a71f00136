//! Conditional GET support.
//!
//! [`IfNoneMatchLayer`] wraps a route whose representation is identified by
//! an entity tag. When the caller already holds the current tag the route is
//! skipped and 304 is returned; otherwise the tag is set on the response.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::header::{ETAG, IF_NONE_MATCH};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

type EtagFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Layer answering `If-None-Match` for the wrapped service.
///
/// `etag` is evaluated per request. An empty tag disables the check.
#[derive(Clone)]
pub struct IfNoneMatchLayer {
    etag: EtagFn,
}

impl IfNoneMatchLayer {
    pub fn new<F>(etag: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self { etag: Arc::new(etag) }
    }
}

impl fmt::Debug for IfNoneMatchLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IfNoneMatchLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for IfNoneMatchLayer {
    type Service = IfNoneMatch<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IfNoneMatch {
            inner,
            etag: Arc::clone(&self.etag),
        }
    }
}

#[derive(Clone)]
pub struct IfNoneMatch<S> {
    inner: S,
    etag: EtagFn,
}

impl<S, B> Service<Request<B>> for IfNoneMatch<S>
where
    S: Service<Request<B>, Response = Response>,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let etag = (self.etag)();
        if etag.is_empty() {
            return Box::pin(self.inner.call(request));
        }

        let matches = request
            .headers()
            .get(IF_NONE_MATCH)
            .is_some_and(|held| held.as_bytes() == etag.as_bytes());
        if matches {
            return Box::pin(async { Ok(StatusCode::NOT_MODIFIED.into_response()) });
        }

        let response = self.inner.call(request);
        Box::pin(async move {
            let mut response = response.await?;
            match HeaderValue::from_str(&etag) {
                Ok(value) => {
                    response.headers_mut().insert(ETAG, value);
                }
                Err(e) => tracing::warn!(etag = %etag, error = %e, "Entity tag is not a valid header value"),
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(etag: &'static str, calls: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/describe",
            get(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { "description" }
            })
            .layer(IfNoneMatchLayer::new(move || etag.to_string())),
        )
    }

    async fn get_with(app: Router, if_none_match: Option<&str>) -> Response {
        let mut request = Request::get("/describe");
        if let Some(tag) = if_none_match {
            request = request.header(IF_NONE_MATCH, tag);
        }
        app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn sets_etag_on_fresh_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = get_with(app("\"v1\"", calls.clone()), None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ETAG], "\"v1\"");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn matching_tag_skips_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = get_with(app("\"v1\"", calls.clone()), Some("\"v1\"")).await;

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_tag_gets_the_full_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = get_with(app("\"v2\"", calls.clone()), Some("\"v1\"")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ETAG], "\"v2\"");
    }

    #[tokio::test]
    async fn empty_tag_disables_the_check() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = get_with(app("", calls.clone()), Some("")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(ETAG));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
