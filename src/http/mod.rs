//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS/unix connection
//!     → request.rs (set Request-Id, span, access log)
//!     → timeout.rs (caller supplied deadline)
//!     → extension routes (supplied by the extension, optionally etag.rs)
//!     → response.rs (panics and errors as JSON envelopes)
//!     → Send to client
//! ```

pub mod etag;
pub mod request;
pub mod response;
pub mod timeout;

use axum::middleware;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub use etag::IfNoneMatchLayer;
pub use request::REQUEST_ID_HEADER;
pub use response::{recover_panic, ExtensionError};
pub use timeout::{REQUEST_TIMEOUT_HEADER, TIMED_OUT_MESSAGE};

/// Wrap extension routes with the standard middleware.
///
/// Outermost first: request ID, span, access log, request ID echo,
/// request deadline, panic recovery.
pub fn layered(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(request::set_request_id())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(request::request_span)
                    .on_request(())
                    .on_response(()),
            )
            .layer(middleware::from_fn(request::log_request))
            .layer(request::propagate_request_id())
            .layer(middleware::from_fn(timeout::request_timeout))
            .layer(CatchPanicLayer::custom(recover_panic)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use std::time::Duration;
    use tower::ServiceExt;
    use tracing::Level;

    use crate::observability::testing::CapturedLogs;

    fn app() -> Router {
        layered(
            Router::new()
                .route("/ok", get(|| async { "ok" }).post(|| async { "created" }))
                .route("/panic", get(|| async { panic!("handler exploded") as () }))
                .route(
                    "/slow",
                    get(|| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        "late"
                    }),
                ),
        )
    }

    #[tokio::test]
    async fn panicking_handler_returns_error_envelope() {
        let response = app()
            .oneshot(Request::get("/panic").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: ExtensionError = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.detail.as_deref(), Some("Panic: handler exploded"));
    }

    #[tokio::test]
    async fn request_id_is_generated_and_echoed() {
        let response = app()
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn existing_request_id_is_kept() {
        let response = app()
            .oneshot(
                Request::get("/ok")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
    }

    #[tokio::test]
    async fn request_id_uses_the_request_id_header() {
        let response = app()
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.headers().contains_key("request-id"));
        assert!(!response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn request_timeout_header_bounds_the_handler() {
        let response = app()
            .oneshot(
                Request::get("/slow")
                    .header(REQUEST_TIMEOUT_HEADER, "0.05")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], TIMED_OUT_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn fast_handler_beats_the_deadline() {
        let response = app()
            .oneshot(
                Request::get("/ok")
                    .header("x-request-timeout", "5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reads_are_logged_at_debug_and_writes_at_info() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        app()
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(logs.level_of("Request handled"), Some(Level::DEBUG));

        let writes = CapturedLogs::default();
        let _guard = writes.install();
        app()
            .oneshot(Request::post("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(writes.level_of("Request handled"), Some(Level::INFO));
        assert_eq!(writes.count("Request handled"), 1);
    }
}
