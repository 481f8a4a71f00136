//! Request identification and access logging.
//!
//! # Responsibilities
//! - Assign a request ID to every incoming request (UUID v4)
//! - Keep an ID the caller already sent in `Request-Id`
//! - Echo the ID back on the response
//! - Log one access line per request: `GET` at debug, everything else at info
//!
//! # Design Decisions
//! - Request ID added as early as possible so trace spans carry it

use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderName, Method};
use axum::middleware::Next;
use axum::response::Response;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Span;

/// Header carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Sets `Request-Id` on requests that lack one.
pub fn set_request_id() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), MakeRequestUuid)
}

/// Copies `Request-Id` from the request to the response.
pub fn propagate_request_id() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER))
}

/// Span wrapping one request, tagged with its ID.
pub fn request_span(request: &Request) -> Span {
    let req_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::info_span!("request", method = %request.method(), uri = %request.uri(), req_id)
}

/// Access log middleware.
///
/// Reads are frequent and cheap, so `GET` requests are only visible at debug.
pub async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    tracing::debug!(%method, %uri, "Request received");

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = started.elapsed().as_millis() as u64;
    if method == Method::GET {
        tracing::debug!(%method, %uri, status, duration_ms, "Request handled");
    } else {
        tracing::info!(%method, %uri, status, duration_ms, "Request handled");
    }
    response
}
