//! Client supplied request deadlines.
//!
//! Callers may bound a request with `Request-Timeout` (or the older
//! `X-Request-Timeout`) given in seconds, fractions allowed. A request that
//! outlives its deadline is answered with 503 and the handler is dropped.
//! Values that do not parse as a positive number are ignored.

use std::time::Duration;

use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub const REQUEST_TIMEOUT_HEADER: &str = "request-timeout";
pub const LEGACY_REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Body sent when the deadline passes.
pub const TIMED_OUT_MESSAGE: &str = "Request timed out.";

/// Deadline requested by the caller, if any.
pub fn requested_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers
        .get(REQUEST_TIMEOUT_HEADER)
        .filter(|v| !v.is_empty())
        .or_else(|| headers.get(LEGACY_REQUEST_TIMEOUT_HEADER))?;
    let seconds: f64 = value.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok().filter(|d| !d.is_zero())
}

/// Middleware enforcing [`requested_timeout`].
pub async fn request_timeout(request: Request, next: Next) -> Response {
    let Some(timeout) = requested_timeout(request.headers()) else {
        return next.run(request).await;
    };
    tracing::trace!(timeout_secs = timeout.as_secs_f64(), "Using handler timeout");

    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_secs = timeout.as_secs_f64(), "Request timed out");
            (StatusCode::SERVICE_UNAVAILABLE, TIMED_OUT_MESSAGE).into_response()
        }
    }
}
