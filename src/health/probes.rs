//! Liveness and readiness probes over HTTP.
//!
//! # Responsibilities
//! - `GET /health/liveness` and `GET /health/readiness`
//! - Dedicated probe server, unless the extension listens on a unix socket
//! - Stop the probe server during shutdown, after the extension has been
//!   marked not ready

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_server::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::{HealthSpecification, ListenSpecification};
use crate::health::state::HealthState;
use crate::lifecycle::shutdown::{ShutdownHandler, ShutdownRegistry, ORDER_STOP_PROBES_HTTP};
use crate::net::listener::{ListenError, GRACEFUL_SHUTDOWN_TIMEOUT};

/// Name of the handler registered by [`ProbeServer::start`].
pub const PROBES_HTTP_HANDLER: &str = "ProbesHttp";

pub const LIVENESS_PATH: &str = "/health/liveness";
pub const READINESS_PATH: &str = "/health/readiness";

/// Routes answering the probes from `health`.
pub fn probe_router(health: HealthState) -> Router {
    Router::new()
        .route(LIVENESS_PATH, get(liveness))
        .route(READINESS_PATH, get(readiness))
        .with_state(health)
}

async fn liveness(State(health): State<HealthState>) -> Response {
    probe_response(health.is_alive())
}

async fn readiness(State(health): State<HealthState>) -> Response {
    probe_response(health.is_ready())
}

fn probe_response(healthy: bool) -> Response {
    if healthy {
        StatusCode::OK.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

/// HTTP server that only answers the probes.
#[derive(Debug)]
pub struct ProbeServer {
    address: SocketAddr,
    handle: Handle,
    finished: CancellationToken,
}

impl ProbeServer {
    /// Bind `port` on all interfaces and serve the probes in the background.
    ///
    /// Registers a shutdown handler that drains the server.
    pub async fn start(
        health: HealthState,
        registry: &ShutdownRegistry,
        port: u16,
    ) -> Result<Self, ListenError> {
        let requested = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let bind_error = |source| ListenError::Bind {
            address: requested.to_string(),
            source,
        };
        let listener = std::net::TcpListener::bind(requested).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let address = listener.local_addr().map_err(bind_error)?;

        tracing::info!(address = %address, ready = health.is_ready(), "Starting probes server");

        let handle = Handle::new();
        let finished = CancellationToken::new();
        let app = probe_router(health);
        tokio::spawn({
            let handle = handle.clone();
            let finished = finished.clone();
            async move {
                let _finished = finished.drop_guard();
                if let Err(e) = axum_server::from_tcp(listener)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                {
                    tracing::error!(error = %e, "Probes server failed");
                }
            }
        });

        registry.add(ShutdownHandler::new(PROBES_HTTP_HANDLER, ORDER_STOP_PROBES_HTTP, {
            let handle = handle.clone();
            let finished = finished.clone();
            move |_signal| {
                let handle = handle.clone();
                let finished = finished.clone();
                async move {
                    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
                    finished.cancelled().await;
                    tracing::info!("Probes server stopped");
                }
            }
        }));

        Ok(Self {
            address,
            handle,
            finished,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Close the server immediately and wait until the socket is released.
    pub async fn stop(&self) {
        self.handle.shutdown();
        self.finished.cancelled().await;
    }
}

/// Start the probe server unless the extension listens on a unix socket.
///
/// Returns `None` in unix socket mode. The caller then serves
/// [`probe_router`] alongside its own routes.
pub async fn start_probes(
    health: HealthState,
    registry: &ShutdownRegistry,
    default_port: u16,
    listen: &ListenSpecification,
    spec: &HealthSpecification,
) -> Result<Option<ProbeServer>, ListenError> {
    if listen.is_unix_socket_enabled() {
        tracing::debug!("Unix socket mode, probes are served by the extension server");
        return Ok(None);
    }
    let port = spec.effective_port(default_port);
    ProbeServer::start(health, registry, port).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_probe(health: &HealthState, path: &str) -> (StatusCode, String) {
        let response = probe_router(health.clone())
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn probes_follow_the_flags() {
        let health = HealthState::new();

        assert_eq!(get_probe(&health, LIVENESS_PATH).await, (StatusCode::OK, String::new()));
        assert_eq!(get_probe(&health, READINESS_PATH).await, (StatusCode::OK, String::new()));

        health.set_ready(false);
        assert_eq!(
            get_probe(&health, READINESS_PATH).await,
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable".to_string())
        );
        assert_eq!(get_probe(&health, LIVENESS_PATH).await.0, StatusCode::OK);

        health.set_alive(false);
        assert_eq!(get_probe(&health, LIVENESS_PATH).await.0, StatusCode::SERVICE_UNAVAILABLE);

        health.set_ready(true);
        health.set_alive(true);
        assert_eq!(get_probe(&health, READINESS_PATH).await.0, StatusCode::OK);
        assert_eq!(get_probe(&health, LIVENESS_PATH).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let health = HealthState::new();
        assert_eq!(get_probe(&health, "/health").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn no_probe_server_in_unix_socket_mode() {
        let registry = ShutdownRegistry::new();
        let listen = ListenSpecification {
            unix_socket: Some("/tmp/extension.sock".into()),
            ..Default::default()
        };

        let server = start_probes(
            HealthState::new(),
            &registry,
            8081,
            &listen,
            &HealthSpecification::default(),
        )
        .await
        .unwrap();

        assert!(server.is_none());
        assert!(!registry.contains(PROBES_HTTP_HANDLER));
    }

    #[tokio::test]
    async fn probe_server_registers_shutdown_handler() {
        let registry = ShutdownRegistry::new();
        let server = ProbeServer::start(HealthState::new(), &registry, 0).await.unwrap();

        let handler = registry
            .snapshot()
            .into_iter()
            .find(|h| h.name() == PROBES_HTTP_HANDLER)
            .unwrap();
        assert_eq!(handler.order(), ORDER_STOP_PROBES_HTTP);
        assert_ne!(server.local_addr().port(), 0);

        server.stop().await;
    }
}
