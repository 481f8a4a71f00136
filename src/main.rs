//! Reference extension.
//!
//! Wires the kit together the way every extension binary does.
//!
//! # Architecture Overview
//!
//! ```text
//!     Orchestrator                 ┌──────────────────────────────────────────────┐
//!     ─────────────────────────────┼─▶ net::listener ──▶ http::layered ──▶ routes │
//!                                  │                                              │
//!     Probes                       │                                              │
//!     ─────────────────────────────┼─▶ health::probes ◀── health::state           │
//!                                  │                          ▲                   │
//!     SIGINT / SIGTERM / SIGUSR1   │                          │ 0 readiness false │
//!     ─────────────────────────────┼─▶ lifecycle::signals ──▶ shutdown registry   │
//!                                  │                          │ 80 probes server  │
//!                                  │                          │ 90 extension http │
//!                                  │                          ▼ 100 exit          │
//!                                  └──────────────────────────────────────────────┘
//! ```

use std::process::ExitCode;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use extension_kit::config::{HealthSpecification, ListenSpecification, LogSpecification};
use extension_kit::health::{self, HealthState};
use extension_kit::http::IfNoneMatchLayer;
use extension_kit::lifecycle::{ShutdownRegistry, SignalListener};
use extension_kit::net::{ExtensionServer, ListenOptions};
use extension_kit::{observability, ExtensionError};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HEALTH_PORT: u16 = 8081;

async fn index() -> Json<serde_json::Value> {
    Json(json!({ "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }))
}

fn index_etag() -> String {
    format!("\"{}\"", env!("CARGO_PKG_VERSION"))
}

async fn fail() -> Result<Json<serde_json::Value>, ExtensionError> {
    Err(ExtensionError::new("Not implemented").with_detail("this endpoint always fails"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let log_spec = match LogSpecification::from_env() {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("invalid logging configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = observability::init(&log_spec) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "extension-kit starting");

    match run().await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Extension failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let listen_spec = ListenSpecification::from_env()?;
    let health_spec = HealthSpecification::from_env()?;
    listen_spec.validate()?;

    let registry = ShutdownRegistry::new();
    let health = HealthState::new();
    health.register_shutdown(&registry);

    let signals = SignalListener::activate(&registry)?;

    let server = ExtensionServer::new(&registry);
    let probes = health::start_probes(
        health.clone(),
        &registry,
        DEFAULT_HEALTH_PORT,
        &listen_spec,
        &health_spec,
    )
    .await?;

    let mut router = Router::new()
        .route("/", get(index).layer(IfNoneMatchLayer::new(index_etag)))
        .route("/fail", get(fail));
    if probes.is_none() {
        router = router.merge(health::probe_router(health.clone()));
    }

    let served = server
        .listen_with(router, ListenOptions::new(DEFAULT_PORT), listen_spec)
        .await;

    // A terminating signal stops the server from inside its dispatch; wait
    // for that dispatch so the process exits with the signal's code.
    signals.deactivate().await;
    served?;
    Ok(())
}
