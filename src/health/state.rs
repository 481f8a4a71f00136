//! Process health state.
//!
//! # States
//! - ready: the extension accepts work; readiness probe answers 200
//! - alive: the extension is functional; liveness probe answers 200
//!
//! # State Transitions
//! ```text
//! ready → not ready: set_ready(false), or the "Readiness" shutdown handler
//! alive → dead:      set_alive(false), the orchestrator restarts the container
//! ```
//!
//! # Design Decisions
//! - Both flags start out true
//! - State changes logged for observability, repeated writes are silent

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::lifecycle::shutdown::{ShutdownHandler, ShutdownRegistry, ORDER_READINESS_FALSE};

/// Name of the handler registered by [`HealthState::register_shutdown`].
pub const READINESS_HANDLER: &str = "Readiness";

#[derive(Debug)]
struct Flags {
    ready: AtomicBool,
    alive: AtomicBool,
}

/// Shared readiness and liveness flags.
#[derive(Debug, Clone)]
pub struct HealthState {
    flags: Arc<Flags>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            flags: Arc::new(Flags {
                ready: AtomicBool::new(true),
                alive: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.flags.ready.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.flags.alive.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        if self.flags.ready.swap(ready, Ordering::SeqCst) != ready {
            tracing::info!(ready, "Update readiness probe");
        }
    }

    /// A dead extension gets restarted by its orchestrator.
    pub fn set_alive(&self, alive: bool) {
        if self.flags.alive.swap(alive, Ordering::SeqCst) != alive {
            tracing::info!(alive, "Update liveness probe");
        }
    }

    /// Report not-ready as the first step of shutting down.
    pub fn register_shutdown(&self, registry: &ShutdownRegistry) {
        let health = self.clone();
        registry.add(ShutdownHandler::blocking(
            READINESS_HANDLER,
            ORDER_READINESS_FALSE,
            move |_signal| health.set_ready(false),
        ));
    }
}
