//! Health probe subsystem.
//!
//! # Data Flow
//! ```text
//! Extension code / shutdown handler
//!     → state.rs (ready, alive flags)
//!
//! Orchestrator
//!     → GET /health/liveness | /health/readiness
//!     → probes.rs (200 or 503 from the flags)
//! ```
//!
//! # Design Decisions
//! - Probes get their own port so they keep answering while the extension
//!   server drains
//! - In unix socket mode the probes share the extension's socket

pub mod probes;
pub mod state;

pub use probes::{probe_router, start_probes, ProbeServer, LIVENESS_PATH, READINESS_PATH};
pub use state::HealthState;
