//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!     → logging.rs (stderr, text or JSON)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the extension HTTP stack
//! - Configuration shared by every extension via STEADYBIT_LOG_*

pub mod logging;

pub use logging::{init, LoggingError};

#[cfg(test)]
pub(crate) mod testing;
