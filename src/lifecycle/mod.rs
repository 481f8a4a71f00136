//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (shutdown.rs):
//!     Any component → ShutdownRegistry::add(name, order, action)
//!
//! Signals (signals.rs, platform.rs):
//!     SIGINT/SIGTERM/SIGUSR1 (or console events on Windows)
//!     → snapshot registry → sort by order → run handlers one by one
//!
//! Reserved orders:
//!     0 readiness false → 10 stop actions → 20 custom
//!     → 80 stop probes server → 90 stop extension server → 100 exit
//! ```
//!
//! # Design Decisions
//! - The registry is an explicit value shared by clone, not a global
//! - The fallback handler guarantees process exit on interrupt/terminate
//! - The test signal runs the same dispatch without exiting

pub mod platform;
pub mod shutdown;
pub mod signals;

pub use platform::SignalPlatform;
pub use shutdown::{
    ShutdownHandler, ShutdownRegistry, ORDER_READINESS_FALSE, ORDER_STOP_ACTIONS,
    ORDER_STOP_CUSTOM, ORDER_STOP_EXTENSION_HTTP, ORDER_STOP_PROBES_HTTP, ORDER_TERMINATION,
};
pub use signals::{Signal, SignalListener, TERMINATION_HANDLER};
