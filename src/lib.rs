//! Extension Kit Library
//!
//! Shared runtime for extension binaries: ordered shutdown on signals,
//! the extension HTTP server, health probes, error envelopes and logging.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::{ConfigError, HealthSpecification, ListenSpecification, LogSpecification};
pub use health::{HealthState, ProbeServer};
pub use http::ExtensionError;
pub use lifecycle::{ShutdownHandler, ShutdownRegistry, Signal, SignalListener};
pub use net::{ExtensionServer, ListenError, ListenOptions};
