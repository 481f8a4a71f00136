//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenSpecification
//!     → listener.rs (validate, pick transport, bind)
//!         unix socket → socket.rs (prepare path)
//!         HTTPS       → tls.rs (reloading certificate, client CAs)
//!         HTTP
//!     → serve extension router until stopped
//! ```
//!
//! # Design Decisions
//! - Exactly one transport per server, unix socket wins over TLS
//! - TLS certificates are re-read from disk when the key file changes

pub mod listener;
pub mod socket;
pub mod tls;

pub use listener::{
    is_unix_socket_enabled, BoundAddress, ExtensionServer, ListenError, ListenOptions, ServeState,
    GRACEFUL_SHUTDOWN_TIMEOUT,
};
pub use tls::{CertReloader, TlsError};
