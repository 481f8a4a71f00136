//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! STEADYBIT_* environment variables
//!     → loader.rs (envconfig parse, empty values dropped)
//!     → validation.rs (semantic checks)
//!     → ListenSpecification / HealthSpecification / LogSpecification
//!     → read once per listen attempt
//! ```
//!
//! # Design Decisions
//! - Environment only; extensions run as containers
//! - All fields optional; caller supplied defaults apply when unset
//! - Validation separates syntactic (envconfig) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{HealthSpecification, ListenSpecification, LogFormat, LogSpecification, PathList};
pub use validation::ValidationError;
