//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (envconfig handles parsing)
//! - TLS material must be complete once TLS is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ListenSpecification → Result<(), Vec<ValidationError>>
//! - Runs before any socket is opened

use thiserror::Error;

use crate::config::schema::ListenSpecification;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("TLS server certificate must be provided when TLS is enabled")]
    MissingServerCertificate,
    #[error("TLS server key must be provided when TLS is enabled")]
    MissingServerKey,
}

/// Check that the listen specification is internally consistent.
pub fn validate_listen_specification(
    spec: &ListenSpecification,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if spec.is_tls_enabled() {
        if spec.tls_server_cert.is_none() {
            errors.push(ValidationError::MissingServerCertificate);
        }
        if spec.tls_server_key.is_none() {
            errors.push(ValidationError::MissingServerKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
