//! Configuration loading from the environment.

use envconfig::Envconfig;
use thiserror::Error;

use crate::config::schema::{HealthSpecification, ListenSpecification, LogSpecification};
use crate::config::validation::{validate_listen_specification, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration from environment: {0}")]
    Env(#[from] envconfig::Error),
    #[error("invalid listen specification: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<Vec<ValidationError>> for ConfigError {
    fn from(errors: Vec<ValidationError>) -> Self {
        ConfigError::Validation(errors)
    }
}

impl ListenSpecification {
    /// Read `STEADYBIT_EXTENSION_*` from the environment.
    ///
    /// Only parses; validation happens when the server starts listening.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::init_from_env()?.normalized())
    }

    /// Check TLS consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_listen_specification(self).map_err(ConfigError::from)
    }
}

impl HealthSpecification {
    /// Read `STEADYBIT_EXTENSION_HEALTH_PORT` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::init_from_env()?)
    }
}

impl LogSpecification {
    /// Read `STEADYBIT_LOG_*` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::init_from_env()?)
    }
}
