//! Error responses.
//!
//! # Responsibilities
//! - JSON error envelope shared by all extension kits
//! - Turn panics in request handlers into 500 responses
//!
//! # Design Decisions
//! - Every error response is logged at error level with its detail
//! - The envelope is structurally identical to the problem details used by
//!   the orchestrator, so it can be returned from any endpoint

use std::any::Any;
use std::error::Error;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::lifecycle::shutdown::panic_message;

/// Error body returned to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionError {
    /// A human-readable explanation specific to this occurrence of the problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// A URI reference that identifies the specific occurrence of the problem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// A short, human-readable summary of the problem type.
    pub title: String,

    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ExtensionError {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Build an envelope whose detail is the error's message.
    pub fn from_error(title: impl Into<String>, error: &dyn Error) -> Self {
        Self::new(title).with_detail(error.to_string())
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl std::fmt::Display for ExtensionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.title, detail),
            None => f.write_str(&self.title),
        }
    }
}

impl Error for ExtensionError {}

impl IntoResponse for ExtensionError {
    fn into_response(self) -> Response {
        match &self.detail {
            Some(detail) => tracing::error!(details = %detail, "{}", self.title),
            None => tracing::error!("{}", self.title),
        }
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// Response for a panic caught in a request handler.
pub fn recover_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic_message(panic.as_ref());
    tracing::error!(panic = %message, "Request handler panicked");
    ExtensionError::new("Internal Server Error")
        .with_detail(format!("Panic: {message}"))
        .into_response()
}
