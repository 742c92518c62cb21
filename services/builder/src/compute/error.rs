//! Errors returned by the compute service.

use serde::Deserialize;
use smith_reconcile::ServiceStatus;
use thiserror::Error;

/// A failed compute service call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The service answered with a non-success status.
    #[error("service error {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
        opc_request_id: Option<String>,
    },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not what the operation returns.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The client could not be built from its settings.
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl ApiError {
    /// Build a service error from response details.
    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            code: code.into(),
            message: message.into(),
            opc_request_id: None,
        }
    }

    /// The HTTP status, for service errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Request id the service assigned, when it sent one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Service { opc_request_id, .. } => opc_request_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl ServiceStatus for ApiError {
    fn http_status(&self) -> Option<u16> {
        self.status()
    }
}

/// Error body the service sends with non-success statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
