//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("ID cannot be empty")]
    Empty,

    /// The ID does not start with the expected version segment.
    #[error("unsupported ID version: expected '{expected}', got '{actual}'")]
    UnsupportedVersion {
        expected: &'static str,
        actual: String,
    },

    /// The ID names a different resource type.
    #[error("invalid resource type: expected '{expected}', got '{actual}'")]
    InvalidResourceType {
        expected: &'static str,
        actual: String,
    },

    /// The ULID portion of a retry token is invalid.
    #[error("invalid ULID: {0}")]
    InvalidUlid(String),

    /// The ID format is invalid.
    #[error("invalid ID format: {message}")]
    InvalidFormat { message: String },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty)
    }

    /// Returns true if the id was well formed but for another resource type.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, IdError::InvalidResourceType { .. })
    }
}
