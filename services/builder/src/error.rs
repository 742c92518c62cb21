//! Driver error types.

use smith_capability::SchemaError;
use smith_id::{ImageId, InstanceId, VnicId};
use smith_reconcile::{CallError, PollError};
use thiserror::Error;

use crate::compute::ApiError;

/// A compute call after the executor gave up on it.
pub type ApiCallError = CallError<ApiError>;

/// A wait loop whose fetches go through the executor.
pub type WaitError = PollError<ApiCallError>;

/// Nothing suitable to build from or reconcile against.
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("base_image_filter returned no images")]
    NoImages,

    #[error("no image matched display_name_search criteria {pattern:?}")]
    NoMatch { pattern: String },

    #[error("invalid display_name_search pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("neither base_image_ocid nor base_image_filter is configured")]
    NoBaseImage,

    #[error("unable to find any global capability schemas")]
    NoGlobalSchema,

    #[error("global capability schema {schema_id} has no current version")]
    NoGlobalSchemaVersion { schema_id: String },
}

/// Failure of a driver entry point.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Call(#[from] ApiCallError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("instance {instance_id} has zero VNICs")]
    NoVnic { instance_id: InstanceId },

    #[error("VNIC attachment of instance {instance_id} does not reference a VNIC")]
    DetachedVnic { instance_id: InstanceId },

    #[error("VNIC {vnic_id} of instance {instance_id} has no public IP")]
    NoPublicIp {
        instance_id: InstanceId,
        vnic_id: VnicId,
    },

    #[error("VNIC {vnic_id} of instance {instance_id} has no private IP")]
    NoPrivateIp {
        instance_id: InstanceId,
        vnic_id: VnicId,
    },

    #[error("capability schema for image {image_id} not listed after creation")]
    SchemaNotListed { image_id: ImageId },
}

impl DriverError {
    /// Whether a call ran out of retry attempts.
    pub fn is_retry_exhausted(&self) -> bool {
        match self {
            Self::Call(e) => e.is_exhausted(),
            Self::Wait(PollError::Fetch { source, .. }) => source.is_exhausted(),
            _ => false,
        }
    }

    /// Whether the run was cancelled or hit its deadline.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Call(e) => e.is_interrupted(),
            Self::Wait(PollError::Interrupted { .. }) => true,
            Self::Wait(PollError::Fetch { source, .. }) => source.is_interrupted(),
            _ => false,
        }
    }

    /// The service error behind this failure, if one was observed.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Call(e) => e.service_error(),
            Self::Wait(PollError::Fetch { source, .. }) => source.service_error(),
            _ => None,
        }
    }
}
