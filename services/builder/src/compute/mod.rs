//! Remote compute service interface.
//!
//! The driver talks to the control plane only through [`ComputeService`].
//! [`HttpComputeClient`] implements it over REST; [`MockComputeService`]
//! keeps everything in memory for tests and dry runs.

mod error;
mod http;
mod mock;
pub mod model;

use async_trait::async_trait;
use smith_id::{
    CompartmentId, GlobalCapabilitySchemaId, ImageCapabilitySchemaId, ImageId, InstanceId,
    RetryToken, VnicId,
};

pub use error::ApiError;
pub use http::{EndpointConfig, HttpComputeClient};
pub use mock::MockComputeService;
pub use model::*;

/// Operation names, used for logging, error context and mock bookkeeping.
pub mod ops {
    pub const LAUNCH_INSTANCE: &str = "LaunchInstance";
    pub const GET_INSTANCE: &str = "GetInstance";
    pub const LIST_INSTANCES: &str = "ListInstances";
    pub const TERMINATE_INSTANCE: &str = "TerminateInstance";
    pub const LIST_IMAGES: &str = "ListImages";
    pub const GET_IMAGE: &str = "GetImage";
    pub const CREATE_IMAGE: &str = "CreateImage";
    pub const DELETE_IMAGE: &str = "DeleteImage";
    pub const LIST_VNIC_ATTACHMENTS: &str = "ListVnicAttachments";
    pub const GET_VNIC: &str = "GetVnic";
    pub const GET_WINDOWS_INITIAL_CREDENTIALS: &str = "GetWindowsInstanceInitialCredentials";
    pub const LIST_IMAGE_CAPABILITY_SCHEMAS: &str = "ListComputeImageCapabilitySchemas";
    pub const LIST_GLOBAL_CAPABILITY_SCHEMAS: &str = "ListComputeGlobalImageCapabilitySchemas";
    pub const GET_GLOBAL_CAPABILITY_SCHEMA_VERSION: &str =
        "GetComputeGlobalImageCapabilitySchemaVersion";
    pub const CREATE_IMAGE_CAPABILITY_SCHEMA: &str = "CreateComputeImageCapabilitySchema";
    pub const UPDATE_IMAGE_CAPABILITY_SCHEMA: &str = "UpdateComputeImageCapabilitySchema";
}

/// Compute and virtual network operations the builder consumes.
///
/// Implementations make exactly one attempt per call; retrying is the
/// caller's job.
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Launch an instance. Repeating a launch with the same token must not
    /// create a second instance.
    async fn launch_instance(
        &self,
        details: &LaunchInstanceDetails,
        retry_token: &RetryToken,
    ) -> Result<Instance, ApiError>;

    async fn get_instance(&self, id: &InstanceId) -> Result<Instance, ApiError>;

    async fn list_instances(
        &self,
        compartment_id: &CompartmentId,
        display_name: Option<&str>,
    ) -> Result<Vec<Instance>, ApiError>;

    async fn terminate_instance(&self, id: &InstanceId) -> Result<(), ApiError>;

    /// One page of images matching `request`.
    async fn list_images(&self, request: &ListImagesRequest) -> Result<Page<Image>, ApiError>;

    async fn get_image(&self, id: &ImageId) -> Result<Image, ApiError>;

    async fn create_image(
        &self,
        details: &CreateImageDetails,
        retry_token: &RetryToken,
    ) -> Result<Image, ApiError>;

    async fn delete_image(&self, id: &ImageId) -> Result<(), ApiError>;

    async fn list_vnic_attachments(
        &self,
        compartment_id: &CompartmentId,
        instance_id: &InstanceId,
    ) -> Result<Vec<VnicAttachment>, ApiError>;

    async fn get_vnic(&self, id: &VnicId) -> Result<Vnic, ApiError>;

    async fn get_windows_initial_credentials(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceCredentials, ApiError>;

    async fn list_image_capability_schemas(
        &self,
        image_id: &ImageId,
    ) -> Result<Vec<ImageCapabilitySchema>, ApiError>;

    async fn list_global_capability_schemas(
        &self,
    ) -> Result<Vec<GlobalCapabilitySchemaSummary>, ApiError>;

    async fn get_global_capability_schema_version(
        &self,
        id: &GlobalCapabilitySchemaId,
        version_name: &str,
    ) -> Result<GlobalCapabilitySchemaVersion, ApiError>;

    async fn create_image_capability_schema(
        &self,
        details: &CreateCapabilitySchemaDetails,
        retry_token: &RetryToken,
    ) -> Result<ImageCapabilitySchema, ApiError>;

    async fn update_image_capability_schema(
        &self,
        id: &ImageCapabilitySchemaId,
        details: &UpdateCapabilitySchemaDetails,
    ) -> Result<ImageCapabilitySchema, ApiError>;
}
