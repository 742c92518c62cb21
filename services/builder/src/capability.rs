//! Per-image capability schema reconciliation.
//!
//! An image without a schema gets a copy of the current global schema,
//! relabeled `IMAGE`. The image's schema then receives the configured
//! overrides and is written back together with the image tags. Running the
//! reconciler again on the same image skips the global copy.

use smith_capability::{CapabilityOverride, SchemaData};
use smith_id::{CompartmentId, ImageId, RetryToken};
use smith_reconcile::{CallContext, CallExecutor};
use tracing::{debug, info};

use crate::compute::{
    ops, ComputeService, CreateCapabilitySchemaDetails, DefinedTags, FreeformTags,
    ImageCapabilitySchema, UpdateCapabilitySchemaDetails,
};
use crate::error::{DriverError, SelectionError};

/// What to reconcile and how.
#[derive(Debug, Clone)]
pub struct SchemaRequest {
    pub image_id: ImageId,
    pub compartment_id: CompartmentId,
    pub display_name: String,
    pub overrides: Vec<CapabilityOverride>,
    pub freeform_tags: FreeformTags,
    pub defined_tags: DefinedTags,
}

pub struct SchemaReconciler<'a> {
    compute: &'a dyn ComputeService,
    executor: &'a CallExecutor,
}

impl<'a> SchemaReconciler<'a> {
    pub fn new(compute: &'a dyn ComputeService, executor: &'a CallExecutor) -> Self {
        Self { compute, executor }
    }

    /// Ensure the image has a schema, apply overrides and persist it.
    pub async fn reconcile(
        &self,
        ctx: &CallContext,
        request: &SchemaRequest,
    ) -> Result<ImageCapabilitySchema, DriverError> {
        let mut schemas = self.list_image_schemas(ctx, &request.image_id).await?;

        if schemas.is_empty() {
            self.create_from_global(ctx, request).await?;
            schemas = self.list_image_schemas(ctx, &request.image_id).await?;
        } else {
            debug!(
                image_id = %request.image_id,
                schemas = schemas.len(),
                "Image already has a capability schema"
            );
        }

        let schema = schemas
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::SchemaNotListed {
                image_id: request.image_id.clone(),
            })?;

        let mut schema_data = schema.schema_data;
        schema_data.apply_overrides(&request.overrides);

        let details = UpdateCapabilitySchemaDetails {
            schema_data,
            freeform_tags: request.freeform_tags.clone(),
            defined_tags: request.defined_tags.clone(),
        };

        let updated = self
            .executor
            .execute(ctx, ops::UPDATE_IMAGE_CAPABILITY_SCHEMA, || {
                self.compute
                    .update_image_capability_schema(&schema.id, &details)
            })
            .await?;

        info!(
            image_id = %request.image_id,
            schema_id = %updated.id,
            capabilities = updated.schema_data.len(),
            overrides = request.overrides.len(),
            "Reconciled image capability schema"
        );

        Ok(updated)
    }

    async fn list_image_schemas(
        &self,
        ctx: &CallContext,
        image_id: &ImageId,
    ) -> Result<Vec<ImageCapabilitySchema>, DriverError> {
        Ok(self
            .executor
            .execute(ctx, ops::LIST_IMAGE_CAPABILITY_SCHEMAS, || {
                self.compute.list_image_capability_schemas(image_id)
            })
            .await?)
    }

    /// Copy the current global schema version onto the image.
    async fn create_from_global(
        &self,
        ctx: &CallContext,
        request: &SchemaRequest,
    ) -> Result<ImageCapabilitySchema, DriverError> {
        let globals = self
            .executor
            .execute(ctx, ops::LIST_GLOBAL_CAPABILITY_SCHEMAS, || {
                self.compute.list_global_capability_schemas()
            })
            .await?;

        let global = globals
            .into_iter()
            .next()
            .ok_or(SelectionError::NoGlobalSchema)?;
        let version_name =
            global
                .current_version_name
                .ok_or_else(|| SelectionError::NoGlobalSchemaVersion {
                    schema_id: global.id.to_string(),
                })?;

        let version = self
            .executor
            .execute(ctx, ops::GET_GLOBAL_CAPABILITY_SCHEMA_VERSION, || {
                self.compute
                    .get_global_capability_schema_version(&global.id, &version_name)
            })
            .await?;

        let schema_data: SchemaData = version.schema_data.to_image_schema()?;

        let details = CreateCapabilitySchemaDetails {
            compartment_id: request.compartment_id.clone(),
            image_id: request.image_id.clone(),
            display_name: request.display_name.clone(),
            compute_global_image_capability_schema_version_name: version.name,
            schema_data,
        };
        let retry_token = RetryToken::new();

        let created = self
            .executor
            .execute(ctx, ops::CREATE_IMAGE_CAPABILITY_SCHEMA, || {
                self.compute
                    .create_image_capability_schema(&details, &retry_token)
            })
            .await?;

        info!(
            image_id = %request.image_id,
            schema_id = %created.id,
            global_schema_id = %global.id,
            version = %details.compute_global_image_capability_schema_version_name,
            "Created image capability schema from global schema"
        );

        Ok(created)
    }
}
