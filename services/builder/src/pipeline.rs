//! The build pipeline.
//!
//! Steps run strictly in order and a failure stops the run. Nothing is
//! rolled back: the error names the failing step and the remote resources
//! left behind so the invoker can clean them up.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use smith_capability::LaunchMode;
use smith_id::{ImageCapabilitySchemaId, ImageId, InstanceId};
use smith_reconcile::CallContext;
use thiserror::Error;
use tracing::{error, info};

use crate::driver::Driver;
use crate::error::DriverError;
use crate::provision::{ProvisionError, ProvisionTarget, Provisioner};

pub const INSTANCE_WAITING_STATES: &[&str] = &["PROVISIONING", "STARTING"];
pub const INSTANCE_RUNNING: &str = "RUNNING";
pub const TERMINATION_WAITING_STATES: &[&str] = &["TERMINATING"];
pub const INSTANCE_TERMINATED: &str = "TERMINATED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStep {
    ResolveBaseImage,
    LaunchInstance,
    WaitForInstance,
    GetInstanceIp,
    Provision,
    CreateImage,
    WaitForImage,
    ReconcileCapabilitySchema,
    TerminateInstance,
    WaitForTermination,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStep::ResolveBaseImage => "resolve base image",
            BuildStep::LaunchInstance => "launch instance",
            BuildStep::WaitForInstance => "wait for instance",
            BuildStep::GetInstanceIp => "get instance ip",
            BuildStep::Provision => "provision",
            BuildStep::CreateImage => "create image",
            BuildStep::WaitForImage => "wait for image",
            BuildStep::ReconcileCapabilitySchema => "reconcile capability schema",
            BuildStep::TerminateInstance => "terminate instance",
            BuildStep::WaitForTermination => "wait for termination",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Remote resources a failed run leaves behind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Leftovers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<ImageId>,
}

impl Leftovers {
    pub fn is_empty(&self) -> bool {
        self.instance_id.is_none() && self.image_id.is_none()
    }

    fn fail(&self, step: BuildStep, source: impl Into<StepError>) -> PipelineError {
        let source = source.into();
        error!(
            step = %step,
            instance_id = ?self.instance_id,
            image_id = ?self.image_id,
            error = %source,
            "Build step failed"
        );
        PipelineError {
            step,
            leftovers: self.clone(),
            source,
        }
    }
}

#[derive(Debug, Error)]
#[error("build failed at step '{step}': {source}")]
pub struct PipelineError {
    pub step: BuildStep,
    pub leftovers: Leftovers,
    #[source]
    pub source: StepError,
}

impl PipelineError {
    /// The driver failure behind this error, if the step was a driver call.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match &self.source {
            StepError::Driver(e) => Some(e),
            StepError::Provision(_) => None,
        }
    }
}

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildArtifact {
    pub image_id: ImageId,
    pub image_name: String,
    pub base_image_id: ImageId,
    pub build_instance_id: InstanceId,
    pub capability_schema_id: ImageCapabilitySchemaId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_mode: Option<LaunchMode>,
    pub completed_at: DateTime<Utc>,
}

pub struct Pipeline {
    driver: Driver,
    provisioner: Arc<dyn Provisioner>,
}

impl Pipeline {
    pub fn new(driver: Driver, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            driver,
            provisioner,
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Run every step once, in order.
    pub async fn run(&self, ctx: &CallContext) -> Result<BuildArtifact, PipelineError> {
        let driver = &self.driver;
        let config = driver.config();
        let mut left = Leftovers::default();

        info!(image_name = %config.image_name, shape = %config.shape, "Starting image build");

        let base_image_id = driver
            .resolve_base_image(ctx)
            .await
            .map_err(|e| left.fail(BuildStep::ResolveBaseImage, e))?;

        let instance_id = driver
            .create_instance(ctx, &base_image_id, config.ssh_public_key.as_deref())
            .await
            .map_err(|e| left.fail(BuildStep::LaunchInstance, e))?;
        left.instance_id = Some(instance_id.clone());

        driver
            .wait_for_instance_state(ctx, &instance_id, INSTANCE_WAITING_STATES, INSTANCE_RUNNING)
            .await
            .map_err(|e| left.fail(BuildStep::WaitForInstance, e))?;

        let host = driver
            .get_instance_ip(ctx, &instance_id)
            .await
            .map_err(|e| left.fail(BuildStep::GetInstanceIp, e))?;
        let credentials = if config.windows {
            Some(
                driver
                    .get_instance_initial_credentials(ctx, &instance_id)
                    .await
                    .map_err(|e| left.fail(BuildStep::GetInstanceIp, e))?,
            )
        } else {
            None
        };

        let target = ProvisionTarget {
            instance_id: instance_id.clone(),
            host,
            credentials,
        };
        self.provisioner
            .provision(ctx, &target)
            .await
            .map_err(|e| left.fail(BuildStep::Provision, e))?;

        let image = driver
            .create_image(ctx, &instance_id)
            .await
            .map_err(|e| left.fail(BuildStep::CreateImage, e))?;
        left.image_id = Some(image.id.clone());

        driver
            .wait_for_image_creation(ctx, &image.id)
            .await
            .map_err(|e| left.fail(BuildStep::WaitForImage, e))?;

        let schema = driver
            .update_image_capability_schema(ctx, &image.id)
            .await
            .map_err(|e| left.fail(BuildStep::ReconcileCapabilitySchema, e))?;

        // The image is the product from here on.
        left.image_id = None;

        driver
            .terminate_instance(ctx, &instance_id)
            .await
            .map_err(|e| left.fail(BuildStep::TerminateInstance, e))?;

        driver
            .wait_for_instance_state(
                ctx,
                &instance_id,
                TERMINATION_WAITING_STATES,
                INSTANCE_TERMINATED,
            )
            .await
            .map_err(|e| left.fail(BuildStep::WaitForTermination, e))?;

        let artifact = BuildArtifact {
            image_id: image.id,
            image_name: config.image_name.clone(),
            base_image_id,
            build_instance_id: instance_id,
            capability_schema_id: schema.id,
            launch_mode: config.launch_mode,
            completed_at: Utc::now(),
        };

        info!(
            image_id = %artifact.image_id,
            image_name = %artifact.image_name,
            "Image build complete"
        );

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use smith_capability::SchemaData;

    use super::*;
    use crate::compute::{ops, ApiError, MockComputeService};
    use crate::config::Config;
    use crate::provision::NoopProvisioner;

    const CONFIG: &str = r#"
        availability_domain = "aaaa:PHX-AD-3"
        compartment_id = "ocid1.compartment.oc1..aaaa"
        shape = "VM.Standard2.1"
        image_name = "HelloWorld"
        base_image_id = "ocid1.image.oc1.phx.aaaa"
        subnet_id = "ocid1.subnet.oc1.phx.aaaa"
    "#;

    fn pipeline(mock: Arc<MockComputeService>) -> Pipeline {
        let config = Config::from_toml_str(CONFIG).unwrap();
        Pipeline::new(Driver::new(mock, Arc::new(config)), Arc::new(NoopProvisioner))
    }

    #[test]
    fn test_step_display() {
        assert_eq!(
            BuildStep::ReconcileCapabilitySchema.to_string(),
            "reconcile capability schema"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let mock = Arc::new(MockComputeService::new().with_global_schema("1", SchemaData::new()));
        let artifact = pipeline(mock.clone())
            .run(&CallContext::background())
            .await
            .unwrap();

        assert_eq!(artifact.image_name, "HelloWorld");
        assert_eq!(
            mock.instance(&artifact.build_instance_id)
                .await
                .unwrap()
                .lifecycle_state,
            "TERMINATED"
        );
        assert_eq!(
            mock.image(&artifact.image_id).await.unwrap().lifecycle_state,
            "AVAILABLE"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reports_leftovers() {
        let mock = Arc::new(MockComputeService::new());
        let err = pipeline(mock.clone())
            .run(&CallContext::background())
            .await
            .unwrap_err();

        assert_eq!(err.step, BuildStep::ReconcileCapabilitySchema);
        assert!(err.leftovers.instance_id.is_some());
        assert!(err.leftovers.image_id.is_some());
        assert_eq!(mock.calls(ops::TERMINATE_INSTANCE).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_leaves_nothing() {
        let mock = Arc::new(MockComputeService::new().failing(
            ops::LAUNCH_INSTANCE,
            [ApiError::service(400, "LimitExceeded", "out of capacity")],
        ));
        let err = pipeline(mock).run(&CallContext::background()).await.unwrap_err();

        assert_eq!(err.step, BuildStep::LaunchInstance);
        assert!(err.leftovers.is_empty());
        assert_eq!(
            err.driver_error()
                .and_then(DriverError::api_error)
                .and_then(ApiError::status),
            Some(400)
        );
    }
}
