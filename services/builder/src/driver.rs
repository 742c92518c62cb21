//! Driver entry points.
//!
//! One method per lifecycle step. Every remote call goes through the
//! [`CallExecutor`], and both wait loops fetch through it as well, so a
//! throttled poll backs off instead of failing the wait.

use std::sync::Arc;

use smith_id::{ImageId, InstanceId, RetryToken};
use smith_reconcile::{poll_until, CallContext, CallExecutor, PollOutcome, PollTarget};
use tracing::{debug, info};

use crate::capability::{SchemaReconciler, SchemaRequest};
use crate::compute::{
    ops, ComputeService, Image, ImageCapabilitySchema, Instance, InstanceCredentials,
};
use crate::config::Config;
use crate::error::{DriverError, SelectionError};
use crate::image_filter::find_base_image;
use crate::launch::{image_details, launch_details};

/// Image states a new image passes through before it is usable.
pub const IMAGE_WAITING_STATES: &[&str] = &["PROVISIONING"];
pub const IMAGE_AVAILABLE: &str = "AVAILABLE";

pub struct Driver {
    compute: Arc<dyn ComputeService>,
    config: Arc<Config>,
    executor: CallExecutor,
}

impl Driver {
    pub fn new(compute: Arc<dyn ComputeService>, config: Arc<Config>) -> Self {
        let executor = CallExecutor::new(config.backoff_policy());
        Self {
            compute,
            config,
            executor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The configured base image id, or the newest image matching the filter.
    pub async fn resolve_base_image(&self, ctx: &CallContext) -> Result<ImageId, DriverError> {
        if let Some(id) = &self.config.base_image_id {
            debug!(image_id = %id, "Using configured base image");
            return Ok(id.clone());
        }

        let filter = self
            .config
            .base_image_filter
            .as_ref()
            .ok_or(SelectionError::NoBaseImage)?;

        find_base_image(self.compute.as_ref(), &self.executor, ctx, filter).await
    }

    /// Launch the build instance from `image_id`.
    pub async fn create_instance(
        &self,
        ctx: &CallContext,
        image_id: &ImageId,
        public_key: Option<&str>,
    ) -> Result<InstanceId, DriverError> {
        let details = launch_details(&self.config, image_id.clone(), public_key);
        let retry_token = RetryToken::new();
        let compute = self.compute.as_ref();

        let instance = self
            .executor
            .execute(ctx, ops::LAUNCH_INSTANCE, || {
                compute.launch_instance(&details, &retry_token)
            })
            .await?;

        info!(
            instance_id = %instance.id,
            image_id = %image_id,
            shape = %details.shape,
            availability_domain = %details.availability_domain,
            "Launched instance"
        );

        Ok(instance.id)
    }

    /// Address to provision over: the first VNIC's private or public IP.
    pub async fn get_instance_ip(
        &self,
        ctx: &CallContext,
        instance_id: &InstanceId,
    ) -> Result<String, DriverError> {
        let compute = self.compute.as_ref();
        let compartment_id = &self.config.compartment_id;

        let attachments = self
            .executor
            .execute(ctx, ops::LIST_VNIC_ATTACHMENTS, || {
                compute.list_vnic_attachments(compartment_id, instance_id)
            })
            .await?;

        let attachment = attachments.first().ok_or_else(|| DriverError::NoVnic {
            instance_id: instance_id.clone(),
        })?;
        let vnic_id = attachment
            .vnic_id
            .clone()
            .ok_or_else(|| DriverError::DetachedVnic {
                instance_id: instance_id.clone(),
            })?;

        let vnic = self
            .executor
            .execute(ctx, ops::GET_VNIC, || compute.get_vnic(&vnic_id))
            .await?;

        let ip = if self.config.use_private_ip {
            vnic.private_ip.ok_or_else(|| DriverError::NoPrivateIp {
                instance_id: instance_id.clone(),
                vnic_id: vnic_id.clone(),
            })?
        } else {
            vnic.public_ip.ok_or_else(|| DriverError::NoPublicIp {
                instance_id: instance_id.clone(),
                vnic_id: vnic_id.clone(),
            })?
        };

        info!(
            instance_id = %instance_id,
            vnic_id = %vnic_id,
            ip = %ip,
            private = self.config.use_private_ip,
            "Resolved instance address"
        );

        Ok(ip)
    }

    /// Initial Windows credentials of the instance.
    pub async fn get_instance_initial_credentials(
        &self,
        ctx: &CallContext,
        instance_id: &InstanceId,
    ) -> Result<InstanceCredentials, DriverError> {
        let compute = self.compute.as_ref();
        let credentials = self
            .executor
            .execute(ctx, ops::GET_WINDOWS_INITIAL_CREDENTIALS, || {
                compute.get_windows_initial_credentials(instance_id)
            })
            .await?;

        debug!(
            instance_id = %instance_id,
            username = %credentials.username,
            "Fetched initial credentials"
        );

        Ok(credentials)
    }

    /// Snapshot the instance into a new image.
    pub async fn create_image(
        &self,
        ctx: &CallContext,
        instance_id: &InstanceId,
    ) -> Result<Image, DriverError> {
        let details = image_details(&self.config, instance_id.clone());
        let retry_token = RetryToken::new();
        let compute = self.compute.as_ref();

        let image = self
            .executor
            .execute(ctx, ops::CREATE_IMAGE, || {
                compute.create_image(&details, &retry_token)
            })
            .await?;

        info!(
            image_id = %image.id,
            instance_id = %instance_id,
            display_name = %details.display_name,
            "Creating image"
        );

        Ok(image)
    }

    /// Reconcile the image's capability schema with the configured overrides.
    pub async fn update_image_capability_schema(
        &self,
        ctx: &CallContext,
        image_id: &ImageId,
    ) -> Result<ImageCapabilitySchema, DriverError> {
        let request = SchemaRequest {
            image_id: image_id.clone(),
            compartment_id: self.config.image_compartment_id().clone(),
            display_name: self.config.schema_display_name(),
            overrides: self.config.capability_overrides()?,
            freeform_tags: self.config.tags.clone(),
            defined_tags: self.config.defined_tags.clone(),
        };

        SchemaReconciler::new(self.compute.as_ref(), &self.executor)
            .reconcile(ctx, &request)
            .await
    }

    pub async fn delete_image(&self, ctx: &CallContext, image_id: &ImageId) -> Result<(), DriverError> {
        let compute = self.compute.as_ref();
        self.executor
            .execute(ctx, ops::DELETE_IMAGE, || compute.delete_image(image_id))
            .await?;

        info!(image_id = %image_id, "Deleted image");
        Ok(())
    }

    pub async fn terminate_instance(
        &self,
        ctx: &CallContext,
        instance_id: &InstanceId,
    ) -> Result<(), DriverError> {
        let compute = self.compute.as_ref();
        self.executor
            .execute(ctx, ops::TERMINATE_INSTANCE, || {
                compute.terminate_instance(instance_id)
            })
            .await?;

        info!(instance_id = %instance_id, "Terminating instance");
        Ok(())
    }

    /// Instances in the build compartment carrying the build instance name.
    pub async fn list_build_instances(&self, ctx: &CallContext) -> Result<Vec<Instance>, DriverError> {
        let compute = self.compute.as_ref();
        let compartment_id = &self.config.compartment_id;
        let display_name = self.config.instance_name.as_deref();

        Ok(self
            .executor
            .execute(ctx, ops::LIST_INSTANCES, || {
                compute.list_instances(compartment_id, display_name)
            })
            .await?)
    }

    /// Poll the instance until it reports `terminal`.
    pub async fn wait_for_instance_state(
        &self,
        ctx: &CallContext,
        instance_id: &InstanceId,
        waiting: &[&str],
        terminal: &str,
    ) -> Result<PollOutcome, DriverError> {
        let target = self.poll_target(instance_id.as_str(), waiting, terminal);
        let compute = self.compute.as_ref();
        let executor = &self.executor;

        let outcome = poll_until(ctx, &target, move |_| async move {
            executor
                .execute(ctx, ops::GET_INSTANCE, || compute.get_instance(instance_id))
                .await
                .map(|instance| instance.lifecycle_state)
        })
        .await?;

        Ok(outcome)
    }

    /// Poll a new image until it is `AVAILABLE`.
    pub async fn wait_for_image_creation(
        &self,
        ctx: &CallContext,
        image_id: &ImageId,
    ) -> Result<PollOutcome, DriverError> {
        let target = self.poll_target(image_id.as_str(), IMAGE_WAITING_STATES, IMAGE_AVAILABLE);
        let compute = self.compute.as_ref();
        let executor = &self.executor;

        let outcome = poll_until(ctx, &target, move |_| async move {
            executor
                .execute(ctx, ops::GET_IMAGE, || compute.get_image(image_id))
                .await
                .map(|image| image.lifecycle_state)
        })
        .await?;

        Ok(outcome)
    }

    fn poll_target(&self, resource_id: &str, waiting: &[&str], terminal: &str) -> PollTarget {
        PollTarget::new(resource_id, terminal)
            .waiting(waiting.iter().copied())
            .max_iterations(self.config.poll.max_iterations)
            .interval(self.config.poll_interval())
    }
}
