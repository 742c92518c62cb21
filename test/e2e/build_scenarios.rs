//! End-to-end build scenarios.
//!
//! Every scenario drives the real driver and pipeline against the in-memory
//! compute service, with virtual time so backoff and poll sleeps are instant:
//!
//! 1. Base image resolution across pages
//! 2. Capability schema copy and idempotent reconciliation
//! 3. Instance waits that converge or hit an unexpected state
//! 4. Full builds, failures with leftovers, retries and cancellation
//!
//! ## Running
//!
//! ```bash
//! cargo test -p smith-e2e --test build_scenarios
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use smith_builder::compute::{
    ops, ApiError, Image, ImageCapabilitySchema, MockComputeService,
};
use smith_builder::provision::{NoopProvisioner, ProvisionError, ProvisionTarget, Provisioner};
use smith_builder::{BuildStep, Config, Driver, DriverError, Pipeline};
use smith_capability::{
    BooleanDescriptor, CapabilityDescriptor, DescriptorSource, EnumStringDescriptor, SchemaData,
    LAUNCH_MODE_KEY, NIC_ATTACHMENT_TYPE_KEY,
};
use smith_id::ImageId;
use smith_reconcile::{CallContext, Interrupted, PollError};
use tokio::sync::watch;

const BASE_CONFIG: &str = r#"
availability_domain = "aaaa:PHX-AD-3"
compartment_id = "ocid1.compartment.oc1..aaaa"
shape = "VM.Standard.E4.Flex"
image_name = "HelloWorld"
instance_name = "imagesmith-build"
subnet_id = "ocid1.subnet.oc1.phx.aaaa"
ssh_public_key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 builder"
launch_mode = "PARAVIRTUALIZED"
nic_attachment_type = "VFIO"
"#;

const DIRECT_BASE_IMAGE: &str = r#"base_image_id = "ocid1.image.oc1.phx.base""#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("smith_builder=debug,smith_reconcile=debug")
        .with_test_writer()
        .try_init();
}

/// Config from the shared base, with `extra` appended. Table sections in
/// `extra` must come after any top-level keys it sets.
fn config(extra: &str) -> Arc<Config> {
    Arc::new(Config::from_toml_str(&format!("{BASE_CONFIG}\n{extra}")).unwrap())
}

fn image(id: &str, name: &str) -> Image {
    Image {
        id: ImageId::parse(id).unwrap(),
        compartment_id: None,
        display_name: Some(name.to_string()),
        lifecycle_state: "AVAILABLE".to_string(),
        operating_system: Some("Oracle Linux".to_string()),
        operating_system_version: None,
        launch_mode: None,
        time_created: Some(Utc::now()),
    }
}

fn global_schema() -> SchemaData {
    [
        (
            "Storage.Iscsi".to_string(),
            CapabilityDescriptor::Boolean(BooleanDescriptor {
                source: DescriptorSource::Global,
                default_value: Some(true),
            }),
        ),
        (
            "Compute.Firmware".to_string(),
            CapabilityDescriptor::EnumString(EnumStringDescriptor {
                source: DescriptorSource::Global,
                values: vec!["BIOS".to_string(), "UEFI_64".to_string()],
                default_value: Some("UEFI_64".to_string()),
            }),
        ),
    ]
    .into_iter()
    .collect()
}

fn pipeline(mock: Arc<MockComputeService>, config: Arc<Config>) -> Pipeline {
    Pipeline::new(Driver::new(mock, config), Arc::new(NoopProvisioner))
}

/// Records every target it is asked to provision.
#[derive(Default)]
struct RecordingProvisioner {
    targets: Mutex<Vec<ProvisionTarget>>,
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(
        &self,
        _ctx: &CallContext,
        target: &ProvisionTarget,
    ) -> Result<(), ProvisionError> {
        self.targets.lock().unwrap().push(target.clone());
        Ok(())
    }
}

// =============================================================================
// Base image resolution
// =============================================================================

#[tokio::test]
async fn test_display_name_search_matches_second_page() {
    init_tracing();

    let mock = Arc::new(MockComputeService::new().with_image_pages(vec![
        vec![
            image("ocid1.image.oc1.phx.newest", "Oracle-Linux-8.2-2020.08.27-0"),
            image("ocid1.image.oc1.phx.older", "Oracle-Linux-7.9-2020.10.26-0"),
        ],
        vec![image("ocid1.image.oc1.phx.match", "Oracle-Linux-7.8-2020.05.26-0")],
    ]));
    let config = config(
        r#"
        [base_image_filter]
        operating_system = "Oracle Linux"
        display_name_search = "^Oracle-Linux-7\\.8"
        "#,
    );
    let driver = Driver::new(mock.clone(), config);

    let image_id = driver
        .resolve_base_image(&CallContext::background())
        .await
        .unwrap();

    assert_eq!(image_id.as_str(), "ocid1.image.oc1.phx.match");

    let requests = mock.list_image_requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].compartment_id.as_ref().map(|c| c.as_str()),
        Some("ocid1.compartment.oc1..aaaa")
    );
    assert_eq!(requests[0].shape.as_deref(), Some("VM.Standard.E4.Flex"));
}

#[tokio::test]
async fn test_filter_without_search_takes_newest() {
    let mock = Arc::new(MockComputeService::new().with_image_pages(vec![vec![
        image("ocid1.image.oc1.phx.newest", "Oracle-Linux-8.2-2020.08.27-0"),
        image("ocid1.image.oc1.phx.older", "Oracle-Linux-7.8-2020.05.26-0"),
    ]]));
    let driver = Driver::new(
        mock,
        config("[base_image_filter]\noperating_system = \"Oracle Linux\""),
    );

    let image_id = driver
        .resolve_base_image(&CallContext::background())
        .await
        .unwrap();
    assert_eq!(image_id.as_str(), "ocid1.image.oc1.phx.newest");
}

// =============================================================================
// Capability schema reconciliation
// =============================================================================

#[tokio::test]
async fn test_boolean_global_descriptor_copied_as_image() {
    init_tracing();

    let global: SchemaData = [(
        "Storage.Iscsi".to_string(),
        CapabilityDescriptor::Boolean(BooleanDescriptor {
            source: DescriptorSource::Global,
            default_value: Some(true),
        }),
    )]
    .into_iter()
    .collect();
    let mock = Arc::new(MockComputeService::new().with_global_schema("1", global));
    let driver = Driver::new(mock.clone(), config(DIRECT_BASE_IMAGE));
    let image_id = ImageId::parse("ocid1.image.oc1.phx.built").unwrap();

    let schema = driver
        .update_image_capability_schema(&CallContext::background(), &image_id)
        .await
        .unwrap();

    assert_eq!(
        schema.schema_data.get("Storage.Iscsi"),
        Some(&CapabilityDescriptor::Boolean(BooleanDescriptor {
            source: DescriptorSource::Image,
            default_value: Some(true),
        }))
    );
    assert!(schema.schema_data.get(LAUNCH_MODE_KEY).is_some());
    assert!(schema.schema_data.get(NIC_ATTACHMENT_TYPE_KEY).is_some());
    assert!(schema.schema_data.is_image_sourced());
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let mock = Arc::new(MockComputeService::new().with_global_schema("1", global_schema()));
    let driver = Driver::new(mock.clone(), config(DIRECT_BASE_IMAGE));
    let ctx = CallContext::background();
    let image_id = ImageId::parse("ocid1.image.oc1.phx.built").unwrap();

    let first = driver
        .update_image_capability_schema(&ctx, &image_id)
        .await
        .unwrap();
    let global_fetches = mock.calls(ops::GET_GLOBAL_CAPABILITY_SCHEMA_VERSION).await;

    let second = driver
        .update_image_capability_schema(&ctx, &image_id)
        .await
        .unwrap();

    assert_eq!(global_fetches, 1);
    assert_eq!(
        mock.calls(ops::GET_GLOBAL_CAPABILITY_SCHEMA_VERSION).await,
        global_fetches
    );
    assert_eq!(mock.calls(ops::LIST_GLOBAL_CAPABILITY_SCHEMAS).await, 1);

    let stored: Vec<ImageCapabilitySchema> = mock.image_schemas().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
}

// =============================================================================
// Instance waits
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_instance_wait_converges() {
    let mock = Arc::new(
        MockComputeService::new().with_instance_states(["RUNNING", "RUNNING", "AVAILABLE"]),
    );
    let driver = Driver::new(mock.clone(), config(DIRECT_BASE_IMAGE));
    let ctx = CallContext::background();

    let base = driver.resolve_base_image(&ctx).await.unwrap();
    let instance_id = driver.create_instance(&ctx, &base, None).await.unwrap();

    let outcome = driver
        .wait_for_instance_state(&ctx, &instance_id, &["RUNNING"], "AVAILABLE")
        .await
        .unwrap();

    assert_eq!(outcome.state, "AVAILABLE");
    assert_eq!(outcome.iterations, 3);
    assert_eq!(mock.calls(ops::GET_INSTANCE).await, 3);
}

#[tokio::test(start_paused = true)]
async fn test_instance_wait_unexpected_terminated() {
    let mock =
        Arc::new(MockComputeService::new().with_instance_states(["RUNNING", "TERMINATED"]));
    let driver = Driver::new(mock.clone(), config(DIRECT_BASE_IMAGE));
    let ctx = CallContext::background();

    let base = driver.resolve_base_image(&ctx).await.unwrap();
    let instance_id = driver.create_instance(&ctx, &base, None).await.unwrap();

    let err = driver
        .wait_for_instance_state(&ctx, &instance_id, &["RUNNING"], "AVAILABLE")
        .await
        .unwrap_err();

    match &err {
        DriverError::Wait(PollError::UnexpectedState {
            observed,
            waiting,
            terminal,
            ..
        }) => {
            assert_eq!(observed, "TERMINATED");
            assert_eq!(waiting, &vec!["RUNNING".to_string()]);
            assert_eq!(terminal, "AVAILABLE");
        }
        other => panic!("expected unexpected state, got {other:?}"),
    }
    assert!(err.to_string().contains("TERMINATED"));
    assert_eq!(mock.calls(ops::GET_INSTANCE).await, 2);
}

// =============================================================================
// Full builds
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_build() {
    init_tracing();

    let mock = Arc::new(
        MockComputeService::new()
            .with_image_pages(vec![vec![image(
                "ocid1.image.oc1.phx.base",
                "Oracle-Linux-8.2-2020.08.27-0",
            )]])
            .with_instance_states(["PROVISIONING", "STARTING", "RUNNING"])
            .with_image_states(["PROVISIONING", "PROVISIONING", "AVAILABLE"])
            .with_global_schema("1", global_schema())
            .with_windows_credentials("opc", "Initial#Pass1"),
    );
    let config = config(
        r#"
        windows = true
        [tags]
        team = "images"
        [base_image_filter]
        operating_system = "Oracle Linux"
        "#,
    );
    let provisioner = Arc::new(RecordingProvisioner::default());
    let pipeline = Pipeline::new(Driver::new(mock.clone(), config), provisioner.clone());

    let artifact = pipeline.run(&CallContext::background()).await.unwrap();

    assert_eq!(artifact.base_image_id.as_str(), "ocid1.image.oc1.phx.base");
    assert_eq!(artifact.image_name, "HelloWorld");

    let targets = provisioner.targets.lock().unwrap().clone();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].host, "203.0.113.10");
    assert_eq!(targets[0].instance_id, artifact.build_instance_id);
    assert_eq!(
        targets[0].credentials.as_ref().map(|c| c.username.as_str()),
        Some("opc")
    );

    let launches = mock.launch_requests().await;
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].display_name.as_deref(), Some("imagesmith-build"));
    assert_eq!(
        launches[0].metadata["ssh_authorized_keys"],
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 builder"
    );

    let image = mock.image(&artifact.image_id).await.unwrap();
    assert_eq!(image.lifecycle_state, "AVAILABLE");

    let instance = mock.instance(&artifact.build_instance_id).await.unwrap();
    assert_eq!(instance.lifecycle_state, "TERMINATED");

    let schemas = mock.image_schemas().await;
    assert_eq!(schemas.len(), 1);
    assert_eq!(schemas[0].id, artifact.capability_schema_id);
    assert_eq!(schemas[0].image_id, artifact.image_id);
    assert_eq!(
        schemas[0].display_name.as_deref(),
        Some("Default Image Capability Schema for HelloWorld")
    );
    assert_eq!(schemas[0].freeform_tags["team"], "images");
    assert_eq!(schemas[0].schema_data.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_failed_image_reports_leftovers() {
    let mock = Arc::new(
        MockComputeService::new()
            .with_image_states(["PROVISIONING", "DELETED"])
            .with_global_schema("1", global_schema()),
    );
    let err = pipeline(mock.clone(), config(DIRECT_BASE_IMAGE))
        .run(&CallContext::background())
        .await
        .unwrap_err();

    assert_eq!(err.step, BuildStep::WaitForImage);
    let instance_id = err.leftovers.instance_id.clone().unwrap();
    let image_id = err.leftovers.image_id.clone().unwrap();

    // No rollback: the instance keeps running and the image is not deleted.
    assert_eq!(
        mock.instance(&instance_id).await.unwrap().lifecycle_state,
        "RUNNING"
    );
    assert!(mock.image(&image_id).await.is_some());
    assert_eq!(mock.calls(ops::TERMINATE_INSTANCE).await, 0);
    assert_eq!(mock.calls(ops::DELETE_IMAGE).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let mock = Arc::new(
        MockComputeService::new()
            .with_global_schema("1", global_schema())
            .failing(
                ops::LAUNCH_INSTANCE,
                [
                    ApiError::service(429, "TooManyRequests", "slow down"),
                    ApiError::service(429, "TooManyRequests", "slow down"),
                ],
            )
            .failing(
                ops::GET_IMAGE,
                [ApiError::service(503, "ServiceUnavailable", "busy")],
            )
            .failing(
                ops::UPDATE_IMAGE_CAPABILITY_SCHEMA,
                [ApiError::service(500, "InternalError", "oops")],
            ),
    );

    let artifact = pipeline(mock.clone(), config(DIRECT_BASE_IMAGE))
        .run(&CallContext::background())
        .await
        .unwrap();

    assert_eq!(mock.calls(ops::LAUNCH_INSTANCE).await, 3);
    assert_eq!(mock.launch_requests().await.len(), 1);
    assert_eq!(mock.calls(ops::UPDATE_IMAGE_CAPABILITY_SCHEMA).await, 2);
    assert!(mock.image(&artifact.image_id).await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhausted() {
    let mock = Arc::new(MockComputeService::new().failing(
        ops::CREATE_IMAGE,
        (0..12).map(|_| ApiError::service(500, "InternalError", "still broken")),
    ));

    let err = pipeline(mock.clone(), config(DIRECT_BASE_IMAGE))
        .run(&CallContext::background())
        .await
        .unwrap_err();

    assert_eq!(err.step, BuildStep::CreateImage);
    assert!(err.driver_error().unwrap().is_retry_exhausted());
    assert_eq!(mock.calls(ops::CREATE_IMAGE).await, 10);
    assert!(err.leftovers.instance_id.is_some());
    assert!(err.leftovers.image_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_fails_immediately() {
    let mock = Arc::new(MockComputeService::new().failing(
        ops::CREATE_IMAGE,
        [ApiError::service(409, "Conflict", "instance is busy")],
    ));

    let err = pipeline(mock.clone(), config(DIRECT_BASE_IMAGE))
        .run(&CallContext::background())
        .await
        .unwrap_err();

    assert_eq!(err.step, BuildStep::CreateImage);
    assert!(!err.driver_error().unwrap().is_retry_exhausted());
    assert_eq!(mock.calls(ops::CREATE_IMAGE).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_wait() {
    let mock = Arc::new(MockComputeService::new().with_instance_states(["PROVISIONING"]));
    let ctx = CallContext::background().with_timeout(Duration::from_secs(60));

    let err = pipeline(mock.clone(), config(DIRECT_BASE_IMAGE))
        .run(&ctx)
        .await
        .unwrap_err();

    assert_eq!(err.step, BuildStep::WaitForInstance);
    assert!(err.driver_error().unwrap().is_interrupted());
    assert!(err.leftovers.instance_id.is_some());
    // Five-second polls inside a one-minute deadline.
    assert!(mock.calls(ops::GET_INSTANCE).await <= 13);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_launch() {
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    let mock = Arc::new(MockComputeService::new());

    let err = pipeline(mock.clone(), config(DIRECT_BASE_IMAGE))
        .run(&CallContext::with_shutdown(rx))
        .await
        .unwrap_err();

    assert_eq!(err.step, BuildStep::LaunchInstance);
    assert!(err.leftovers.is_empty());
    assert!(matches!(
        err.driver_error(),
        Some(DriverError::Call(smith_reconcile::CallError::Interrupted {
            reason: Interrupted::Cancelled,
            ..
        }))
    ));
    assert_eq!(mock.calls(ops::LAUNCH_INSTANCE).await, 0);
}
