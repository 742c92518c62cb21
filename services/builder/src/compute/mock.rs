//! In-memory compute service.
//!
//! Lifecycle states are scripted: each resource carries a queue of states
//! that successive `get` calls step through, and the last state sticks.
//! Failures can be queued per operation, and every call is counted.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use smith_capability::SchemaData;
use smith_id::{
    CompartmentId, GlobalCapabilitySchemaId, ImageCapabilitySchemaId, ImageId, InstanceId,
    RetryToken, VnicAttachmentId, VnicId,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::error::ApiError;
use super::model::*;
use super::{ops, ComputeService};

const DEFAULT_PRIVATE_IP: &str = "10.0.0.2";
const DEFAULT_PUBLIC_IP: &str = "203.0.113.10";

/// A record and the states its next fetches will report.
#[derive(Debug, Clone)]
struct Scripted<T> {
    record: T,
    pending: VecDeque<String>,
}

#[derive(Debug)]
struct MockState {
    instances: BTreeMap<InstanceId, Scripted<Instance>>,
    instance_script: Vec<String>,
    termination_script: Vec<String>,
    launched_by_token: HashMap<String, InstanceId>,

    images: BTreeMap<ImageId, Scripted<Image>>,
    image_script: Vec<String>,
    created_by_token: HashMap<String, ImageId>,
    image_pages: Vec<Vec<Image>>,

    launch_vnic: Option<(String, Option<String>)>,
    attachments: BTreeMap<InstanceId, Vec<VnicAttachment>>,
    vnics: BTreeMap<VnicId, Vnic>,
    credentials: Option<InstanceCredentials>,

    image_schemas: Vec<ImageCapabilitySchema>,
    schemas_by_token: HashMap<String, ImageCapabilitySchemaId>,
    global_schemas: Vec<GlobalCapabilitySchemaSummary>,
    global_versions: Vec<GlobalCapabilitySchemaVersion>,

    failures: HashMap<&'static str, VecDeque<ApiError>>,
    calls: HashMap<&'static str, u32>,

    launch_requests: Vec<LaunchInstanceDetails>,
    image_requests: Vec<CreateImageDetails>,
    list_image_requests: Vec<ListImagesRequest>,
    schema_updates: Vec<UpdateCapabilitySchemaDetails>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            instances: BTreeMap::new(),
            instance_script: vec!["PROVISIONING".to_string(), "RUNNING".to_string()],
            termination_script: vec!["TERMINATING".to_string(), "TERMINATED".to_string()],
            launched_by_token: HashMap::new(),
            images: BTreeMap::new(),
            image_script: vec!["PROVISIONING".to_string(), "AVAILABLE".to_string()],
            created_by_token: HashMap::new(),
            image_pages: Vec::new(),
            launch_vnic: Some((
                DEFAULT_PRIVATE_IP.to_string(),
                Some(DEFAULT_PUBLIC_IP.to_string()),
            )),
            attachments: BTreeMap::new(),
            vnics: BTreeMap::new(),
            credentials: None,
            image_schemas: Vec::new(),
            schemas_by_token: HashMap::new(),
            global_schemas: Vec::new(),
            global_versions: Vec::new(),
            failures: HashMap::new(),
            calls: HashMap::new(),
            launch_requests: Vec::new(),
            image_requests: Vec::new(),
            list_image_requests: Vec::new(),
            schema_updates: Vec::new(),
        }
    }
}

impl MockState {
    /// Count the call and pop a queued failure, if any.
    fn enter(&mut self, operation: &'static str) -> Result<(), ApiError> {
        *self.calls.entry(operation).or_default() += 1;
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => {
                debug!(operation, error = %error, "[MOCK] Injected failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn attach_vnic(&mut self, instance_id: &InstanceId) {
        let Some((private_ip, public_ip)) = self.launch_vnic.clone() else {
            return;
        };
        let vnic = Vnic {
            id: VnicId::synthetic(),
            private_ip: Some(private_ip),
            public_ip,
        };
        self.attachments
            .entry(instance_id.clone())
            .or_default()
            .push(VnicAttachment {
                id: VnicAttachmentId::synthetic(),
                instance_id: instance_id.clone(),
                vnic_id: Some(vnic.id.clone()),
                lifecycle_state: "ATTACHED".to_string(),
            });
        self.vnics.insert(vnic.id.clone(), vnic);
    }
}

fn not_found(what: impl std::fmt::Display) -> ApiError {
    ApiError::service(
        404,
        "NotAuthorizedOrNotFound",
        format!("{what} not found or not authorized"),
    )
}

fn step<T>(scripted: &mut Scripted<T>, state: impl FnOnce(&mut T) -> &mut String) -> T
where
    T: Clone,
{
    if let Some(next) = scripted.pending.pop_front() {
        *state(&mut scripted.record) = next;
    }
    scripted.record.clone()
}

/// In-memory [`ComputeService`] for tests and dry runs.
#[derive(Debug, Default)]
pub struct MockComputeService {
    state: Mutex<MockState>,
}

impl MockComputeService {
    /// Create a mock with default lifecycle scripts and no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// States that launched instances report on successive fetches.
    #[must_use]
    pub fn with_instance_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.get_mut().instance_script = states.into_iter().map(Into::into).collect();
        self
    }

    /// States that terminated instances report on successive fetches.
    #[must_use]
    pub fn with_termination_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.get_mut().termination_script = states.into_iter().map(Into::into).collect();
        self
    }

    /// States that created images report on successive fetches.
    #[must_use]
    pub fn with_image_states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.get_mut().image_script = states.into_iter().map(Into::into).collect();
        self
    }

    /// Pages returned by image listings, in order.
    #[must_use]
    pub fn with_image_pages(mut self, pages: Vec<Vec<Image>>) -> Self {
        self.state.get_mut().image_pages = pages;
        self
    }

    /// An existing instance whose fetches step through `states`.
    #[must_use]
    pub fn with_instance<I, S>(mut self, id: InstanceId, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pending: VecDeque<String> = states.into_iter().map(Into::into).collect();
        let record = Instance {
            id: id.clone(),
            display_name: None,
            lifecycle_state: pending.front().cloned().unwrap_or_default(),
            image_id: None,
        };
        self.state
            .get_mut()
            .instances
            .insert(id, Scripted { record, pending });
        self
    }

    /// An existing image whose fetches step through `states`.
    #[must_use]
    pub fn with_image<I, S>(mut self, id: ImageId, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pending: VecDeque<String> = states.into_iter().map(Into::into).collect();
        let record = Image {
            id: id.clone(),
            compartment_id: None,
            display_name: None,
            lifecycle_state: pending.front().cloned().unwrap_or_default(),
            operating_system: None,
            operating_system_version: None,
            launch_mode: None,
            time_created: Some(Utc::now()),
        };
        self.state
            .get_mut()
            .images
            .insert(id, Scripted { record, pending });
        self
    }

    /// Addresses of the VNIC attached to every launched instance.
    #[must_use]
    pub fn with_vnic_addresses(
        mut self,
        private_ip: impl Into<String>,
        public_ip: Option<String>,
    ) -> Self {
        self.state.get_mut().launch_vnic = Some((private_ip.into(), public_ip));
        self
    }

    /// Launch instances without any VNIC attachment.
    #[must_use]
    pub fn without_vnics(mut self) -> Self {
        self.state.get_mut().launch_vnic = None;
        self
    }

    #[must_use]
    pub fn with_windows_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.state.get_mut().credentials = Some(InstanceCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Publish a global schema with a single current version.
    #[must_use]
    pub fn with_global_schema(
        mut self,
        version_name: impl Into<String>,
        schema_data: SchemaData,
    ) -> Self {
        let id = GlobalCapabilitySchemaId::synthetic();
        let version_name = version_name.into();
        let state = self.state.get_mut();
        state.global_schemas.push(GlobalCapabilitySchemaSummary {
            id: id.clone(),
            display_name: Some("OCI.ComputeGlobalImageCapabilitySchema".to_string()),
            current_version_name: Some(version_name.clone()),
        });
        state.global_versions.push(GlobalCapabilitySchemaVersion {
            name: version_name,
            compute_global_image_capability_schema_id: id,
            display_name: None,
            schema_data,
        });
        self
    }

    /// A schema that already exists for an image.
    #[must_use]
    pub fn with_image_schema(mut self, schema: ImageCapabilitySchema) -> Self {
        self.state.get_mut().image_schemas.push(schema);
        self
    }

    /// Queue failures returned by the next calls of `operation`.
    #[must_use]
    pub fn failing<I>(mut self, operation: &'static str, errors: I) -> Self
    where
        I: IntoIterator<Item = ApiError>,
    {
        self.state
            .get_mut()
            .failures
            .entry(operation)
            .or_default()
            .extend(errors);
        self
    }

    /// Queue one failure for the next call of `operation`.
    pub async fn fail_next(&self, operation: &'static str, error: ApiError) {
        self.state
            .lock()
            .await
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Number of times `operation` was called, failed attempts included.
    pub async fn calls(&self, operation: &'static str) -> u32 {
        self.state
            .lock()
            .await
            .calls
            .get(operation)
            .copied()
            .unwrap_or(0)
    }

    /// Current record of an instance, without stepping its script.
    pub async fn instance(&self, id: &InstanceId) -> Option<Instance> {
        let state = self.state.lock().await;
        state.instances.get(id).map(|s| s.record.clone())
    }

    /// Current record of an image, without stepping its script.
    pub async fn image(&self, id: &ImageId) -> Option<Image> {
        let state = self.state.lock().await;
        state.images.get(id).map(|s| s.record.clone())
    }

    pub async fn image_schemas(&self) -> Vec<ImageCapabilitySchema> {
        self.state.lock().await.image_schemas.clone()
    }

    pub async fn launch_requests(&self) -> Vec<LaunchInstanceDetails> {
        self.state.lock().await.launch_requests.clone()
    }

    pub async fn create_image_requests(&self) -> Vec<CreateImageDetails> {
        self.state.lock().await.image_requests.clone()
    }

    pub async fn list_image_requests(&self) -> Vec<ListImagesRequest> {
        self.state.lock().await.list_image_requests.clone()
    }

    pub async fn schema_updates(&self) -> Vec<UpdateCapabilitySchemaDetails> {
        self.state.lock().await.schema_updates.clone()
    }
}

#[async_trait]
impl ComputeService for MockComputeService {
    async fn launch_instance(
        &self,
        details: &LaunchInstanceDetails,
        retry_token: &RetryToken,
    ) -> Result<Instance, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::LAUNCH_INSTANCE)?;

        let token = retry_token.to_string();
        if let Some(existing) = state
            .launched_by_token
            .get(&token)
            .and_then(|id| state.instances.get(id))
        {
            return Ok(existing.record.clone());
        }

        let id = InstanceId::synthetic();
        let InstanceSourceDetails::Image { image_id, .. } = &details.source_details;
        let record = Instance {
            id: id.clone(),
            display_name: details.display_name.clone(),
            lifecycle_state: "PROVISIONING".to_string(),
            image_id: Some(image_id.clone()),
        };
        let pending = state.instance_script.iter().cloned().collect();

        debug!(instance_id = %id, shape = %details.shape, "[MOCK] Launching instance");

        state.launch_requests.push(details.clone());
        state.launched_by_token.insert(token, id.clone());
        state.instances.insert(
            id.clone(),
            Scripted {
                record: record.clone(),
                pending,
            },
        );
        state.attach_vnic(&id);

        Ok(record)
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Instance, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::GET_INSTANCE)?;
        let scripted = state.instances.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(step(scripted, |i| &mut i.lifecycle_state))
    }

    async fn list_instances(
        &self,
        _compartment_id: &CompartmentId,
        display_name: Option<&str>,
    ) -> Result<Vec<Instance>, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::LIST_INSTANCES)?;
        Ok(state
            .instances
            .values()
            .map(|s| s.record.clone())
            .filter(|i| display_name.is_none() || i.display_name.as_deref() == display_name)
            .collect())
    }

    async fn terminate_instance(&self, id: &InstanceId) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::TERMINATE_INSTANCE)?;
        let script: VecDeque<String> = state.termination_script.iter().cloned().collect();
        let scripted = state.instances.get_mut(id).ok_or_else(|| not_found(id))?;
        scripted.pending = script;
        debug!(instance_id = %id, "[MOCK] Terminating instance");
        Ok(())
    }

    async fn list_images(&self, request: &ListImagesRequest) -> Result<Page<Image>, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::LIST_IMAGES)?;
        state.list_image_requests.push(request.clone());

        let index = match &request.page {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ApiError::service(400, "InvalidParameter", "bad page token"))?,
            None => 0,
        };
        let items = state.image_pages.get(index).cloned().unwrap_or_default();
        let next_page = (index + 1 < state.image_pages.len()).then(|| (index + 1).to_string());

        Ok(Page { items, next_page })
    }

    async fn get_image(&self, id: &ImageId) -> Result<Image, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::GET_IMAGE)?;
        let scripted = state.images.get_mut(id).ok_or_else(|| not_found(id))?;
        Ok(step(scripted, |i| &mut i.lifecycle_state))
    }

    async fn create_image(
        &self,
        details: &CreateImageDetails,
        retry_token: &RetryToken,
    ) -> Result<Image, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::CREATE_IMAGE)?;

        if !state.instances.contains_key(&details.instance_id) {
            return Err(not_found(&details.instance_id));
        }

        let token = retry_token.to_string();
        if let Some(existing) = state
            .created_by_token
            .get(&token)
            .and_then(|id| state.images.get(id))
        {
            return Ok(existing.record.clone());
        }

        let id = ImageId::synthetic();
        let record = Image {
            id: id.clone(),
            compartment_id: Some(details.compartment_id.clone()),
            display_name: Some(details.display_name.clone()),
            lifecycle_state: "PROVISIONING".to_string(),
            operating_system: None,
            operating_system_version: None,
            launch_mode: details.launch_mode,
            time_created: Some(Utc::now()),
        };
        let pending = state.image_script.iter().cloned().collect();

        debug!(image_id = %id, instance_id = %details.instance_id, "[MOCK] Creating image");

        state.image_requests.push(details.clone());
        state.created_by_token.insert(token, id.clone());
        state.images.insert(
            id,
            Scripted {
                record: record.clone(),
                pending,
            },
        );

        Ok(record)
    }

    async fn delete_image(&self, id: &ImageId) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::DELETE_IMAGE)?;
        state
            .images
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }

    async fn list_vnic_attachments(
        &self,
        _compartment_id: &CompartmentId,
        instance_id: &InstanceId,
    ) -> Result<Vec<VnicAttachment>, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::LIST_VNIC_ATTACHMENTS)?;
        Ok(state
            .attachments
            .get(instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_vnic(&self, id: &VnicId) -> Result<Vnic, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::GET_VNIC)?;
        state.vnics.get(id).cloned().ok_or_else(|| not_found(id))
    }

    async fn get_windows_initial_credentials(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceCredentials, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::GET_WINDOWS_INITIAL_CREDENTIALS)?;
        state
            .credentials
            .clone()
            .ok_or_else(|| not_found(format!("initial credentials of {instance_id}")))
    }

    async fn list_image_capability_schemas(
        &self,
        image_id: &ImageId,
    ) -> Result<Vec<ImageCapabilitySchema>, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::LIST_IMAGE_CAPABILITY_SCHEMAS)?;
        Ok(state
            .image_schemas
            .iter()
            .filter(|s| &s.image_id == image_id)
            .cloned()
            .collect())
    }

    async fn list_global_capability_schemas(
        &self,
    ) -> Result<Vec<GlobalCapabilitySchemaSummary>, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::LIST_GLOBAL_CAPABILITY_SCHEMAS)?;
        Ok(state.global_schemas.clone())
    }

    async fn get_global_capability_schema_version(
        &self,
        id: &GlobalCapabilitySchemaId,
        version_name: &str,
    ) -> Result<GlobalCapabilitySchemaVersion, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::GET_GLOBAL_CAPABILITY_SCHEMA_VERSION)?;
        state
            .global_versions
            .iter()
            .find(|v| &v.compute_global_image_capability_schema_id == id && v.name == version_name)
            .cloned()
            .ok_or_else(|| not_found(format!("{id} version {version_name}")))
    }

    async fn create_image_capability_schema(
        &self,
        details: &CreateCapabilitySchemaDetails,
        retry_token: &RetryToken,
    ) -> Result<ImageCapabilitySchema, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::CREATE_IMAGE_CAPABILITY_SCHEMA)?;

        let token = retry_token.to_string();
        if let Some(existing) = state
            .schemas_by_token
            .get(&token)
            .and_then(|id| state.image_schemas.iter().find(|s| &s.id == id))
        {
            return Ok(existing.clone());
        }

        let schema = ImageCapabilitySchema {
            id: ImageCapabilitySchemaId::synthetic(),
            image_id: details.image_id.clone(),
            compartment_id: Some(details.compartment_id.clone()),
            display_name: Some(details.display_name.clone()),
            compute_global_image_capability_schema_version_name: Some(
                details
                    .compute_global_image_capability_schema_version_name
                    .clone(),
            ),
            schema_data: details.schema_data.clone(),
            freeform_tags: FreeformTags::new(),
            defined_tags: DefinedTags::new(),
        };

        state.schemas_by_token.insert(token, schema.id.clone());
        state.image_schemas.push(schema.clone());
        Ok(schema)
    }

    async fn update_image_capability_schema(
        &self,
        id: &ImageCapabilitySchemaId,
        details: &UpdateCapabilitySchemaDetails,
    ) -> Result<ImageCapabilitySchema, ApiError> {
        let mut state = self.state.lock().await;
        state.enter(ops::UPDATE_IMAGE_CAPABILITY_SCHEMA)?;
        state.schema_updates.push(details.clone());

        let schema = state
            .image_schemas
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| not_found(id))?;
        schema.schema_data = details.schema_data.clone();
        schema.freeform_tags = details.freeform_tags.clone();
        schema.defined_tags = details.defined_tags.clone();
        Ok(schema.clone())
    }
}
