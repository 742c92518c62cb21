//! REST client for the compute and virtual network services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use smith_id::{
    CompartmentId, GlobalCapabilitySchemaId, ImageCapabilitySchemaId, ImageId, InstanceId,
    RetryToken, VnicId,
};
use tracing::debug;

use super::error::{ApiError, ErrorBody};
use super::model::*;
use super::{ops, ComputeService};

/// API version path segment.
const API_VERSION: &str = "20160918";

/// Idempotency token header on create calls.
pub const RETRY_TOKEN_HEADER: &str = "opc-retry-token";

/// Pagination cursor header on list responses.
pub const NEXT_PAGE_HEADER: &str = "opc-next-page";

/// Request id header on every response.
pub const REQUEST_ID_HEADER: &str = "opc-request-id";

fn default_request_timeout_secs() -> u64 {
    60
}

/// Where and how to reach the service.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Compute service base URL.
    #[serde(default)]
    pub compute_url: String,

    /// Virtual network service base URL. Defaults to the compute URL.
    #[serde(default)]
    pub network_url: Option<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            compute_url: String::new(),
            network_url: None,
            auth_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// [`ComputeService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpComputeClient {
    client: reqwest::Client,
    compute_url: String,
    network_url: String,
}

impl HttpComputeClient {
    /// Create a client for `endpoint`.
    pub fn new(endpoint: &EndpointConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &endpoint.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ApiError::Config(format!("invalid auth token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(endpoint.request_timeout_secs))
            .build()?;

        let compute_url = endpoint.compute_url.trim_end_matches('/').to_string();
        let network_url = endpoint
            .network_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| compute_url.clone());

        Ok(Self {
            client,
            compute_url,
            network_url,
        })
    }

    fn compute(&self, path: &str) -> String {
        format!("{}/{API_VERSION}{path}", self.compute_url)
    }

    fn network(&self, path: &str) -> String {
        format!("{}/{API_VERSION}{path}", self.network_url)
    }

    /// Send `request`, turning non-success statuses into service errors.
    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "Compute API response");

        if status.is_success() {
            Ok(response)
        } else {
            Err(Self::service_error(response).await)
        }
    }

    async fn service_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let opc_request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        let parsed: Option<ErrorBody> = serde_json::from_str(&body).ok();
        let (code, message) = match parsed {
            Some(ErrorBody { code, message }) => (code, message),
            None => (None, None),
        };

        ApiError::Service {
            status: status.as_u16(),
            code: code.unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .replace(' ', "")
            }),
            message: message.unwrap_or(body),
            opc_request_id,
        }
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = self.send(operation, request).await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ComputeService for HttpComputeClient {
    async fn launch_instance(
        &self,
        details: &LaunchInstanceDetails,
        retry_token: &RetryToken,
    ) -> Result<Instance, ApiError> {
        let request = self
            .client
            .post(self.compute("/instances/"))
            .header(RETRY_TOKEN_HEADER, retry_token.to_string())
            .json(details);
        self.get_json(ops::LAUNCH_INSTANCE, request).await
    }

    async fn get_instance(&self, id: &InstanceId) -> Result<Instance, ApiError> {
        let request = self.client.get(self.compute(&format!("/instances/{id}")));
        self.get_json(ops::GET_INSTANCE, request).await
    }

    async fn list_instances(
        &self,
        compartment_id: &CompartmentId,
        display_name: Option<&str>,
    ) -> Result<Vec<Instance>, ApiError> {
        let mut request = self
            .client
            .get(self.compute("/instances/"))
            .query(&[("compartmentId", compartment_id.as_str())]);
        if let Some(name) = display_name {
            request = request.query(&[("displayName", name)]);
        }
        self.get_json(ops::LIST_INSTANCES, request).await
    }

    async fn terminate_instance(&self, id: &InstanceId) -> Result<(), ApiError> {
        let request = self.client.delete(self.compute(&format!("/instances/{id}")));
        self.send(ops::TERMINATE_INSTANCE, request).await?;
        Ok(())
    }

    async fn list_images(&self, query: &ListImagesRequest) -> Result<Page<Image>, ApiError> {
        let request = self.client.get(self.compute("/images")).query(query);
        let response = self.send(ops::LIST_IMAGES, request).await?;
        let next_page = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let items = Self::decode(response).await?;
        Ok(Page { items, next_page })
    }

    async fn get_image(&self, id: &ImageId) -> Result<Image, ApiError> {
        let request = self.client.get(self.compute(&format!("/images/{id}")));
        self.get_json(ops::GET_IMAGE, request).await
    }

    async fn create_image(
        &self,
        details: &CreateImageDetails,
        retry_token: &RetryToken,
    ) -> Result<Image, ApiError> {
        let request = self
            .client
            .post(self.compute("/images"))
            .header(RETRY_TOKEN_HEADER, retry_token.to_string())
            .json(details);
        self.get_json(ops::CREATE_IMAGE, request).await
    }

    async fn delete_image(&self, id: &ImageId) -> Result<(), ApiError> {
        let request = self.client.delete(self.compute(&format!("/images/{id}")));
        self.send(ops::DELETE_IMAGE, request).await?;
        Ok(())
    }

    async fn list_vnic_attachments(
        &self,
        compartment_id: &CompartmentId,
        instance_id: &InstanceId,
    ) -> Result<Vec<VnicAttachment>, ApiError> {
        let request = self.client.get(self.compute("/vnicAttachments/")).query(&[
            ("compartmentId", compartment_id.as_str()),
            ("instanceId", instance_id.as_str()),
        ]);
        self.get_json(ops::LIST_VNIC_ATTACHMENTS, request).await
    }

    async fn get_vnic(&self, id: &VnicId) -> Result<Vnic, ApiError> {
        let request = self.client.get(self.network(&format!("/vnics/{id}")));
        self.get_json(ops::GET_VNIC, request).await
    }

    async fn get_windows_initial_credentials(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceCredentials, ApiError> {
        let request = self
            .client
            .get(self.compute(&format!("/instances/{instance_id}/initialCredentials")));
        self.get_json(ops::GET_WINDOWS_INITIAL_CREDENTIALS, request)
            .await
    }

    async fn list_image_capability_schemas(
        &self,
        image_id: &ImageId,
    ) -> Result<Vec<ImageCapabilitySchema>, ApiError> {
        let request = self
            .client
            .get(self.compute("/computeImageCapabilitySchemas"))
            .query(&[("imageId", image_id.as_str())]);
        self.get_json(ops::LIST_IMAGE_CAPABILITY_SCHEMAS, request)
            .await
    }

    async fn list_global_capability_schemas(
        &self,
    ) -> Result<Vec<GlobalCapabilitySchemaSummary>, ApiError> {
        let request = self
            .client
            .get(self.compute("/computeGlobalImageCapabilitySchemas"));
        self.get_json(ops::LIST_GLOBAL_CAPABILITY_SCHEMAS, request)
            .await
    }

    async fn get_global_capability_schema_version(
        &self,
        id: &GlobalCapabilitySchemaId,
        version_name: &str,
    ) -> Result<GlobalCapabilitySchemaVersion, ApiError> {
        let request = self.client.get(self.compute(&format!(
            "/computeGlobalImageCapabilitySchemas/{id}/versions/{version_name}"
        )));
        self.get_json(ops::GET_GLOBAL_CAPABILITY_SCHEMA_VERSION, request)
            .await
    }

    async fn create_image_capability_schema(
        &self,
        details: &CreateCapabilitySchemaDetails,
        retry_token: &RetryToken,
    ) -> Result<ImageCapabilitySchema, ApiError> {
        let request = self
            .client
            .post(self.compute("/computeImageCapabilitySchemas"))
            .header(RETRY_TOKEN_HEADER, retry_token.to_string())
            .json(details);
        self.get_json(ops::CREATE_IMAGE_CAPABILITY_SCHEMA, request)
            .await
    }

    async fn update_image_capability_schema(
        &self,
        id: &ImageCapabilitySchemaId,
        details: &UpdateCapabilitySchemaDetails,
    ) -> Result<ImageCapabilitySchema, ApiError> {
        let request = self
            .client
            .put(self.compute(&format!("/computeImageCapabilitySchemas/{id}")))
            .json(details);
        self.get_json(ops::UPDATE_IMAGE_CAPABILITY_SCHEMA, request)
            .await
    }
}
