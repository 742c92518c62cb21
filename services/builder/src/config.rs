//! Build configuration.
//!
//! Loaded from a TOML file. Endpoint settings can be overridden from the
//! environment so credentials stay out of the file.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use smith_capability::{CapabilityOverride, LaunchMode, NicAttachmentType, SchemaError};
use smith_id::{CompartmentId, ImageId, NetworkSecurityGroupId, SubnetId};
use smith_reconcile::{BackoffPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use thiserror::Error;

use crate::compute::{DefinedTags, EndpointConfig, FreeformTags};

/// Environment variable overriding `endpoint.compute_url`.
pub const ENV_COMPUTE_URL: &str = "IMAGESMITH_COMPUTE_URL";

/// Environment variable overriding `endpoint.network_url`.
pub const ENV_NETWORK_URL: &str = "IMAGESMITH_NETWORK_URL";

/// Environment variable overriding `endpoint.auth_token`.
pub const ENV_AUTH_TOKEN: &str = "IMAGESMITH_AUTH_TOKEN";

/// Every problem found by [`Config::validate`].
#[derive(Debug, Error)]
#[error("invalid configuration:\n  - {}", .problems.join("\n  - "))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

/// Build configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Availability domain to launch the build instance in.
    pub availability_domain: String,

    /// Compartment of the build instance.
    pub compartment_id: CompartmentId,

    /// Compartment of the resulting image. Defaults to `compartment_id`.
    #[serde(default)]
    pub image_compartment_id: Option<CompartmentId>,

    /// Shape of the build instance.
    pub shape: String,

    /// Display name of the resulting image.
    pub image_name: String,

    /// Display name of the build instance.
    #[serde(default)]
    pub instance_name: Option<String>,

    /// Base image to launch from. Takes precedence over the filter.
    #[serde(default)]
    pub base_image_id: Option<ImageId>,

    /// Search criteria for the base image when no id is given.
    #[serde(default)]
    pub base_image_filter: Option<BaseImageFilter>,

    /// Subnet of the primary VNIC, unless `create_vnic_details.subnet_id` is set.
    #[serde(default)]
    pub subnet_id: Option<SubnetId>,

    /// Provision over the private IP instead of the public one.
    #[serde(default)]
    pub use_private_ip: bool,

    /// Public key installed as `ssh_authorized_keys`.
    #[serde(default)]
    pub ssh_public_key: Option<String>,

    /// Extra instance metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Base64 cloud-init user data.
    #[serde(default)]
    pub user_data: Option<String>,

    #[serde(default)]
    pub boot_volume_size_in_gbs: Option<u64>,

    #[serde(default)]
    pub instance_tags: FreeformTags,

    #[serde(default)]
    pub instance_defined_tags: DefinedTags,

    /// Freeform tags of the image and its capability schema.
    #[serde(default)]
    pub tags: FreeformTags,

    /// Defined tags of the image and its capability schema.
    #[serde(default)]
    pub defined_tags: DefinedTags,

    #[serde(default)]
    pub create_vnic_details: VnicConfig,

    #[serde(default)]
    pub instance_options: InstanceOptionsConfig,

    #[serde(default)]
    pub shape_config: ShapeConfig,

    /// Launch mode written to the image and its capability schema.
    #[serde(default)]
    pub launch_mode: Option<LaunchMode>,

    /// NIC attachment type written to the image capability schema.
    #[serde(default)]
    pub nic_attachment_type: Option<NicAttachmentType>,

    /// Additional enum-string capabilities written to the schema.
    #[serde(default)]
    pub capability_overrides: Vec<OverrideConfig>,

    /// Fetch the initial Windows credentials before provisioning.
    #[serde(default)]
    pub windows: bool,

    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub poll: PollConfig,
}

/// Base image search criteria.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseImageFilter {
    /// Defaults to the build compartment.
    #[serde(default)]
    pub compartment_id: Option<CompartmentId>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Regular expression the display name must match.
    #[serde(default)]
    pub display_name_search: Option<String>,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub operating_system_version: Option<String>,
    /// Defaults to the build shape.
    #[serde(default)]
    pub shape: Option<String>,
}

/// Primary VNIC settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VnicConfig {
    #[serde(default)]
    pub assign_public_ip: Option<bool>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub hostname_label: Option<String>,
    #[serde(default)]
    pub nsg_ids: Vec<NetworkSecurityGroupId>,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub skip_source_dest_check: Option<bool>,
    #[serde(default)]
    pub subnet_id: Option<SubnetId>,
    #[serde(default)]
    pub defined_tags: DefinedTags,
    #[serde(default)]
    pub freeform_tags: FreeformTags,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceOptionsConfig {
    #[serde(default)]
    pub are_legacy_imds_endpoints_disabled: Option<bool>,
}

/// Flexible shape sizing. Only sent when `ocpus` is set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShapeConfig {
    #[serde(default)]
    pub ocpus: Option<f32>,
    #[serde(default)]
    pub memory_in_gbs: Option<f32>,
    #[serde(default)]
    pub baseline_ocpu_utilization: Option<String>,
}

/// A custom capability written into the image schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverrideConfig {
    pub key: String,
    pub values: Vec<String>,
    pub default: String,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts per remote call, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,

    /// Cap on state fetches per wait; 0 means unlimited.
    #[serde(default)]
    pub max_iterations: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            max_iterations: 0,
        }
    }
}

impl Config {
    /// Load, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        config.apply_env_overrides_with(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Parse and apply defaults. Does not validate.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_defaults();
        Ok(config)
    }

    /// Fill in settings that default to other settings.
    pub fn apply_defaults(&mut self) {
        if self.image_compartment_id.is_none() {
            self.image_compartment_id = Some(self.compartment_id.clone());
        }

        if let Some(filter) = self.base_image_filter.as_mut() {
            if filter.compartment_id.is_none() {
                filter.compartment_id = Some(self.compartment_id.clone());
            }
            if filter.shape.is_none() {
                filter.shape = Some(self.shape.clone());
            }
        }

        if self.create_vnic_details.subnet_id.is_none() {
            self.create_vnic_details.subnet_id = self.subnet_id.clone();
        }
    }

    /// Override endpoint settings from `lookup`, usually the environment.
    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_COMPUTE_URL) {
            self.endpoint.compute_url = url;
        }
        if let Some(url) = lookup(ENV_NETWORK_URL) {
            self.endpoint.network_url = Some(url);
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN) {
            self.endpoint.auth_token = Some(token);
        }
    }

    /// Check the settings, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.image_name.trim().is_empty() {
            problems.push("image_name must not be empty".to_string());
        }
        if self.availability_domain.trim().is_empty() {
            problems.push("availability_domain must not be empty".to_string());
        }
        if self.shape.trim().is_empty() {
            problems.push("shape must not be empty".to_string());
        }

        if self.base_image_id.is_none() && self.base_image_filter.is_none() {
            problems.push("one of base_image_id or base_image_filter is required".to_string());
        }
        if let Some(pattern) = self
            .base_image_filter
            .as_ref()
            .and_then(|f| f.display_name_search.as_deref())
        {
            if let Err(e) = regex::Regex::new(pattern) {
                problems.push(format!(
                    "base_image_filter.display_name_search is not a valid regular expression: {e}"
                ));
            }
        }

        if self.create_vnic_details.subnet_id.is_none() && self.subnet_id.is_none() {
            problems.push("subnet_id (or create_vnic_details.subnet_id) is required".to_string());
        }

        if self.shape_config.ocpus.is_none()
            && (self.shape_config.memory_in_gbs.is_some()
                || self.shape_config.baseline_ocpu_utilization.is_some())
        {
            problems.push("shape_config.ocpus is required when shape_config is set".to_string());
        }

        if let Err(e) = self.capability_overrides() {
            problems.push(e.to_string());
        }

        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".to_string());
        }
        if self.poll.interval_secs == 0 {
            problems.push("poll.interval_secs must be at least 1".to_string());
        }

        if self.endpoint.compute_url.trim().is_empty() {
            problems.push(format!(
                "endpoint.compute_url is required (or set {ENV_COMPUTE_URL})"
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { problems })
        }
    }

    /// Compartment the image and its schema are created in.
    pub fn image_compartment_id(&self) -> &CompartmentId {
        self.image_compartment_id
            .as_ref()
            .unwrap_or(&self.compartment_id)
    }

    /// Display name of the per-image capability schema.
    pub fn schema_display_name(&self) -> String {
        format!("Default Image Capability Schema for {}", self.image_name)
    }

    /// Overrides applied to the image capability schema, in order.
    pub fn capability_overrides(&self) -> Result<Vec<CapabilityOverride>, SchemaError> {
        let mut overrides = Vec::new();

        if let Some(mode) = self.launch_mode {
            overrides.push(CapabilityOverride::launch_mode(mode));
        }
        if let Some(attachment) = self.nic_attachment_type {
            overrides.push(CapabilityOverride::nic_attachment_type(attachment));
        }
        for custom in &self.capability_overrides {
            overrides.push(CapabilityOverride::new(
                custom.key.clone(),
                custom.values.iter().cloned(),
                custom.default.clone(),
            )?);
        }

        Ok(overrides)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::with_max_attempts(self.retry.max_attempts)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const MINIMAL: &str = r#"
        availability_domain = "aaaa:PHX-AD-3"
        compartment_id = "ocid1.compartment.oc1..aaaa"
        shape = "VM.Standard2.1"
        image_name = "HelloWorld"
        base_image_id = "ocid1.image.oc1.phx.aaaa"
        subnet_id = "ocid1.subnet.oc1.phx.aaaa"

        [endpoint]
        compute_url = "https://iaas.us-phoenix-1.example.com"
    "#;

    #[test]
    fn test_minimal_config_is_valid() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.poll.max_iterations, 0);
        assert_eq!(config.image_compartment_id(), &config.compartment_id);
        assert_eq!(
            config.create_vnic_details.subnet_id.as_ref().map(|s| s.as_str()),
            Some("ocid1.subnet.oc1.phx.aaaa")
        );
    }

    #[test]
    fn test_filter_defaults() {
        let config = Config::from_toml_str(
            r#"
            availability_domain = "aaaa:PHX-AD-3"
            compartment_id = "ocid1.compartment.oc1..aaaa"
            shape = "VM.Standard2.1"
            image_name = "HelloWorld"
            subnet_id = "ocid1.subnet.oc1.phx.aaaa"

            [base_image_filter]
            operating_system = "Oracle Linux"
            "#,
        )
        .unwrap();

        let filter = config.base_image_filter.as_ref().unwrap();
        assert_eq!(filter.compartment_id.as_ref(), Some(&config.compartment_id));
        assert_eq!(filter.shape.as_deref(), Some("VM.Standard2.1"));
        assert_eq!(filter.operating_system.as_deref(), Some("Oracle Linux"));
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let config = Config::from_toml_str(
            r#"
            availability_domain = ""
            compartment_id = "ocid1.compartment.oc1..aaaa"
            shape = "VM.Standard.E4.Flex"
            image_name = ""

            [base_image_filter]
            display_name_search = "^Oracle-Linux-(7"

            [shape_config]
            memory_in_gbs = 16.0
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        let joined = err.problems.join("\n");
        assert!(joined.contains("image_name"));
        assert!(joined.contains("availability_domain"));
        assert!(joined.contains("display_name_search"));
        assert!(joined.contains("subnet_id"));
        assert!(joined.contains("shape_config.ocpus"));
        assert!(joined.contains("endpoint.compute_url"));
        assert_eq!(err.problems.len(), 6);
    }

    #[test]
    fn test_rejects_wrong_id_type() {
        let toml = MINIMAL.replace("ocid1.image.oc1.phx.aaaa", "ocid1.instance.oc1.phx.aaaa");
        assert!(Config::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::from_toml_str(MINIMAL).unwrap();
        config.apply_env_overrides_with(|key| match key {
            ENV_COMPUTE_URL => Some("http://127.0.0.1:9000".to_string()),
            ENV_AUTH_TOKEN => Some("secret".to_string()),
            _ => None,
        });

        assert_eq!(config.endpoint.compute_url, "http://127.0.0.1:9000");
        assert_eq!(config.endpoint.auth_token.as_deref(), Some("secret"));
        assert!(config.endpoint.network_url.is_none());
    }

    #[test]
    fn test_capability_overrides_in_order() {
        let toml = format!(
            "launch_mode = \"PARAVIRTUALIZED\"\nnic_attachment_type = \"VFIO\"\n{MINIMAL}\n\
             [[capability_overrides]]\nkey = \"Custom.Flavor\"\nvalues = [\"A\", \"B\"]\ndefault = \"B\"\n"
        );
        let config = Config::from_toml_str(&toml).unwrap();

        let keys: Vec<String> = config
            .capability_overrides()
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(
            keys,
            vec!["Compute.LaunchMode", "Network.AttachmentType", "Custom.Flavor"]
        );
    }

    #[test]
    fn test_schema_display_name() {
        let config = Config::from_toml_str(MINIMAL).unwrap();
        assert_eq!(
            config.schema_display_name(),
            "Default Image Capability Schema for HelloWorld"
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.image_name, "HelloWorld");
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"shape = 5").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }
}
