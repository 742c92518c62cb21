//! Wire types of the compute service.
//!
//! Field names follow the service's camelCase JSON. Optional request fields
//! are omitted when unset so the service applies its own defaults.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smith_capability::{LaunchMode, SchemaData};
use smith_id::{
    CompartmentId, GlobalCapabilitySchemaId, ImageCapabilitySchemaId, ImageId, InstanceId,
    NetworkSecurityGroupId, SubnetId, VnicAttachmentId, VnicId,
};

/// Free-form key/value tags.
pub type FreeformTags = BTreeMap<String, String>;

/// Namespaced tags: namespace -> key -> value.
pub type DefinedTags = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

// =============================================================================
// Instances
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    #[serde(default)]
    pub display_name: Option<String>,
    pub lifecycle_state: String,
    #[serde(default)]
    pub image_id: Option<ImageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInstanceDetails {
    pub availability_domain: String,
    pub compartment_id: CompartmentId,
    pub shape: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub source_details: InstanceSourceDetails,
    pub create_vnic_details: CreateVnicDetails,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: FreeformTags,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defined_tags: DefinedTags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_options: Option<InstanceOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_config: Option<LaunchShapeConfig>,
}

/// Where the boot volume comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "sourceType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum InstanceSourceDetails {
    Image {
        image_id: ImageId,
        #[serde(
            rename = "bootVolumeSizeInGBs",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        boot_volume_size_in_gbs: Option<u64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVnicDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_public_ip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nsg_ids: Vec<NetworkSecurityGroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_source_dest_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<SubnetId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defined_tags: DefinedTags,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: FreeformTags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOptions {
    pub are_legacy_imds_endpoints_disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchShapeConfig {
    pub ocpus: f32,
    #[serde(
        rename = "memoryInGBs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_in_gbs: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_ocpu_utilization: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCredentials {
    pub username: String,
    pub password: String,
}

// =============================================================================
// Images
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: ImageId,
    #[serde(default)]
    pub compartment_id: Option<CompartmentId>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub lifecycle_state: String,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub operating_system_version: Option<String>,
    #[serde(default)]
    pub launch_mode: Option<LaunchMode>,
    #[serde(default)]
    pub time_created: Option<DateTime<Utc>>,
}

/// Query parameters of an image listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListImagesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compartment_id: Option<CompartmentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateImageDetails {
    pub compartment_id: CompartmentId,
    pub instance_id: InstanceId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: FreeformTags,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defined_tags: DefinedTags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_mode: Option<LaunchMode>,
}

// =============================================================================
// Networking
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnicAttachment {
    pub id: VnicAttachmentId,
    pub instance_id: InstanceId,
    #[serde(default)]
    pub vnic_id: Option<VnicId>,
    pub lifecycle_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vnic {
    pub id: VnicId,
    #[serde(default)]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
}

// =============================================================================
// Capability schemas
// =============================================================================

/// Per-image capability schema record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCapabilitySchema {
    pub id: ImageCapabilitySchemaId,
    pub image_id: ImageId,
    #[serde(default)]
    pub compartment_id: Option<CompartmentId>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub compute_global_image_capability_schema_version_name: Option<String>,
    #[serde(default)]
    pub schema_data: SchemaData,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: FreeformTags,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defined_tags: DefinedTags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCapabilitySchemaSummary {
    pub id: GlobalCapabilitySchemaId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub current_version_name: Option<String>,
}

/// One published version of a global schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCapabilitySchemaVersion {
    pub name: String,
    pub compute_global_image_capability_schema_id: GlobalCapabilitySchemaId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub schema_data: SchemaData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCapabilitySchemaDetails {
    pub compartment_id: CompartmentId,
    pub image_id: ImageId,
    pub display_name: String,
    pub compute_global_image_capability_schema_version_name: String,
    pub schema_data: SchemaData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCapabilitySchemaDetails {
    pub schema_data: SchemaData,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: FreeformTags,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defined_tags: DefinedTags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_details_wire_format() {
        let image_id = ImageId::parse("ocid1.image.oc1.phx.aaaa").unwrap();
        let details = InstanceSourceDetails::Image {
            image_id,
            boot_volume_size_in_gbs: Some(100),
        };
        assert_eq!(
            serde_json::to_value(&details).unwrap(),
            json!({
                "sourceType": "image",
                "imageId": "ocid1.image.oc1.phx.aaaa",
                "bootVolumeSizeInGBs": 100
            })
        );
    }

    #[test]
    fn test_list_images_query_omits_unset() {
        let request = ListImagesRequest {
            operating_system: Some("Oracle Linux".to_string()),
            sort_by: Some("TIMECREATED".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"operatingSystem": "Oracle Linux", "sortBy": "TIMECREATED"})
        );
    }

    #[test]
    fn test_image_decodes_service_payload() {
        let image: Image = serde_json::from_value(json!({
            "id": "ocid1.image.oc1.phx.bbbb",
            "displayName": "Oracle-Linux-7.8-2020.05.26-0",
            "lifecycleState": "AVAILABLE",
            "launchMode": "PARAVIRTUALIZED",
            "timeCreated": "2020-05-26T19:00:00.000Z",
            "sizeInMBs": 47694
        }))
        .unwrap();
        assert_eq!(image.launch_mode, Some(LaunchMode::Paravirtualized));
        assert_eq!(image.lifecycle_state, "AVAILABLE");
        assert!(image.time_created.is_some());
    }
}
