//! Translation of the build configuration into launch and image requests.

use std::collections::BTreeMap;

use smith_id::{ImageId, InstanceId};

use crate::compute::{
    CreateImageDetails, CreateVnicDetails, InstanceOptions, InstanceSourceDetails,
    LaunchInstanceDetails, LaunchShapeConfig,
};
use crate::config::Config;

/// Metadata key holding the authorized public key.
pub const SSH_AUTHORIZED_KEYS: &str = "ssh_authorized_keys";

/// Metadata key holding cloud-init user data.
pub const USER_DATA: &str = "user_data";

/// Instance metadata: the public key, then user metadata, then user data.
///
/// Later entries win, so user metadata may replace the key and `user_data`
/// always reflects the configured value.
pub fn instance_metadata(config: &Config, public_key: Option<&str>) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    if let Some(key) = public_key {
        metadata.insert(SSH_AUTHORIZED_KEYS.to_string(), key.to_string());
    }
    metadata.extend(
        config
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    if let Some(user_data) = config.user_data.as_deref().filter(|d| !d.is_empty()) {
        metadata.insert(USER_DATA.to_string(), user_data.to_string());
    }

    metadata
}

/// Launch request for the build instance.
pub fn launch_details(
    config: &Config,
    image_id: ImageId,
    public_key: Option<&str>,
) -> LaunchInstanceDetails {
    let vnic = &config.create_vnic_details;
    let create_vnic_details = CreateVnicDetails {
        assign_public_ip: vnic.assign_public_ip,
        display_name: vnic.display_name.clone(),
        hostname_label: vnic.hostname_label.clone(),
        nsg_ids: vnic.nsg_ids.clone(),
        private_ip: vnic.private_ip.clone(),
        skip_source_dest_check: vnic.skip_source_dest_check,
        subnet_id: vnic.subnet_id.clone().or_else(|| config.subnet_id.clone()),
        defined_tags: vnic.defined_tags.clone(),
        freeform_tags: vnic.freeform_tags.clone(),
    };

    let instance_options = config
        .instance_options
        .are_legacy_imds_endpoints_disabled
        .map(|disabled| InstanceOptions {
            are_legacy_imds_endpoints_disabled: disabled,
        });

    let shape_config = config.shape_config.ocpus.map(|ocpus| LaunchShapeConfig {
        ocpus,
        memory_in_gbs: config.shape_config.memory_in_gbs,
        baseline_ocpu_utilization: config.shape_config.baseline_ocpu_utilization.clone(),
    });

    LaunchInstanceDetails {
        availability_domain: config.availability_domain.clone(),
        compartment_id: config.compartment_id.clone(),
        shape: config.shape.clone(),
        display_name: config.instance_name.clone(),
        source_details: InstanceSourceDetails::Image {
            image_id,
            boot_volume_size_in_gbs: config.boot_volume_size_in_gbs.filter(|size| *size != 0),
        },
        create_vnic_details,
        metadata: instance_metadata(config, public_key),
        freeform_tags: config.instance_tags.clone(),
        defined_tags: config.instance_defined_tags.clone(),
        instance_options,
        shape_config,
    }
}

/// Image request snapshotting `instance_id`.
pub fn image_details(config: &Config, instance_id: InstanceId) -> CreateImageDetails {
    CreateImageDetails {
        compartment_id: config.image_compartment_id().clone(),
        instance_id,
        display_name: config.image_name.clone(),
        freeform_tags: config.tags.clone(),
        defined_tags: config.defined_tags.clone(),
        launch_mode: config.launch_mode,
    }
}
