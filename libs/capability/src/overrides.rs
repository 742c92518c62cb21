//! Image-specific capability overrides.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::descriptor::{CapabilityDescriptor, DescriptorSource, EnumStringDescriptor};
use crate::error::SchemaError;

/// Capability key for the instance launch mode.
pub const LAUNCH_MODE_KEY: &str = "Compute.LaunchMode";

/// Capability key for the VNIC attachment type.
pub const NIC_ATTACHMENT_TYPE_KEY: &str = "Network.AttachmentType";

/// How instances launched from the image are virtualized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchMode {
    Native,
    Emulated,
    Paravirtualized,
    Custom,
}

impl LaunchMode {
    pub const ALL: [LaunchMode; 4] = [
        LaunchMode::Native,
        LaunchMode::Emulated,
        LaunchMode::Paravirtualized,
        LaunchMode::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Native => "NATIVE",
            LaunchMode::Emulated => "EMULATED",
            LaunchMode::Paravirtualized => "PARAVIRTUALIZED",
            LaunchMode::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchMode {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchemaError::UnknownValue {
                kind: "launch mode",
                value: s.to_string(),
            })
    }
}

/// Emulation type of the primary VNIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NicAttachmentType {
    E1000,
    Vfio,
    Paravirtualized,
}

impl NicAttachmentType {
    pub const ALL: [NicAttachmentType; 3] = [
        NicAttachmentType::E1000,
        NicAttachmentType::Vfio,
        NicAttachmentType::Paravirtualized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NicAttachmentType::E1000 => "E1000",
            NicAttachmentType::Vfio => "VFIO",
            NicAttachmentType::Paravirtualized => "PARAVIRTUALIZED",
        }
    }
}

impl fmt::Display for NicAttachmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NicAttachmentType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SchemaError::UnknownValue {
                kind: "NIC attachment type",
                value: s.to_string(),
            })
    }
}

/// A custom enum-string field written into an image schema.
///
/// Applying an override replaces whatever descriptor the key held before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityOverride {
    pub key: String,
    pub values: Vec<String>,
    pub default_value: String,
}

impl CapabilityOverride {
    /// Arbitrary override. The default must be one of `values`.
    pub fn new<I, S>(
        key: impl Into<String>,
        values: I,
        default_value: impl Into<String>,
    ) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let default_value = default_value.into();

        if !values.contains(&default_value) {
            return Err(SchemaError::DefaultNotAllowed {
                key,
                default: default_value,
                values,
            });
        }

        Ok(Self {
            key,
            values,
            default_value,
        })
    }

    /// `Compute.LaunchMode`, allowing every launch mode and defaulting to `mode`.
    pub fn launch_mode(mode: LaunchMode) -> Self {
        Self {
            key: LAUNCH_MODE_KEY.to_string(),
            values: LaunchMode::ALL.iter().map(|m| m.as_str().to_string()).collect(),
            default_value: mode.as_str().to_string(),
        }
    }

    /// `Network.AttachmentType`, allowing every attachment type and
    /// defaulting to `attachment`.
    pub fn nic_attachment_type(attachment: NicAttachmentType) -> Self {
        Self {
            key: NIC_ATTACHMENT_TYPE_KEY.to_string(),
            values: NicAttachmentType::ALL
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            default_value: attachment.as_str().to_string(),
        }
    }

    /// The `IMAGE`-sourced descriptor this override writes.
    pub fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::EnumString(EnumStringDescriptor {
            source: DescriptorSource::Image,
            values: self.values.clone(),
            default_value: Some(self.default_value.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_mode_override() {
        let o = CapabilityOverride::launch_mode(LaunchMode::Emulated);
        assert_eq!(o.key, "Compute.LaunchMode");
        assert_eq!(
            o.values,
            vec!["NATIVE", "EMULATED", "PARAVIRTUALIZED", "CUSTOM"]
        );
        assert_eq!(o.default_value, "EMULATED");
    }

    #[test]
    fn test_nic_attachment_override() {
        let o = CapabilityOverride::nic_attachment_type(NicAttachmentType::Vfio);
        assert_eq!(o.key, "Network.AttachmentType");
        assert_eq!(o.values, vec!["E1000", "VFIO", "PARAVIRTUALIZED"]);
        assert_eq!(o.default_value, "VFIO");

        match o.descriptor() {
            CapabilityDescriptor::EnumString(d) => {
                assert_eq!(d.source, DescriptorSource::Image);
                assert_eq!(d.default_value.as_deref(), Some("VFIO"));
            }
            other => panic!("unexpected descriptor {other:?}"),
        }
    }

    #[test]
    fn test_custom_override_default_must_be_allowed() {
        let err = CapabilityOverride::new("Custom.Key", ["A", "B"], "C").unwrap_err();
        assert!(matches!(err, SchemaError::DefaultNotAllowed { .. }));

        let ok = CapabilityOverride::new("Custom.Key", ["A", "B"], "B").unwrap();
        assert_eq!(ok.default_value, "B");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            "paravirtualized".parse::<LaunchMode>().unwrap(),
            LaunchMode::Paravirtualized
        );
        assert_eq!(
            "E1000".parse::<NicAttachmentType>().unwrap(),
            NicAttachmentType::E1000
        );
        assert!("ISCSI".parse::<LaunchMode>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        for mode in LaunchMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
        for t in NicAttachmentType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{t}\""));
        }
    }
}
