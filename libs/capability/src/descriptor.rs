//! Capability descriptor variants.
//!
//! On the wire a descriptor is a JSON object discriminated by
//! `descriptorType`. Known variants deserialize into typed payloads; anything
//! else is kept verbatim as [`CapabilityDescriptor::Unrecognized`] so callers
//! can refuse it with the offending key in hand instead of silently dropping it.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Wire discriminant field.
pub const DESCRIPTOR_TYPE_FIELD: &str = "descriptorType";

/// Who owns a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DescriptorSource {
    /// Inherited from the provider's global schema.
    Global,

    /// Owned by a specific image.
    Image,
}

impl std::fmt::Display for DescriptorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptorSource::Global => write!(f, "GLOBAL"),
            DescriptorSource::Image => write!(f, "IMAGE"),
        }
    }
}

/// A yes/no capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanDescriptor {
    pub source: DescriptorSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<bool>,
}

/// A capability chosen from a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumStringDescriptor {
    pub source: DescriptorSource,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// A capability chosen from a list of integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumIntegerDescriptor {
    pub source: DescriptorSource,
    #[serde(default)]
    pub values: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<i64>,
}

/// One entry of a capability schema.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityDescriptor {
    Boolean(BooleanDescriptor),
    EnumString(EnumStringDescriptor),
    EnumInteger(EnumIntegerDescriptor),

    /// A descriptor type this crate does not model, kept as received.
    Unrecognized {
        descriptor_type: String,
        raw: serde_json::Value,
    },
}

impl CapabilityDescriptor {
    /// Wire name of this descriptor's type.
    pub fn descriptor_type(&self) -> &str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::EnumString(_) => "enumstring",
            Self::EnumInteger(_) => "enuminteger",
            Self::Unrecognized {
                descriptor_type, ..
            } => descriptor_type,
        }
    }

    /// The owning source, for recognized variants.
    pub fn source(&self) -> Option<DescriptorSource> {
        match self {
            Self::Boolean(d) => Some(d.source),
            Self::EnumString(d) => Some(d.source),
            Self::EnumInteger(d) => Some(d.source),
            Self::Unrecognized { .. } => None,
        }
    }

    /// Deep copy relabeled with `source`.
    ///
    /// Returns `None` for unrecognized variants, whose source field cannot be
    /// rewritten safely.
    pub fn with_source(&self, source: DescriptorSource) -> Option<Self> {
        match self {
            Self::Boolean(d) => Some(Self::Boolean(BooleanDescriptor {
                source,
                default_value: d.default_value,
            })),
            Self::EnumString(d) => Some(Self::EnumString(EnumStringDescriptor {
                source,
                values: d.values.clone(),
                default_value: d.default_value.clone(),
            })),
            Self::EnumInteger(d) => Some(Self::EnumInteger(EnumIntegerDescriptor {
                source,
                values: d.values.clone(),
                default_value: d.default_value,
            })),
            Self::Unrecognized { .. } => None,
        }
    }
}

impl Serialize for CapabilityDescriptor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        #[serde(tag = "descriptorType")]
        enum Tagged<'a> {
            #[serde(rename = "boolean")]
            Boolean(&'a BooleanDescriptor),
            #[serde(rename = "enumstring")]
            EnumString(&'a EnumStringDescriptor),
            #[serde(rename = "enuminteger")]
            EnumInteger(&'a EnumIntegerDescriptor),
        }

        match self {
            Self::Boolean(d) => Tagged::Boolean(d).serialize(serializer),
            Self::EnumString(d) => Tagged::EnumString(d).serialize(serializer),
            Self::EnumInteger(d) => Tagged::EnumInteger(d).serialize(serializer),
            Self::Unrecognized { raw, .. } => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for CapabilityDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let descriptor_type = raw
            .get(DESCRIPTOR_TYPE_FIELD)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| de::Error::missing_field(DESCRIPTOR_TYPE_FIELD))?
            .to_string();

        match descriptor_type.as_str() {
            "boolean" => serde_json::from_value(raw)
                .map(Self::Boolean)
                .map_err(de::Error::custom),
            "enumstring" => serde_json::from_value(raw)
                .map(Self::EnumString)
                .map_err(de::Error::custom),
            "enuminteger" => serde_json::from_value(raw)
                .map(Self::EnumInteger)
                .map_err(de::Error::custom),
            _ => Ok(Self::Unrecognized {
                descriptor_type,
                raw,
            }),
        }
    }
}
