//! Typed id definitions for every resource the builder touches.
//!
//! Each id type checks the resource-type segment of the provider id so
//! mixing up resources fails at parse time rather than at the remote API.

use crate::define_ocid;
use crate::IdError;

/// Version segment every provider id starts with.
#[doc(hidden)]
pub const OCID_VERSION: &str = "ocid1";

/// Validate the shape of a provider id against an expected resource type.
#[doc(hidden)]
pub fn validate_ocid(s: &str, resource_type: &'static str) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }

    let segments: Vec<&str> = s.split('.').collect();
    if segments[0] != OCID_VERSION {
        return Err(IdError::UnsupportedVersion {
            expected: OCID_VERSION,
            actual: segments[0].to_string(),
        });
    }

    // version, resource type, realm, ..., unique id
    if segments.len() < 4 {
        return Err(IdError::InvalidFormat {
            message: format!("expected at least 4 segments, got {}", segments.len()),
        });
    }

    if segments[1] != resource_type {
        return Err(IdError::InvalidResourceType {
            expected: resource_type,
            actual: segments[1].to_string(),
        });
    }

    if segments[2].is_empty() {
        return Err(IdError::InvalidFormat {
            message: "realm segment is empty".to_string(),
        });
    }

    let unique = segments[segments.len() - 1];
    if unique.is_empty() || !unique.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(IdError::InvalidFormat {
            message: format!("invalid unique segment '{unique}'"),
        });
    }

    Ok(())
}

// =============================================================================
// Compute
// =============================================================================

define_ocid!(InstanceId, "instance");
define_ocid!(ImageId, "image");
define_ocid!(ImageCapabilitySchemaId, "computeimagecapabilityschema");
define_ocid!(GlobalCapabilitySchemaId, "computeglobalimagecapabilityschema");

// =============================================================================
// Networking
// =============================================================================

define_ocid!(VnicId, "vnic");
define_ocid!(VnicAttachmentId, "vnicattachment");
define_ocid!(SubnetId, "subnet");
define_ocid!(NetworkSecurityGroupId, "networksecuritygroup");

// =============================================================================
// Identity
// =============================================================================

define_ocid!(CompartmentId, "compartment");

// =============================================================================
// Retry Tokens
// =============================================================================

/// Idempotency token attached to create calls.
///
/// Minted once per logical create and reused by every retry attempt, so the
/// control plane can collapse duplicates produced by retried requests.
/// Tokens are ULID based and therefore time ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RetryToken(crate::Ulid);

impl RetryToken {
    /// Creates a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self(crate::Ulid::new())
    }

    /// Parses a token previously rendered with `Display`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        s.parse::<crate::Ulid>()
            .map(Self)
            .map_err(|e| IdError::InvalidUlid(e.to_string()))
    }

    /// Returns the timestamp portion of the token in milliseconds.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Default for RetryToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RetryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RetryToken {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_instance_id_parse() {
        let id: InstanceId = "ocid1.instance.oc1.phx.anyhqljt4bl3u5a".parse().unwrap();
        assert_eq!(id.as_str(), "ocid1.instance.oc1.phx.anyhqljt4bl3u5a");
        assert_eq!(id.to_string(), "ocid1.instance.oc1.phx.anyhqljt4bl3u5a");
    }

    #[test]
    fn test_empty_region_segment_is_accepted() {
        let id: CompartmentId = "ocid1.compartment.oc1..aaaaaaaaq7ay5hgu".parse().unwrap();
        assert_eq!(id.as_str(), "ocid1.compartment.oc1..aaaaaaaaq7ay5hgu");
    }

    #[test]
    fn test_wrong_resource_type() {
        let result: Result<ImageId, _> = "ocid1.instance.oc1..aaaa".parse();
        let err = result.unwrap_err();
        assert!(err.is_type_mismatch());
        assert!(matches!(
            err,
            IdError::InvalidResourceType {
                expected: "image",
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_version() {
        let result: Result<ImageId, _> = "ocd1.image.oc1..aaaa".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::UnsupportedVersion { .. }
        ));
    }

    #[test]
    fn test_empty() {
        let result: Result<SubnetId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_too_few_segments() {
        let result: Result<VnicId, _> = "ocid1.vnic".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn test_missing_unique_segment() {
        let result: Result<VnicId, _> = "ocid1.vnic.oc1.".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::InvalidFormat { .. }
        ));
    }

    #[test]
    fn test_synthetic_ids_parse_back() {
        let id = ImageCapabilitySchemaId::synthetic();
        let parsed: ImageCapabilitySchemaId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(id, ImageCapabilitySchemaId::synthetic());
    }

    #[test]
    fn test_json_roundtrip() {
        let id = ImageId::synthetic();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ImageId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_json_rejects_foreign_id() {
        let json = "\"ocid1.instance.oc1..aaaa\"";
        let parsed: Result<ImageId, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_retry_tokens_are_time_ordered() {
        let a = RetryToken::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RetryToken::new();
        assert!(a < b);

        let parsed: RetryToken = a.to_string().parse().unwrap();
        assert_eq!(a, parsed);
    }

    #[test]
    fn test_all_resource_types_unique() {
        let types = vec![
            InstanceId::RESOURCE_TYPE,
            ImageId::RESOURCE_TYPE,
            ImageCapabilitySchemaId::RESOURCE_TYPE,
            GlobalCapabilitySchemaId::RESOURCE_TYPE,
            VnicId::RESOURCE_TYPE,
            VnicAttachmentId::RESOURCE_TYPE,
            SubnetId::RESOURCE_TYPE,
            NetworkSecurityGroupId::RESOURCE_TYPE,
            CompartmentId::RESOURCE_TYPE,
        ];

        let unique: std::collections::HashSet<_> = types.iter().collect();
        assert_eq!(types.len(), unique.len(), "Duplicate resource types found!");
    }

    proptest! {
        #[test]
        fn prop_valid_ids_roundtrip(unique in "[a-z0-9]{1,40}", region in "[a-z0-9-]{0,12}") {
            let raw = format!("ocid1.image.oc1.{region}.{unique}");
            let id = ImageId::parse(&raw).unwrap();
            prop_assert_eq!(id.to_string(), raw);
        }
    }
}
