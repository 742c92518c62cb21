//! Image capability schemas.
//!
//! A capability schema maps capability names (`Compute.LaunchMode`,
//! `Network.AttachmentType`, ...) to descriptors that list the allowed values
//! and the default for an image. The provider publishes a read-only global
//! schema; every image gets its own copy relabeled from `GLOBAL` to `IMAGE`
//! and then adjusted with image-specific overrides.
//!
//! ```
//! use smith_capability::{CapabilityOverride, LaunchMode, SchemaData};
//!
//! let global: SchemaData = serde_json::from_str(
//!     r#"{"Storage.Iscsi": {"descriptorType": "boolean", "source": "GLOBAL", "defaultValue": true}}"#,
//! ).unwrap();
//!
//! let mut image = global.to_image_schema().unwrap();
//! image.apply_override(&CapabilityOverride::launch_mode(LaunchMode::Paravirtualized));
//! assert_eq!(image.len(), 2);
//! ```

mod descriptor;
mod error;
mod overrides;
mod schema;

pub use descriptor::{
    BooleanDescriptor, CapabilityDescriptor, DescriptorSource, EnumIntegerDescriptor,
    EnumStringDescriptor, DESCRIPTOR_TYPE_FIELD,
};
pub use error::SchemaError;
pub use overrides::{
    CapabilityOverride, LaunchMode, NicAttachmentType, LAUNCH_MODE_KEY, NIC_ATTACHMENT_TYPE_KEY,
};
pub use schema::SchemaData;
