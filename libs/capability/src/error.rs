use thiserror::Error;

/// Errors produced while building an image capability schema.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// A descriptor type this crate cannot copy.
    #[error("capability {key:?} has unsupported descriptor type {descriptor_type:?}")]
    UnsupportedDescriptor {
        key: String,
        descriptor_type: String,
    },

    /// An override value that is not one of the override's allowed values.
    #[error("default {default:?} for capability {key:?} is not one of {values:?}")]
    DefaultNotAllowed {
        key: String,
        default: String,
        values: Vec<String>,
    },

    /// A name that does not parse as a known override value.
    #[error("unknown {kind} {value:?}")]
    UnknownValue { kind: &'static str, value: String },
}
