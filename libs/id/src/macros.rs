//! Macros for defining typed resource identifiers.

/// Macro to define a typed cloud resource id for a specific resource type.
///
/// This generates a newtype wrapper around the provider's string id with:
/// - A `RESOURCE_TYPE` constant
/// - `parse()` to validate a string
/// - `synthetic()` to mint a well-formed id for in-memory fakes
/// - `Display`, `FromStr`, `Serialize` and `Deserialize` implementations
///
/// # Example
///
/// ```ignore
/// define_ocid!(ImageId, "image");
///
/// let id: ImageId = "ocid1.image.oc1..aaaaaaaa".parse()?;
/// ```
#[macro_export]
macro_rules! define_ocid {
    ($name:ident, $resource_type:literal) => {
        /// A typed id for this resource type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The resource type segment carried by every id of this type.
            pub const RESOURCE_TYPE: &'static str = $resource_type;

            /// Parses an id from a string.
            ///
            /// The string must look like
            /// `ocid1.{resource_type}.{realm}.[region].{unique}`.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                $crate::validate_ocid(s, Self::RESOURCE_TYPE)?;
                Ok(Self(s.to_string()))
            }

            /// Mints a well-formed id with a random unique segment.
            ///
            /// Only in-memory fakes should need this; real ids come from the
            /// control plane.
            #[must_use]
            pub fn synthetic() -> Self {
                Self(format!(
                    "{}.{}.oc1..{}",
                    $crate::OCID_VERSION,
                    Self::RESOURCE_TYPE,
                    $crate::Ulid::new().to_string().to_lowercase()
                ))
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}
