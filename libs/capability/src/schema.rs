use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::{CapabilityDescriptor, DescriptorSource};
use crate::error::SchemaError;
use crate::overrides::CapabilityOverride;

/// Descriptor mapping of one capability schema, keyed by capability name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaData(BTreeMap<String, CapabilityDescriptor>);

impl SchemaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CapabilityDescriptor> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CapabilityDescriptor> {
        self.0.get_mut(key)
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        descriptor: CapabilityDescriptor,
    ) -> Option<CapabilityDescriptor> {
        self.0.insert(key.into(), descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CapabilityDescriptor)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Copy of a global schema with every descriptor relabeled `IMAGE`.
    ///
    /// Values and defaults are deep-copied. Unrecognized descriptor types
    /// fail the whole copy with the offending key.
    pub fn to_image_schema(&self) -> Result<SchemaData, SchemaError> {
        self.0
            .iter()
            .map(|(key, descriptor)| {
                descriptor
                    .with_source(DescriptorSource::Image)
                    .map(|copy| (key.clone(), copy))
                    .ok_or_else(|| SchemaError::UnsupportedDescriptor {
                        key: key.clone(),
                        descriptor_type: descriptor.descriptor_type().to_string(),
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(SchemaData)
    }

    /// Overwrite the descriptor at the override's key.
    pub fn apply_override(&mut self, o: &CapabilityOverride) {
        self.0.insert(o.key.clone(), o.descriptor());
    }

    pub fn apply_overrides<'a, I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = &'a CapabilityOverride>,
    {
        for o in overrides {
            self.apply_override(o);
        }
    }

    /// Whether every descriptor is owned by the image.
    pub fn is_image_sourced(&self) -> bool {
        self.0
            .values()
            .all(|d| d.source() == Some(DescriptorSource::Image))
    }
}

impl FromIterator<(String, CapabilityDescriptor)> for SchemaData {
    fn from_iter<T: IntoIterator<Item = (String, CapabilityDescriptor)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for SchemaData {
    type Item = (String, CapabilityDescriptor);
    type IntoIter = std::collections::btree_map::IntoIter<String, CapabilityDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
