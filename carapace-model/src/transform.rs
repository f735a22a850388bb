//! Enum evolution metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One evolution rule attached to an enum type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumTransform {
    /// Readers that do not know `new` should read `old` instead.
    Default { new: String, old: String },
    /// Constant `from` has been renamed to `to`.
    Rename { from: String, to: String },
}

/// Transforms per enum type name, carried in the envelope's transforms
/// section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformsSchema {
    types: BTreeMap<String, Vec<EnumTransform>>,
}

impl TransformsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the transforms for `type_name`. Empty lists are not stored.
    pub fn insert(&mut self, type_name: impl Into<String>, transforms: Vec<EnumTransform>) {
        let type_name = type_name.into();
        if transforms.is_empty() {
            self.types.remove(&type_name);
        } else {
            self.types.insert(type_name, transforms);
        }
    }

    pub fn get(&self, type_name: &str) -> &[EnumTransform] {
        self.types.get(type_name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Absorbs `other`; entries already present are kept.
    pub fn merge(&mut self, other: &TransformsSchema) {
        for (name, transforms) in &other.types {
            self.types
                .entry(name.clone())
                .or_insert_with(|| transforms.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[EnumTransform])> {
        self.types.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
