//! Type model entries and the schema that holds them.

use crate::error::{ModelError, ModelResult};
use crate::primitive::PrimitiveType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a field, element, key or value points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    /// A leaf primitive.
    Primitive(PrimitiveType),
    /// Another entry of the same schema, by type name.
    Named(String),
    /// A covariant element: any composite whose runtime type implements
    /// `bound`. The concrete type is tagged per value in the data section.
    Any { bound: String },
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn any(bound: impl Into<String>) -> Self {
        Self::Any {
            bound: bound.into(),
        }
    }

    /// The schema entry this reference needs, if any.
    pub fn referenced_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Named(name) => f.write_str(name),
            Self::Any { bound } => write!(f, "any<{bound}>"),
        }
    }
}

impl From<PrimitiveType> for TypeRef {
    fn from(p: PrimitiveType) -> Self {
        Self::Primitive(p)
    }
}

/// One field of a composite type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub type_ref: TypeRef,
    /// The field may hold null.
    pub nullable: bool,
    /// The field has no default; a reader that cannot find it must fail.
    pub mandatory: bool,
}

impl FieldSpec {
    /// A non-nullable field without a default.
    pub fn new(name: impl Into<String>, type_ref: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            type_ref: type_ref.into(),
            nullable: false,
            mandatory: true,
        }
    }

    /// A nullable field. Nullable fields are never mandatory.
    pub fn nullable(name: impl Into<String>, type_ref: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            type_ref: type_ref.into(),
            nullable: true,
            mandatory: false,
        }
    }

    /// A non-nullable field with an explicit default.
    pub fn defaulted(name: impl Into<String>, type_ref: impl Into<TypeRef>) -> Self {
        Self {
            name: name.into(),
            type_ref: type_ref.into(),
            nullable: false,
            mandatory: false,
        }
    }

    /// True when a reader may fill this field without remote data.
    pub fn has_default(&self) -> bool {
        self.nullable || !self.mandatory
    }
}

/// A restricted type: a collection over a declared element, or an enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Restriction {
    List { element: TypeRef },
    Set { element: TypeRef },
    Array { element: TypeRef },
    Map { key: TypeRef, value: TypeRef },
    /// Enum constants in declaration order. Ordinals index into this list.
    Enum { values: Vec<String> },
}

impl Restriction {
    /// The canonical type name of a collection restriction, e.g. `list<i32>`.
    /// Enums are named by their declaring type and return `None`.
    pub fn collection_name(&self) -> Option<String> {
        match self {
            Self::List { element } => Some(format!("list<{element}>")),
            Self::Set { element } => Some(format!("set<{element}>")),
            Self::Array { element } => Some(format!("array<{element}>")),
            Self::Map { key, value } => Some(format!("map<{key},{value}>")),
            Self::Enum { .. } => None,
        }
    }

    fn references(&self) -> Vec<&TypeRef> {
        match self {
            Self::List { element } | Self::Set { element } | Self::Array { element } => {
                vec![element]
            }
            Self::Map { key, value } => vec![key, value],
            Self::Enum { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// Ordered named fields; the order defines positional encoding.
    Composite { fields: Vec<FieldSpec> },
    Restricted(Restriction),
}

/// One schema entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeModel {
    pub type_name: String,
    pub kind: TypeKind,
    /// Type-level markers with no data impact. They contribute to the
    /// fingerprint but not to the field set.
    pub markers: Vec<String>,
    /// Set on a custom proxy's entry: the type it stands in for.
    /// Not part of the fingerprint.
    pub proxies: Option<String>,
}

impl TypeModel {
    pub fn composite(type_name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: TypeKind::Composite { fields },
            markers: Vec::new(),
            proxies: None,
        }
    }

    pub fn restricted(type_name: impl Into<String>, restriction: Restriction) -> Self {
        Self {
            type_name: type_name.into(),
            kind: TypeKind::Restricted(restriction),
            markers: Vec::new(),
            proxies: None,
        }
    }

    /// A collection entry named by its canonical name.
    pub fn collection(restriction: Restriction) -> Option<Self> {
        let name = restriction.collection_name()?;
        Some(Self::restricted(name, restriction))
    }

    pub fn enumeration(type_name: impl Into<String>, values: Vec<String>) -> Self {
        Self::restricted(type_name, Restriction::Enum { values })
    }

    #[must_use]
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }

    #[must_use]
    pub fn proxying(mut self, target: impl Into<String>) -> Self {
        self.proxies = Some(target.into());
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, TypeKind::Composite { .. })
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, TypeKind::Restricted(Restriction::Enum { .. }))
    }

    /// Fields of a composite; empty for restricted entries.
    pub fn fields(&self) -> &[FieldSpec] {
        match &self.kind {
            TypeKind::Composite { fields } => fields,
            TypeKind::Restricted(_) => &[],
        }
    }

    /// Position and spec of the named field.
    pub fn field(&self, name: &str) -> Option<(usize, &FieldSpec)> {
        self.fields().iter().enumerate().find(|(_, f)| f.name == name)
    }

    pub fn restriction(&self) -> Option<&Restriction> {
        match &self.kind {
            TypeKind::Restricted(r) => Some(r),
            TypeKind::Composite { .. } => None,
        }
    }

    pub fn enum_values(&self) -> Option<&[String]> {
        match &self.kind {
            TypeKind::Restricted(Restriction::Enum { values }) => Some(values),
            _ => None,
        }
    }

    /// Every type reference this entry holds, in declaration order.
    pub fn references(&self) -> Vec<&TypeRef> {
        match &self.kind {
            TypeKind::Composite { fields } => fields.iter().map(|f| &f.type_ref).collect(),
            TypeKind::Restricted(r) => r.references(),
        }
    }

    /// Same shape apart from the proxy annotation.
    fn same_shape(&self, other: &TypeModel) -> bool {
        self.type_name == other.type_name && self.kind == other.kind && self.markers == other.markers
    }
}

/// An ordered set of type models with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entries: Vec<TypeModel>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a schema from entries that must already be unique, as read
    /// from an envelope.
    pub fn from_entries(entries: Vec<TypeModel>) -> ModelResult<Self> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.type_name.clone(), i).is_some() {
                return Err(ModelError::DuplicateType(entry.type_name.clone()));
            }
        }
        Ok(Self { entries, index })
    }

    /// Adds an entry. Re-inserting an identical shape is a no-op (a proxy
    /// annotation on the new copy is adopted); a different shape under the
    /// same name is a conflict. Returns true when the entry is new.
    pub fn insert(&mut self, model: TypeModel) -> ModelResult<bool> {
        if let Some(&i) = self.index.get(&model.type_name) {
            let existing = &mut self.entries[i];
            if !existing.same_shape(&model) {
                return Err(ModelError::ConflictingDefinition(model.type_name));
            }
            if existing.proxies.is_none() {
                existing.proxies = model.proxies;
            }
            return Ok(false);
        }
        self.index.insert(model.type_name.clone(), self.entries.len());
        self.entries.push(model);
        Ok(true)
    }

    /// Annotates an existing entry as the proxy for `target`.
    pub fn mark_proxy(&mut self, type_name: &str, target: &str) -> ModelResult<()> {
        let i = self
            .index_of(type_name)
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?;
        self.entries[i].proxies = Some(target.to_string());
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<&TypeModel> {
        self.index.get(type_name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.index.contains_key(type_name)
    }

    pub fn index_of(&self, type_name: &str) -> Option<usize> {
        self.index.get(type_name).copied()
    }

    pub fn entry(&self, index: usize) -> Option<&TypeModel> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeModel> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[TypeModel] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TypeModel> {
        self.entries
    }

    /// Fails on the first named reference that has no entry.
    pub fn check_references(&self) -> ModelResult<()> {
        for entry in &self.entries {
            for type_ref in entry.references() {
                if let Some(to) = type_ref.referenced_name() {
                    if !self.contains(to) {
                        return Err(ModelError::DanglingReference {
                            from: entry.type_name.clone(),
                            to: to.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
