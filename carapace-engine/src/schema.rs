//! Schema construction from Rust types.
//!
//! Types describe themselves through [`Serializable::describe`]. Composites
//! hand the builder a [`Shape`]: the candidate as the host type exposes it,
//! with accessor visibility, the public constructor's parameters and any
//! synthetic origin. The builder applies the composite policy to the shape
//! and emits one [`TypeModel`] per distinct type.

use crate::error::{NotSerializableReason, SerializationError, SerializationResult};
use crate::registry::SerializerRegistry;
use crate::serializable::Serializable;
use carapace_model::{
    EnumTransform, FieldSpec, Fingerprint, Fingerprinter, Restriction, Schema, TransformsSchema,
    TypeModel, TypeRef, fingerprint_schema,
};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

type DescribeFn = for<'b, 'r> fn(&'b mut SchemaBuilder<'r>) -> SerializationResult<TypeRef>;

fn describe_builtin<T: Serializable>(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
    builder.type_ref_of::<T>()
}

fn describe_custom<T: Any + Send + Sync>(
    builder: &mut SchemaBuilder<'_>,
) -> SerializationResult<TypeRef> {
    builder.custom_type_ref_of::<T>()
}

/// Accessor visibility of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
}

/// How a shape came to exist when it was not declared as a plain type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Synthetic {
    /// A nested type holding an implicit reference to an enclosing instance.
    InnerClass { enclosing: String },
    /// A closure or other compiler-generated function value.
    Lambda,
}

/// One property of a [`Shape`].
#[derive(Clone)]
pub struct PropertyShape {
    pub name: String,
    pub access: Access,
    pub nullable: bool,
    pub defaulted: bool,
    describe: DescribeFn,
}

impl std::fmt::Debug for PropertyShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyShape")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("nullable", &self.nullable)
            .field("defaulted", &self.defaulted)
            .finish()
    }
}

/// Candidate description of a composite type.
#[derive(Debug, Clone)]
pub struct Shape {
    type_name: String,
    properties: Vec<PropertyShape>,
    constructor: Option<Vec<String>>,
    markers: Vec<String>,
    synthetic: Option<Synthetic>,
}

impl Shape {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
            constructor: None,
            markers: Vec::new(),
            synthetic: None,
        }
    }

    fn push(mut self, name: &str, access: Access, nullable: bool, defaulted: bool, describe: DescribeFn) -> Self {
        self.properties.push(PropertyShape {
            name: name.to_string(),
            access,
            nullable,
            defaulted,
            describe,
        });
        self
    }

    /// A public property. Nullability follows `T`.
    #[must_use]
    pub fn property<T: Serializable>(self, name: &str) -> Self {
        self.push(name, Access::Public, T::NULLABLE, false, describe_builtin::<T>)
    }

    /// A public non-nullable property that readers may default when the
    /// writer did not have it.
    #[must_use]
    pub fn defaulted_property<T: Serializable>(self, name: &str) -> Self {
        self.push(name, Access::Public, T::NULLABLE, true, describe_builtin::<T>)
    }

    /// A property without a public accessor. Its presence makes the shape
    /// unserializable.
    #[must_use]
    pub fn private_property<T: Serializable>(self, name: &str) -> Self {
        self.push(name, Access::Private, T::NULLABLE, false, describe_builtin::<T>)
    }

    /// A public property whose type is only serializable through a
    /// registered custom serializer.
    #[must_use]
    pub fn custom_property<T: Any + Send + Sync>(self, name: &str) -> Self {
        self.push(name, Access::Public, false, false, describe_custom::<T>)
    }

    #[must_use]
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.markers.push(marker.into());
        self
    }

    /// Declares the public constructor by parameter names.
    #[must_use]
    pub fn constructor(mut self, params: &[&str]) -> Self {
        self.constructor = Some(params.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Declares a public constructor taking every property declared so far,
    /// in order.
    #[must_use]
    pub fn canonical_constructor(mut self) -> Self {
        self.constructor = Some(self.properties.iter().map(|p| p.name.clone()).collect());
        self
    }

    #[must_use]
    pub fn inner_class_of(mut self, enclosing: impl Into<String>) -> Self {
        self.synthetic = Some(Synthetic::InnerClass {
            enclosing: enclosing.into(),
        });
        self
    }

    #[must_use]
    pub fn lambda(mut self) -> Self {
        self.synthetic = Some(Synthetic::Lambda);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn properties(&self) -> &[PropertyShape] {
        &self.properties
    }

    /// Applies the composite policy, in order: synthetic origin, duplicate
    /// properties, accessor visibility, constructor presence, constructor
    /// correspondence.
    fn validate(&self) -> Result<(), NotSerializableReason> {
        match &self.synthetic {
            Some(Synthetic::Lambda) => return Err(NotSerializableReason::Synthetic),
            Some(Synthetic::InnerClass { enclosing }) => {
                return Err(NotSerializableReason::InnerClass {
                    enclosing: enclosing.clone(),
                });
            }
            None => {}
        }

        let mut seen = HashSet::new();
        for property in &self.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(NotSerializableReason::DuplicateProperty {
                    property: property.name.clone(),
                });
            }
        }

        if let Some(private) = self.properties.iter().find(|p| p.access == Access::Private) {
            return Err(NotSerializableReason::NonPublicProperty {
                type_name: self.type_name.clone(),
                property: private.name.clone(),
            });
        }

        let params = self
            .constructor
            .as_ref()
            .ok_or(NotSerializableReason::NoPublicConstructor)?;
        let mut matched = HashSet::new();
        for param in params {
            if !seen.contains(param.as_str()) {
                return Err(NotSerializableReason::ConstructorMismatch {
                    detail: format!("parameter '{param}' has no matching property"),
                });
            }
            if !matched.insert(param.as_str()) {
                return Err(NotSerializableReason::ConstructorMismatch {
                    detail: format!("parameter '{param}' appears twice"),
                });
            }
        }
        if let Some(missing) = self.properties.iter().find(|p| !matched.contains(p.name.as_str())) {
            return Err(NotSerializableReason::ConstructorMismatch {
                detail: format!("property '{}' is not a constructor parameter", missing.name),
            });
        }
        Ok(())
    }
}

/// Candidate description of an enum type.
#[derive(Debug, Clone)]
pub struct EnumShape {
    type_name: String,
    values: Vec<String>,
    transforms: Vec<EnumTransform>,
}

impl EnumShape {
    pub fn new(type_name: impl Into<String>, values: &[&str]) -> Self {
        Self {
            type_name: type_name.into(),
            values: values.iter().map(|v| v.to_string()).collect(),
            transforms: Vec::new(),
        }
    }

    #[must_use]
    pub fn transform(mut self, transform: EnumTransform) -> Self {
        self.transforms.push(transform);
        self
    }
}

/// Result of building the schema for one root type.
#[derive(Debug, Clone)]
pub struct BuiltSchema {
    pub root: TypeRef,
    pub schema: Schema,
    /// Aligned with `schema.entries()`.
    pub fingerprints: Vec<Fingerprint>,
    pub transforms: TransformsSchema,
    pub(crate) refs: HashMap<TypeId, TypeRef>,
}

impl BuiltSchema {
    pub fn root_model(&self) -> Option<&TypeModel> {
        self.root.referenced_name().and_then(|name| self.schema.get(name))
    }

    pub fn root_fingerprint(&self) -> Option<Fingerprint> {
        self.root.referenced_name().and_then(|name| self.fingerprint_of(name))
    }

    pub fn fingerprint_of(&self, type_name: &str) -> Option<Fingerprint> {
        self.schema
            .index_of(type_name)
            .and_then(|i| self.fingerprints.get(i).copied())
    }

    /// Fingerprint of the root reference, including primitive roots.
    pub fn fingerprint(&self) -> SerializationResult<Fingerprint> {
        Ok(Fingerprinter::new(&self.schema).fingerprint_ref(&self.root)?)
    }
}

/// Walks Rust types and assembles their schema entries.
pub struct SchemaBuilder<'r> {
    registry: &'r SerializerRegistry,
    schema: Schema,
    transforms: TransformsSchema,
    refs: HashMap<TypeId, TypeRef>,
    in_progress: Vec<TypeId>,
}

impl<'r> SchemaBuilder<'r> {
    pub fn new(registry: &'r SerializerRegistry) -> Self {
        Self {
            registry,
            schema: Schema::new(),
            transforms: TransformsSchema::new(),
            refs: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Continues from a finished build, so runtime types can be added.
    pub(crate) fn seeded(registry: &'r SerializerRegistry, built: &BuiltSchema) -> Self {
        Self {
            registry,
            schema: built.schema.clone(),
            transforms: built.transforms.clone(),
            refs: built.refs.clone(),
            in_progress: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'r SerializerRegistry {
        self.registry
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn transforms(&self) -> &TransformsSchema {
        &self.transforms
    }

    /// Describes `T`, preferring a registered custom serializer.
    pub fn type_ref_of<T: Serializable>(&mut self) -> SerializationResult<TypeRef> {
        let id = TypeId::of::<T>();
        if let Some(type_ref) = self.refs.get(&id) {
            return Ok(type_ref.clone());
        }
        if self.registry.custom(id).is_some() {
            return self.custom_type_ref_of::<T>();
        }
        if self.in_progress.contains(&id) {
            // Recursion reached `T` before it named itself.
            return Err(SerializationError::not_serializable(
                std::any::type_name::<T>(),
                NotSerializableReason::NotComposite,
            ));
        }

        self.in_progress.push(id);
        let result = T::describe(self);
        self.in_progress.pop();
        let type_ref = result?;
        self.refs.insert(id, type_ref.clone());
        Ok(type_ref)
    }

    /// Describes `T` through its registered custom serializer: the proxy is
    /// described in its place and annotated with the target name.
    pub fn custom_type_ref_of<T: Any + Send + Sync>(&mut self) -> SerializationResult<TypeRef> {
        let id = TypeId::of::<T>();
        if let Some(type_ref) = self.refs.get(&id) {
            return Ok(type_ref.clone());
        }
        let registry = self.registry;
        let registration = registry.custom(id).ok_or_else(|| {
            SerializationError::not_serializable(
                std::any::type_name::<T>(),
                NotSerializableReason::NoSerializer,
            )
        })?;
        let type_ref = registration.describe(self)?;
        let proxy_name = match &type_ref {
            TypeRef::Named(name) if self.schema.get(name).is_some_and(TypeModel::is_composite) => {
                name.clone()
            }
            _ => {
                return Err(SerializationError::not_serializable(
                    registration.target_name(),
                    NotSerializableReason::ProxyNotComposite,
                ));
            }
        };
        self.schema.mark_proxy(&proxy_name, registration.target_name())?;
        self.refs.insert(id, type_ref.clone());
        Ok(type_ref)
    }

    /// Validates a composite shape and adds its entry.
    pub fn composite(&mut self, shape: Shape) -> SerializationResult<TypeRef> {
        shape
            .validate()
            .map_err(|reason| SerializationError::not_serializable(&shape.type_name, reason))?;

        let type_ref = TypeRef::Named(shape.type_name.clone());
        // Name the type before walking properties so self references resolve.
        if let Some(&id) = self.in_progress.last() {
            self.refs.insert(id, type_ref.clone());
        }

        let mut fields = Vec::with_capacity(shape.properties.len());
        for property in &shape.properties {
            let field_ref = (property.describe)(self)?;
            fields.push(FieldSpec {
                name: property.name.clone(),
                type_ref: field_ref,
                nullable: property.nullable,
                mandatory: !(property.nullable || property.defaulted),
            });
        }

        let mut model = TypeModel::composite(shape.type_name, fields);
        model.markers = shape.markers;
        if self.schema.insert(model)? {
            debug!(type_name = %type_ref, "Described composite");
        }
        Ok(type_ref)
    }

    /// Adds an enum entry and its transforms.
    pub fn enumeration(&mut self, shape: EnumShape) -> SerializationResult<TypeRef> {
        let mut seen = HashSet::new();
        for value in &shape.values {
            if !seen.insert(value.as_str()) {
                return Err(SerializationError::not_serializable(
                    &shape.type_name,
                    NotSerializableReason::DuplicateConstant {
                        constant: value.clone(),
                    },
                ));
            }
        }
        let type_ref = TypeRef::Named(shape.type_name.clone());
        self.schema
            .insert(TypeModel::enumeration(shape.type_name.clone(), shape.values))?;
        self.transforms.insert(shape.type_name, shape.transforms);
        Ok(type_ref)
    }

    /// Adds a collection entry named by its canonical name.
    pub fn restricted(&mut self, restriction: Restriction) -> SerializationResult<TypeRef> {
        match TypeModel::collection(restriction) {
            Some(model) => {
                let type_ref = TypeRef::Named(model.type_name.clone());
                self.schema.insert(model)?;
                Ok(type_ref)
            }
            // Enums carry their own name and go through `enumeration`.
            None => Err(SerializationError::not_serializable(
                "<restriction>",
                NotSerializableReason::NotEnum,
            )),
        }
    }

    /// Finishes the build, fingerprinting every entry.
    pub fn finish(self, root: TypeRef) -> SerializationResult<BuiltSchema> {
        let fingerprints = fingerprint_schema(&self.schema)?;
        Ok(BuiltSchema {
            root,
            schema: self.schema,
            fingerprints,
            transforms: self.transforms,
            refs: self.refs,
        })
    }
}
