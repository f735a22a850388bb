//! Encoding: typed values to envelope bytes.

use crate::context::{SerializationContext, UseCase};
use crate::data::ByteWriter;
use crate::envelope::{CURRENT_VERSION, DescribedType, SchemaSection, write_envelope};
use crate::error::{NotSerializableReason, SerializationError, SerializationResult};
use crate::factory::SerializerFactory;
use crate::references::{EncodeReferences, Identity};
use crate::schema::SchemaBuilder;
use crate::serializable::Serializable;
use carapace_model::{Record, TypeModel, TypeRef, Value, fingerprint_schema};
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes of one serialized envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBytes(Vec<u8>);

impl SerializedBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SerializedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// State of one `serialize` call.
///
/// Owns the reference table for the call, and a schema builder seeded from
/// the root type's cached schema so runtime subtypes can add entries.
pub struct WriteContext<'a> {
    factory: &'a SerializerFactory,
    context: &'a SerializationContext,
    builder: SchemaBuilder<'a>,
    references: EncodeReferences,
    depth: usize,
}

impl<'a> WriteContext<'a> {
    pub fn context(&self) -> &SerializationContext {
        self.context
    }

    pub fn use_case(&self) -> UseCase {
        self.context.use_case
    }

    /// Encodes `value`, through its custom serializer when one is registered.
    pub fn write<T: Serializable>(&mut self, value: &T) -> SerializationResult<Value> {
        self.depth += 1;
        if self.depth > self.context.limits.max_depth {
            self.depth -= 1;
            return Err(SerializationError::DepthExceeded(self.context.limits.max_depth));
        }
        let factory = self.factory;
        let result = match factory.registry().custom(TypeId::of::<T>()) {
            Some(registration) => registration.write(value as &dyn Any, self),
            None => value.encode(self),
        };
        self.depth -= 1;
        result
    }

    /// Encodes a value that only has a custom serializer.
    pub fn write_custom<T: Any + Send + Sync>(&mut self, value: &T) -> SerializationResult<Value> {
        let factory = self.factory;
        let registration = factory.registry().custom(TypeId::of::<T>()).ok_or_else(|| {
            SerializationError::not_serializable(
                std::any::type_name::<T>(),
                NotSerializableReason::NoSerializer,
            )
        })?;
        registration.write(value as &dyn Any, self)
    }

    /// Encodes a covariant element under its runtime type, adding that
    /// type's entries to the envelope schema.
    pub fn write_element<C: Serializable>(&mut self, element: &C) -> SerializationResult<Value> {
        self.builder.type_ref_of::<C>()?;
        match self.write(element)? {
            record @ Value::Record(_) => Ok(record),
            _ => Err(SerializationError::not_serializable(
                std::any::type_name::<C>(),
                NotSerializableReason::NotComposite,
            )),
        }
    }

    fn named_entry(&self, type_ref: &TypeRef, rust_name: &str) -> SerializationResult<(u32, &TypeModel)> {
        let schema = self.builder.schema();
        let found = type_ref
            .referenced_name()
            .and_then(|name| schema.index_of(name))
            .and_then(|index| Some((u32::try_from(index).ok()?, schema.entry(index)?)));
        found.ok_or_else(|| {
            SerializationError::not_serializable(rust_name, NotSerializableReason::NotComposite)
        })
    }

    /// Starts the record of composite `T`.
    ///
    /// ```ignore
    /// cx.record::<Self>()?.field("name", &self.name)?.finish()
    /// ```
    pub fn record<T: Serializable>(&mut self) -> SerializationResult<RecordWriter<'_, 'a>> {
        let type_ref = self.builder.type_ref_of::<T>()?;
        let (type_index, model) = self.named_entry(&type_ref, std::any::type_name::<T>())?;
        if !model.is_composite() {
            return Err(SerializationError::not_serializable(
                &model.type_name,
                NotSerializableReason::NotComposite,
            ));
        }
        let type_name = model.type_name.clone();
        let names: Vec<String> = model.fields().iter().map(|f| f.name.clone()).collect();
        let slots = vec![None; names.len()];
        Ok(RecordWriter {
            cx: self,
            type_name,
            type_index,
            names,
            slots,
        })
    }

    /// The value of constant `constant` of enum `T`.
    pub fn enum_constant<T: Serializable>(&mut self, constant: &str) -> SerializationResult<Value> {
        let type_ref = self.builder.type_ref_of::<T>()?;
        let (type_index, model) = self.named_entry(&type_ref, std::any::type_name::<T>())?;
        let values = model.enum_values().ok_or_else(|| {
            SerializationError::not_serializable(&model.type_name, NotSerializableReason::NotEnum)
        })?;
        if !values.iter().any(|v| v == constant) {
            return Err(SerializationError::not_serializable(
                &model.type_name,
                NotSerializableReason::UnknownConstant {
                    constant: constant.to_string(),
                },
            ));
        }
        Ok(Value::Enum {
            type_index,
            constant: constant.to_string(),
        })
    }

    /// Encodes a shared identity: in full the first time, as a backreference
    /// after that.
    pub fn shared<T: Serializable>(&mut self, value: &Arc<T>) -> SerializationResult<Value> {
        let references_enabled = self.context.object_references_enabled;
        let key = EncodeReferences::identity_of(value);
        match self.references.lookup(key) {
            Identity::New => {
                let handle = self.references.begin(value);
                match self.write(value.as_ref()) {
                    Ok(inner) => {
                        self.references.complete(key);
                        if references_enabled {
                            Ok(Value::Shared {
                                handle,
                                value: Arc::new(inner),
                            })
                        } else {
                            Ok(inner)
                        }
                    }
                    Err(e) => {
                        self.references.abandon(key);
                        Err(e)
                    }
                }
            }
            Identity::Complete(handle) if references_enabled => Ok(Value::BackRef(handle)),
            // Without references a repeated identity is written as a copy.
            Identity::Complete(_) => self.write(value.as_ref()),
            Identity::InProgress(handle) if references_enabled => Ok(Value::BackRef(handle)),
            Identity::InProgress(_) => Err(SerializationError::not_serializable(
                std::any::type_name::<T>(),
                NotSerializableReason::ObjectReferencesDisabled,
            )),
        }
    }
}

/// Collects the fields of one record; see [`WriteContext::record`].
pub struct RecordWriter<'c, 'a> {
    cx: &'c mut WriteContext<'a>,
    type_name: String,
    type_index: u32,
    names: Vec<String>,
    slots: Vec<Option<Value>>,
}

impl<'c, 'a> RecordWriter<'c, 'a> {
    fn slot(&mut self, name: &str) -> SerializationResult<&mut Option<Value>> {
        let index = self.names.iter().position(|n| n == name);
        match index.and_then(|i| self.slots.get_mut(i)) {
            Some(slot) => Ok(slot),
            None => Err(SerializationError::not_serializable(
                &self.type_name,
                NotSerializableReason::UndeclaredProperty {
                    property: name.to_string(),
                },
            )),
        }
    }

    pub fn field<F: Serializable>(mut self, name: &str, value: &F) -> SerializationResult<Self> {
        let encoded = self.cx.write(value)?;
        *self.slot(name)? = Some(encoded);
        Ok(self)
    }

    /// A field whose type only has a custom serializer.
    pub fn custom_field<F: Any + Send + Sync>(mut self, name: &str, value: &F) -> SerializationResult<Self> {
        let encoded = self.cx.write_custom(value)?;
        *self.slot(name)? = Some(encoded);
        Ok(self)
    }

    pub fn finish(self) -> SerializationResult<Value> {
        let mut fields = Vec::with_capacity(self.slots.len());
        for (name, slot) in self.names.iter().zip(self.slots) {
            match slot {
                Some(value) => fields.push(value),
                None => {
                    return Err(SerializationError::not_serializable(
                        &self.type_name,
                        NotSerializableReason::MissingProperty {
                            property: name.clone(),
                        },
                    ));
                }
            }
        }
        Ok(Value::Record(Record {
            type_index: self.type_index,
            fields,
        }))
    }
}

/// Serializes `value` into a complete envelope.
pub(crate) fn serialize<T: Serializable>(
    factory: &SerializerFactory,
    value: &T,
    context: &SerializationContext,
) -> SerializationResult<SerializedBytes> {
    let built = factory.build_schema::<T>()?;
    let mut cx = WriteContext {
        factory,
        context,
        builder: SchemaBuilder::seeded(factory.registry(), &built),
        references: EncodeReferences::new(),
        depth: 0,
    };
    let root = cx.write(value)?;
    let shared = cx.references.len();

    let schema = cx.builder.schema();
    // Runtime subtypes may have added entries after the cached build.
    let fingerprints = if schema.len() == built.schema.len() {
        built.fingerprints.clone()
    } else {
        fingerprint_schema(schema)?
    };
    let entries = schema
        .entries()
        .iter()
        .zip(fingerprints)
        .map(|(model, fingerprint)| DescribedType {
            fingerprint,
            model: model.clone(),
        })
        .collect();
    let section = SchemaSection {
        root: built.root.clone(),
        entries,
    };

    let mut writer = ByteWriter::new(schema);
    writer.write(&root)?;
    let data = writer.into_bytes();

    let version = match context.write_version() {
        Some(version) => version,
        None => {
            warn!(
                preferred = context.preferred_serialization_version,
                "Preferred serialization version unsupported, writing {}", CURRENT_VERSION
            );
            CURRENT_VERSION
        }
    };
    let bytes = write_envelope(version, &section, cx.builder.transforms(), &data)?;
    debug!(
        root = %section.root,
        entries = section.entries.len(),
        shared,
        bytes = bytes.len(),
        "Serialized envelope"
    );
    Ok(SerializedBytes(bytes))
}
