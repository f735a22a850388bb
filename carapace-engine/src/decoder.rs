//! Decoding: envelope bytes to typed values.
//!
//! The whole schema is checked (declared fingerprints recomputed, references
//! resolved, names whitelisted) before the data section is read, and the
//! data section is read into a bounded [`Value`] tree before any typed value
//! is constructed.

use crate::context::SerializationContext;
use crate::data::ByteReader;
use crate::envelope::{Envelope, parse_envelope};
use crate::error::{NotSerializableReason, SerializationError, SerializationResult};
use crate::evolution::{EvolutionPlan, FieldSource};
use crate::factory::SerializerFactory;
use crate::references::{DecodeReferences, Slot};
use crate::registry::ProxyRegistration;
use crate::schema::SchemaBuilder;
use crate::serializable::{Bound, Serializable};
use crate::whitelist::WhitelistGuard;
use carapace_model::{
    Fingerprint, Fingerprinter, Schema, TransformsSchema, TypeModel, TypeRef, Value, fingerprint_schema,
};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The envelope's schema after verification.
#[derive(Debug, Clone)]
pub struct RemoteSchema {
    pub root: TypeRef,
    pub schema: Schema,
    pub fingerprints: Vec<Fingerprint>,
    pub transforms: TransformsSchema,
}

impl RemoteSchema {
    /// Rebuilds the schema and checks it is internally consistent: unique
    /// names, no dangling references, declared fingerprints equal to the
    /// recomputed ones.
    pub fn verify(envelope: &Envelope<'_>) -> SerializationResult<Self> {
        let malformed = |e: carapace_model::ModelError| SerializationError::malformed(e.to_string());
        let declared: Vec<Fingerprint> = envelope.schema.entries.iter().map(|e| e.fingerprint).collect();
        let models = envelope.schema.entries.iter().map(|e| e.model.clone()).collect();
        let schema = Schema::from_entries(models).map_err(malformed)?;
        schema.check_references().map_err(malformed)?;
        if let Some(root) = envelope.schema.root.referenced_name()
            && !schema.contains(root)
        {
            return Err(SerializationError::malformed(format!("root type '{root}' has no entry")));
        }

        let fingerprints = fingerprint_schema(&schema).map_err(malformed)?;
        for ((model, computed), declared) in schema.iter().zip(&fingerprints).zip(&declared) {
            if computed != declared {
                return Err(SerializationError::malformed(format!(
                    "fingerprint mismatch for '{}': declared {}, computed {}",
                    model.type_name,
                    declared.short(),
                    computed.short()
                )));
            }
        }

        Ok(Self {
            root: envelope.schema.root.clone(),
            schema,
            fingerprints,
            transforms: envelope.transforms.clone(),
        })
    }

    fn entry(&self, type_index: u32) -> SerializationResult<(&TypeModel, Fingerprint)> {
        let index = type_index as usize;
        match (self.schema.entry(index), self.fingerprints.get(index)) {
            (Some(model), Some(fingerprint)) => Ok((model, *fingerprint)),
            _ => Err(SerializationError::malformed(format!(
                "type index {type_index} out of range"
            ))),
        }
    }
}

/// State of one `deserialize` call.
pub struct ReadContext<'a> {
    factory: &'a SerializerFactory,
    context: &'a SerializationContext,
    remote: &'a RemoteSchema,
    builder: SchemaBuilder<'a>,
    local_fingerprints: HashMap<String, Fingerprint>,
    references: DecodeReferences,
    depth: usize,
}

impl<'a> ReadContext<'a> {
    pub fn context(&self) -> &SerializationContext {
        self.context
    }

    pub fn remote(&self) -> &RemoteSchema {
        self.remote
    }

    fn nested<R>(&mut self, f: impl FnOnce(&mut Self) -> SerializationResult<R>) -> SerializationResult<R> {
        self.depth += 1;
        if self.depth > self.context.limits.max_depth {
            self.depth -= 1;
            return Err(SerializationError::DepthExceeded(self.context.limits.max_depth));
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Decodes `value` as `T`, through its custom serializer when one is
    /// registered.
    pub fn read<T: Serializable>(&mut self, value: &Value) -> SerializationResult<T> {
        let factory = self.factory;
        match factory.registry().custom(TypeId::of::<T>()) {
            Some(registration) => self.nested(|cx| cx.read_proxy::<T>(registration, value)),
            None => self.nested(|cx| T::decode(value, cx)),
        }
    }

    /// Decodes a value that only has a custom serializer.
    pub fn read_custom<T: Any + Send + Sync>(&mut self, value: &Value) -> SerializationResult<T> {
        let factory = self.factory;
        let registration = factory.registry().custom(TypeId::of::<T>()).ok_or_else(|| {
            SerializationError::not_serializable(
                std::any::type_name::<T>(),
                NotSerializableReason::NoSerializer,
            )
        })?;
        self.read_proxy::<T>(registration, value)
    }

    // The target is checked under its locally registered name: the proxy
    // annotation in the envelope is not fingerprinted.
    fn read_proxy<T: Any>(&mut self, registration: &ProxyRegistration, value: &Value) -> SerializationResult<T> {
        WhitelistGuard::new(self.context.whitelist.as_ref()).check(registration.target_name())?;
        registration.read::<T>(value, self)
    }

    fn local_entry<T: Serializable>(&mut self) -> SerializationResult<(String, Fingerprint)> {
        let type_ref = self.builder.type_ref_of::<T>()?;
        let name = type_ref.referenced_name().ok_or_else(|| {
            SerializationError::not_serializable(
                std::any::type_name::<T>(),
                NotSerializableReason::NotComposite,
            )
        })?;
        if let Some(fingerprint) = self.local_fingerprints.get(name) {
            return Ok((name.to_string(), *fingerprint));
        }
        let fingerprint = Fingerprinter::new(self.builder.schema()).fingerprint(name)?;
        self.local_fingerprints.insert(name.to_string(), fingerprint);
        Ok((name.to_string(), fingerprint))
    }

    /// Opens a remote record for reading as composite `T`, evolving it when
    /// the writer's shape differs from the local one.
    pub fn record<'r, T: Serializable>(&'r mut self, value: &'r Value) -> SerializationResult<RecordReader<'r, 'a>> {
        let record = match value {
            Value::Record(record) => record,
            other => return Err(SerializationError::unexpected("record", other)),
        };
        let (local_name, local_fingerprint) = self.local_entry::<T>()?;
        let remote = self.remote;
        let (remote_model, remote_fingerprint) = remote.entry(record.type_index)?;
        let local_model = self.builder.schema().get(&local_name).ok_or_else(|| {
            SerializationError::not_serializable(&local_name, NotSerializableReason::NotComposite)
        })?;
        if !remote_model.is_composite() {
            return Err(SerializationError::unexpected("record of a composite", value));
        }
        if remote_model.fields().len() != record.fields.len() {
            return Err(SerializationError::malformed(format!(
                "record of '{}' has {} fields, schema declares {}",
                remote_model.type_name,
                record.fields.len(),
                remote_model.fields().len()
            )));
        }

        let plan = self.factory.evolution().plan(
            remote_fingerprint,
            remote_model,
            local_fingerprint,
            local_model,
        )?;
        if self.context.prevent_data_loss {
            for (name, index) in &plan.discarded {
                if record.fields.get(*index).is_some_and(|v| !v.is_null()) {
                    return Err(SerializationError::evolution(
                        &local_name,
                        format!("remote field '{name}' would be discarded"),
                    ));
                }
            }
        }

        Ok(RecordReader {
            cx: self,
            plan,
            fields: &record.fields,
        })
    }

    /// Reads an enum value as a constant of local enum `T`, resolving
    /// constants the local type does not know through transforms.
    pub fn enum_constant<T: Serializable>(&mut self, value: &Value) -> SerializationResult<String> {
        let (type_index, constant) = match value {
            Value::Enum {
                type_index,
                constant,
            } => (*type_index, constant),
            other => return Err(SerializationError::unexpected("enum", other)),
        };
        let (local_name, _) = self.local_entry::<T>()?;
        let remote = self.remote;
        let (remote_model, _) = remote.entry(type_index)?;
        if remote_model.type_name != local_name {
            return Err(SerializationError::evolution(
                &local_name,
                format!("envelope holds '{}'", remote_model.type_name),
            ));
        }
        let local_values = self
            .builder
            .schema()
            .get(&local_name)
            .and_then(TypeModel::enum_values)
            .ok_or_else(|| SerializationError::not_serializable(&local_name, NotSerializableReason::NotEnum))?;
        self.factory.evolution().resolve_constant(
            &local_name,
            constant,
            local_values,
            self.builder.transforms().get(&local_name),
            remote.transforms.get(&local_name),
        )
    }

    /// Reads a shared identity. Every occurrence of one handle yields the
    /// same `Arc`.
    ///
    /// The object is built with [`Serializable::construct`] and published
    /// before [`Serializable::populate`] runs, so a cycle through a field
    /// that `populate` fills resolves to the shared instance.
    pub fn shared<T: Serializable>(&mut self, value: &Value) -> SerializationResult<Arc<T>> {
        match value {
            Value::Shared { handle, .. } | Value::BackRef(handle) => self.materialize::<T>(*handle),
            // Written without references.
            plain => self.read::<T>(plain).map(Arc::new),
        }
    }

    fn materialize<T: Serializable>(&mut self, handle: u32) -> SerializationResult<Arc<T>> {
        match self.references.take(handle) {
            Some(Slot::Pending(raw)) => {
                let factory = self.factory;
                if factory.registry().custom(TypeId::of::<T>()).is_some() {
                    let object = Arc::new(self.read::<T>(&raw)?);
                    self.references.complete(handle, object.clone());
                    return Ok(object);
                }
                // Published before populate, so backreferences from the
                // remaining fields resolve to this instance.
                let object = Arc::new(self.nested(|cx| T::construct(&raw, cx))?);
                self.references.complete(handle, object.clone());
                self.nested(|cx| object.populate(&raw, cx))?;
                Ok(object)
            }
            Some(Slot::InProgress) => Err(SerializationError::ReferenceTable(format!(
                "handle {handle} is referenced while its object is still being constructed"
            ))),
            Some(Slot::Built(object)) => object.downcast::<T>().map_err(|_| {
                SerializationError::ReferenceTable(format!(
                    "handle {handle} was built as another type than {}",
                    std::any::type_name::<T>()
                ))
            }),
            None => Err(SerializationError::ReferenceTable(format!(
                "backreference to handle {handle} which was never emitted"
            ))),
        }
    }

    /// Reads a covariant element through the reader registered for its
    /// runtime type.
    pub fn subtype<B: ?Sized + Bound>(&mut self, value: &Value) -> SerializationResult<Box<B>> {
        let record = match value {
            Value::Record(record) => record,
            other => return Err(SerializationError::unexpected("record", other)),
        };
        let remote = self.remote;
        let (model, _) = remote.entry(record.type_index)?;
        let factory = self.factory;
        let reader = factory
            .registry()
            .subtype_reader::<B>(&model.type_name)
            .ok_or_else(|| {
                SerializationError::not_serializable(
                    &model.type_name,
                    NotSerializableReason::NoSubtypeReader {
                        bound: B::BOUND.to_string(),
                    },
                )
            })?;
        reader.read(value, self)
    }
}

/// Reads the fields of one record by local name; see [`ReadContext::record`].
pub struct RecordReader<'r, 'a> {
    cx: &'r mut ReadContext<'a>,
    plan: Arc<EvolutionPlan>,
    fields: &'r [Value],
}

impl<'r, 'a> RecordReader<'r, 'a> {
    pub fn plan(&self) -> &EvolutionPlan {
        &self.plan
    }

    /// The remote value for `name`, or `None` when the plan defaults it.
    fn remote_value(&self, name: &str) -> SerializationResult<Option<&'r Value>> {
        let type_name = &self.plan.type_name;
        match self.plan.source(name) {
            Some(FieldSource::FromRemoteField { index, .. }) => {
                let fields: &'r [Value] = self.fields;
                let value = fields.get(*index).ok_or_else(|| {
                    SerializationError::malformed(format!("field '{name}' of '{type_name}' is missing"))
                })?;
                Ok(Some(value))
            }
            Some(FieldSource::DefaultValue) => Ok(None),
            Some(FieldSource::Reject(reason)) => Err(SerializationError::evolution(type_name, reason.clone())),
            None => Err(SerializationError::not_serializable(
                type_name,
                NotSerializableReason::UndeclaredProperty {
                    property: name.to_string(),
                },
            )),
        }
    }

    fn non_null<F: Serializable>(&self, name: &str, value: &Value) -> SerializationResult<()> {
        if value.is_null() && !F::NULLABLE {
            return Err(SerializationError::malformed(format!(
                "field '{name}' of '{}' is null but not nullable",
                self.plan.type_name
            )));
        }
        Ok(())
    }

    pub fn field<F: Serializable>(&mut self, name: &str) -> SerializationResult<F> {
        match self.remote_value(name)? {
            Some(value) => {
                self.non_null::<F>(name, value)?;
                self.cx.read::<F>(value)
            }
            None => F::absent().ok_or_else(|| {
                SerializationError::evolution(
                    &self.plan.type_name,
                    format!("field '{name}' is absent remotely and has no default"),
                )
            }),
        }
    }

    /// Like [`field`](Self::field), with `default` for a field the writer
    /// did not have.
    pub fn field_or_else<F: Serializable>(&mut self, name: &str, default: impl FnOnce() -> F) -> SerializationResult<F> {
        match self.remote_value(name)? {
            Some(value) => {
                self.non_null::<F>(name, value)?;
                self.cx.read::<F>(value)
            }
            None => Ok(default()),
        }
    }

    pub fn field_or_default<F: Serializable + Default>(&mut self, name: &str) -> SerializationResult<F> {
        self.field_or_else(name, F::default)
    }

    /// A field whose type only has a custom serializer.
    pub fn custom_field<F: Any + Send + Sync>(&mut self, name: &str) -> SerializationResult<F> {
        match self.remote_value(name)? {
            Some(value) => self.cx.read_custom::<F>(value),
            None => Err(SerializationError::evolution(
                &self.plan.type_name,
                format!("field '{name}' is absent remotely and has no default"),
            )),
        }
    }
}

/// Deserializes an envelope into `T`.
pub(crate) fn deserialize<T: Serializable>(
    factory: &SerializerFactory,
    bytes: &[u8],
    context: &SerializationContext,
) -> SerializationResult<T> {
    let envelope = parse_envelope(bytes, &context.limits)?;
    if let Some(encoding) = envelope.encoding {
        if !context.encoding_whitelist.accepts(encoding) {
            return Err(SerializationError::EncodingRejected(format!(
                "envelope claims '{encoding}' which the context does not accept"
            )));
        }
        return Err(SerializationError::malformed(format!(
            "unsupported data encoding '{encoding}'"
        )));
    }

    let remote = RemoteSchema::verify(&envelope)?;
    // Nothing leaves the schema section until every entry is permitted.
    WhitelistGuard::new(context.whitelist.as_ref()).check_schema(&remote.schema)?;

    let root = ByteReader::new(envelope.data, &remote.schema, context.limits).read_root()?;
    let references = DecodeReferences::index(&root);

    let built = factory.build_schema::<T>()?;
    let local_fingerprints = built
        .schema
        .iter()
        .zip(&built.fingerprints)
        .map(|(model, fingerprint)| (model.type_name.clone(), *fingerprint))
        .collect();
    let mut cx = ReadContext {
        factory,
        context,
        remote: &remote,
        builder: SchemaBuilder::seeded(factory.registry(), &built),
        local_fingerprints,
        references,
        depth: 0,
    };
    let value = cx.read::<T>(&root)?;
    debug!(
        root = %remote.root,
        entries = remote.schema.len(),
        shared = cx.references.len(),
        "Deserialized envelope"
    );
    Ok(value)
}
