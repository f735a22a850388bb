//! The serializer factory: registrations, caches and the entry points.

use crate::context::SerializationContext;
use crate::decoder;
use crate::encoder::{self, SerializedBytes};
use crate::error::{NotSerializableReason, SerializationError, SerializationResult};
use crate::evolution::EvolutionResolver;
use crate::registry::{CustomSerializer, SerializerRegistry, Strategy};
use crate::schema::{BuiltSchema, SchemaBuilder};
use crate::serializable::{Bound, Serializable};
use carapace_model::{Fingerprint, TypeRef};
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the serializer registry and the caches shared by every call.
///
/// Registration takes `&mut self` and happens before first use. Once
/// shared, `serialize` and `deserialize` may run concurrently: each call owns
/// its reference table, and the schema and plan caches are filled once per
/// key.
#[derive(Debug, Default)]
pub struct SerializerFactory {
    registry: SerializerRegistry,
    schemas: RwLock<HashMap<TypeId, Arc<BuiltSchema>>>,
    evolution: EvolutionResolver,
}

impl SerializerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SerializerRegistry {
        &self.registry
    }

    pub fn evolution(&self) -> &EvolutionResolver {
        &self.evolution
    }

    /// Registers a custom serializer for `S::Target`. Last write wins: the
    /// proxy type of a replaced registration is returned.
    pub fn register_custom<S: CustomSerializer>(&mut self, serializer: S) -> Option<&'static str> {
        let replaced = self.registry.register_custom(serializer);
        // Cached schemas may have described the target another way.
        self.schemas.get_mut().clear();
        let replaced = replaced.map(|registration| registration.proxy_type());
        match replaced {
            Some(previous) => info!(
                target_type = S::TARGET,
                previous,
                proxy = std::any::type_name::<S::Proxy>(),
                "Replaced custom serializer"
            ),
            None => info!(
                target_type = S::TARGET,
                proxy = std::any::type_name::<S::Proxy>(),
                "Registered custom serializer"
            ),
        }
        replaced
    }

    /// Registers concrete type `C` as a readable element of `Box<B>`.
    pub fn register_subtype<B: ?Sized + Bound, C: Serializable>(
        &mut self,
        upcast: fn(C) -> Box<B>,
    ) -> SerializationResult<()> {
        let type_ref = SchemaBuilder::new(&self.registry).type_ref_of::<C>()?;
        let type_name = match type_ref {
            TypeRef::Named(name) => name,
            _ => {
                return Err(SerializationError::not_serializable(
                    std::any::type_name::<C>(),
                    NotSerializableReason::NotComposite,
                ));
            }
        };
        info!(bound = B::BOUND, subtype = %type_name, "Registered subtype reader");
        self.registry.register_subtype::<B, C>(type_name, upcast);
        Ok(())
    }

    pub fn resolve<T: 'static>(&self) -> Strategy {
        self.registry.resolve::<T>()
    }

    /// The schema for root type `T`, built on first use and cached.
    pub fn build_schema<T: Serializable>(&self) -> SerializationResult<Arc<BuiltSchema>> {
        let id = TypeId::of::<T>();
        if let Some(built) = self.schemas.read().get(&id) {
            return Ok(built.clone());
        }

        let mut builder = SchemaBuilder::new(&self.registry);
        let root = builder.type_ref_of::<T>()?;
        let built = Arc::new(builder.finish(root)?);

        let mut schemas = self.schemas.write();
        let cached = schemas.entry(id).or_insert_with(|| {
            debug!(
                root = %built.root,
                entries = built.schema.len(),
                "Cached schema for {}",
                std::any::type_name::<T>()
            );
            built
        });
        Ok(cached.clone())
    }

    /// Fingerprint of root type `T`.
    pub fn fingerprint<T: Serializable>(&self) -> SerializationResult<Fingerprint> {
        self.build_schema::<T>()?.fingerprint()
    }

    pub fn serialize<T: Serializable>(
        &self,
        value: &T,
        context: &SerializationContext,
    ) -> SerializationResult<SerializedBytes> {
        encoder::serialize(self, value, context)
    }

    pub fn deserialize<T: Serializable>(
        &self,
        bytes: &[u8],
        context: &SerializationContext,
    ) -> SerializationResult<T> {
        decoder::deserialize(self, bytes, context)
    }
}
