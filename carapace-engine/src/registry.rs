//! Serializer strategies, keyed by type identity.
//!
//! A type either uses its own [`Serializable`] implementation (the builtin
//! strategy) or a registered [`CustomSerializer`] that swaps it for a proxy.
//! Custom registrations always win. The registry also keeps readers for
//! covariant `Box<dyn Bound>` elements, keyed by bound and concrete type
//! name.

use crate::decoder::ReadContext;
use crate::encoder::WriteContext;
use crate::error::{SerializationError, SerializationResult};
use crate::schema::SchemaBuilder;
use crate::serializable::{Bound, Serializable};
use carapace_model::{TypeRef, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A serializer for a type that cannot (or should not) describe itself.
///
/// `Target` is replaced on the wire by `Proxy`, which is schema-built and
/// fingerprinted as if it were the real payload. `from_proxy(to_proxy(v))`
/// is expected to reproduce `v`.
pub trait CustomSerializer: Send + Sync + 'static {
    type Target: Any + Send + Sync;
    type Proxy: Serializable;

    /// Logical name of the target, checked against the decode whitelist.
    const TARGET: &'static str;

    fn to_proxy(&self, target: &Self::Target) -> Self::Proxy;

    fn from_proxy(&self, proxy: Self::Proxy) -> SerializationResult<Self::Target>;
}

type ProxyDescribe = for<'a, 'b, 'r> fn(
    &'a ProxyRegistration,
    &'b mut SchemaBuilder<'r>,
) -> SerializationResult<TypeRef>;
type ProxyWrite = for<'a, 'b, 'c, 'w> fn(
    &'a ProxyRegistration,
    &'b dyn Any,
    &'c mut WriteContext<'w>,
) -> SerializationResult<Value>;
type ProxyRead = for<'a, 'b, 'c, 'w> fn(
    &'a ProxyRegistration,
    &'b Value,
    &'c mut ReadContext<'w>,
) -> SerializationResult<Box<dyn Any + Send>>;

/// A type-erased custom serializer.
pub struct ProxyRegistration {
    target: TypeId,
    target_name: &'static str,
    proxy_type: &'static str,
    serializer: Arc<dyn Any + Send + Sync>,
    describe: ProxyDescribe,
    write: ProxyWrite,
    read: ProxyRead,
}

impl fmt::Debug for ProxyRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRegistration")
            .field("target_name", &self.target_name)
            .field("proxy_type", &self.proxy_type)
            .finish()
    }
}

fn serializer_of<S: CustomSerializer>(registration: &ProxyRegistration) -> SerializationResult<&S> {
    registration
        .serializer
        .downcast_ref::<S>()
        .ok_or_else(|| SerializationError::custom(S::TARGET, "registration holds another serializer"))
}

fn describe_proxy<S: CustomSerializer>(
    _registration: &ProxyRegistration,
    builder: &mut SchemaBuilder<'_>,
) -> SerializationResult<TypeRef> {
    builder.type_ref_of::<S::Proxy>()
}

fn write_proxy<S: CustomSerializer>(
    registration: &ProxyRegistration,
    target: &dyn Any,
    cx: &mut WriteContext<'_>,
) -> SerializationResult<Value> {
    let serializer = serializer_of::<S>(registration)?;
    let target = target
        .downcast_ref::<S::Target>()
        .ok_or_else(|| SerializationError::custom(S::TARGET, "value is not the registered target"))?;
    let proxy = serializer.to_proxy(target);
    cx.write(&proxy)
}

fn read_proxy<S: CustomSerializer>(
    registration: &ProxyRegistration,
    value: &Value,
    cx: &mut ReadContext<'_>,
) -> SerializationResult<Box<dyn Any + Send>> {
    let serializer = serializer_of::<S>(registration)?;
    let proxy = cx.read::<S::Proxy>(value)?;
    let target = serializer.from_proxy(proxy)?;
    Ok(Box::new(target))
}

impl ProxyRegistration {
    pub fn new<S: CustomSerializer>(serializer: S) -> Self {
        Self {
            target: TypeId::of::<S::Target>(),
            target_name: S::TARGET,
            proxy_type: std::any::type_name::<S::Proxy>(),
            serializer: Arc::new(serializer),
            describe: describe_proxy::<S>,
            write: write_proxy::<S>,
            read: read_proxy::<S>,
        }
    }

    pub fn target_name(&self) -> &'static str {
        self.target_name
    }

    /// Rust name of the proxy type, for diagnostics.
    pub fn proxy_type(&self) -> &'static str {
        self.proxy_type
    }

    pub(crate) fn describe(&self, builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        (self.describe)(self, builder)
    }

    pub(crate) fn write(&self, target: &dyn Any, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        (self.write)(self, target, cx)
    }

    pub(crate) fn read<T: Any>(&self, value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<T> {
        let target = (self.read)(self, value, cx)?;
        target
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| SerializationError::custom(self.target_name, "proxy produced another type"))
    }
}

/// The strategy the registry resolves for a type.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// The type's own `Serializable` implementation.
    Builtin,
    CustomProxy(Arc<ProxyRegistration>),
}

impl Strategy {
    pub fn is_custom(&self) -> bool {
        matches!(self, Strategy::CustomProxy(_))
    }
}

/// Decodes one concrete implementation of a covariant bound.
pub trait SubtypeReader<B: ?Sized>: Send + Sync {
    fn read(&self, value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Box<B>>;
}

/// Reads a concrete `C` and upcasts it.
pub struct Upcast<C, B: ?Sized> {
    upcast: fn(C) -> Box<B>,
}

impl<C, B: ?Sized> Upcast<C, B> {
    pub fn new(upcast: fn(C) -> Box<B>) -> Self {
        Self { upcast }
    }
}

impl<C: Serializable, B: ?Sized + Bound> SubtypeReader<B> for Upcast<C, B> {
    fn read(&self, value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Box<B>> {
        let concrete = cx.read::<C>(value)?;
        Ok((self.upcast)(concrete))
    }
}

/// Strategies for every type a factory knows about.
#[derive(Debug, Default)]
pub struct SerializerRegistry {
    custom: HashMap<TypeId, Arc<ProxyRegistration>>,
    subtypes: HashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom serializer. Last write wins; the replaced
    /// registration is returned.
    pub fn register_custom<S: CustomSerializer>(&mut self, serializer: S) -> Option<Arc<ProxyRegistration>> {
        let registration = Arc::new(ProxyRegistration::new(serializer));
        self.custom.insert(registration.target, registration)
    }

    pub fn resolve<T: ?Sized + 'static>(&self) -> Strategy {
        self.resolve_id(TypeId::of::<T>())
    }

    pub fn resolve_id(&self, id: TypeId) -> Strategy {
        match self.custom.get(&id) {
            Some(registration) => Strategy::CustomProxy(registration.clone()),
            None => Strategy::Builtin,
        }
    }

    pub(crate) fn custom(&self, id: TypeId) -> Option<&Arc<ProxyRegistration>> {
        self.custom.get(&id)
    }

    pub(crate) fn register_subtype<B: ?Sized + Bound, C: Serializable>(
        &mut self,
        type_name: String,
        upcast: fn(C) -> Box<B>,
    ) {
        let reader: Arc<dyn SubtypeReader<B>> = Arc::new(Upcast::new(upcast));
        self.subtypes
            .insert((TypeId::of::<B>(), type_name), Arc::new(reader));
    }

    pub(crate) fn subtype_reader<B: ?Sized + Bound>(
        &self,
        type_name: &str,
    ) -> Option<Arc<dyn SubtypeReader<B>>> {
        self.subtypes
            .get(&(TypeId::of::<B>(), type_name.to_string()))?
            .downcast_ref::<Arc<dyn SubtypeReader<B>>>()
            .cloned()
    }
}
