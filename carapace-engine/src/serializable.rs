//! The `Serializable` trait and its builtin implementations.

use crate::decoder::ReadContext;
use crate::encoder::WriteContext;
use crate::error::{SerializationError, SerializationResult};
use crate::schema::SchemaBuilder;
use carapace_model::{PrimitiveType, Restriction, TypeRef, Value};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

/// A type the engine can describe, encode and decode.
///
/// `describe` registers the type's schema entry (if any) and returns how
/// fields refer to it. `encode` and `decode` convert between the type and
/// its [`Value`] form; composites use [`WriteContext::record`] and
/// [`ReadContext::record`] so fields are placed by declared order and
/// evolved when the writer's shape differs.
pub trait Serializable: Sized + Send + Sync + 'static {
    /// Whether the type admits null.
    const NULLABLE: bool = false;

    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef>;

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value>;

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self>;

    /// The value a reader uses when a defaulted field is absent remotely.
    fn absent() -> Option<Self> {
        None
    }

    /// First phase of decoding a shared identity. A type that can close an
    /// identity cycle builds itself here without the fields that point back,
    /// and reads those in [`populate`](Self::populate) once the instance is
    /// reachable through its handle.
    fn construct(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        Self::decode(value, cx)
    }

    /// Second phase of decoding a shared identity.
    fn populate(&self, _value: &Value, _cx: &mut ReadContext<'_>) -> SerializationResult<()> {
        Ok(())
    }
}

/// Object-safe encode half of [`Serializable`], for covariant elements.
pub trait DynSerializable: Any + Send + Sync {
    fn write_dyn(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value>;

    fn as_any(&self) -> &dyn Any;
}

impl<T: Serializable> DynSerializable for T {
    fn write_dyn(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        cx.write_element(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A covariant element bound, implemented on `dyn Trait`:
///
/// ```ignore
/// trait Shape: DynSerializable { fn area(&self) -> f64; }
/// impl Bound for dyn Shape { const BOUND: &'static str = "geo.Shape"; }
/// ```
///
/// `Box<dyn Shape>` then serializes each element under its runtime type.
/// Readers register every concrete type with
/// [`SerializerFactory::register_subtype`](crate::SerializerFactory::register_subtype).
pub trait Bound: DynSerializable {
    const BOUND: &'static str;
}

impl<B: ?Sized + Bound> Serializable for Box<B> {
    fn describe(_builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        Ok(TypeRef::any(B::BOUND))
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let element: &B = self;
        element.write_dyn(cx)
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        cx.subtype::<B>(value)
    }
}

/// Wraps a type that only has a custom serializer so it can appear anywhere
/// a `Serializable` is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proxied<T>(pub T);

impl<T: Any + Send + Sync> Serializable for Proxied<T> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        builder.custom_type_ref_of::<T>()
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        cx.write_custom(&self.0)
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        cx.read_custom::<T>(value).map(Proxied)
    }
}

/// An opaque byte string. `Vec<u8>` is a list of `u8`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Serializable for Bytes {
    fn describe(_builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        Ok(TypeRef::Primitive(PrimitiveType::Bytes))
    }

    fn encode(&self, _cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        Ok(Value::Bytes(self.0.clone()))
    }

    fn decode(value: &Value, _cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        match value {
            Value::Bytes(bytes) => Ok(Bytes(bytes.clone())),
            other => Err(SerializationError::unexpected("bytes", other)),
        }
    }
}

// Each primitive also accepts the narrower variants that widen into it.
macro_rules! primitive {
    ($ty:ty, $prim:ident, $variant:ident $(, $wide:ident)*) => {
        impl Serializable for $ty {
            fn describe(_builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
                Ok(TypeRef::Primitive(PrimitiveType::$prim))
            }

            fn encode(&self, _cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
                Ok(Value::$variant(*self))
            }

            fn decode(value: &Value, _cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
                match value {
                    Value::$variant(v) => Ok(*v),
                    $(Value::$wide(v) => Ok(<$ty>::from(*v)),)*
                    other => Err(SerializationError::unexpected(PrimitiveType::$prim.name(), other)),
                }
            }
        }
    };
}

primitive!(bool, Bool, Bool);
primitive!(i8, I8, I8);
primitive!(i16, I16, I16, I8, U8);
primitive!(i32, I32, I32, I8, I16, U8, U16);
primitive!(i64, I64, I64, I8, I16, I32, U8, U16, U32);
primitive!(u8, U8, U8);
primitive!(u16, U16, U16, U8);
primitive!(u32, U32, U32, U8, U16);
primitive!(u64, U64, U64, U8, U16, U32);
primitive!(f32, F32, F32);
primitive!(f64, F64, F64, F32, I8, I16, I32, U8, U16);
primitive!(char, Char, Char);

impl Serializable for String {
    fn describe(_builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        Ok(TypeRef::Primitive(PrimitiveType::String))
    }

    fn encode(&self, _cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        Ok(Value::String(self.clone()))
    }

    fn decode(value: &Value, _cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Char(c) => Ok(c.to_string()),
            other => Err(SerializationError::unexpected("string", other)),
        }
    }
}

impl<T: Serializable> Serializable for Option<T> {
    const NULLABLE: bool = true;

    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        builder.type_ref_of::<T>()
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        match self {
            Some(value) => cx.write(value),
            None => Ok(Value::Null),
        }
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        if value.is_null() {
            return Ok(None);
        }
        cx.read::<T>(value).map(Some)
    }

    fn absent() -> Option<Self> {
        Some(None)
    }
}

/// Shared identity. Repeated occurrences of one `Arc` are written once and
/// referenced by handle; decoding yields a single shared instance.
impl<T: Serializable> Serializable for Arc<T> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        builder.type_ref_of::<T>()
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        cx.shared(self)
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        cx.shared::<T>(value)
    }
}

fn list_items<'v>(value: &'v Value) -> SerializationResult<&'v [Value]> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(SerializationError::unexpected("list", other)),
    }
}

fn map_entries<'v>(value: &'v Value) -> SerializationResult<&'v [(Value, Value)]> {
    match value {
        Value::Map(entries) => Ok(entries),
        other => Err(SerializationError::unexpected("map", other)),
    }
}

impl<T: Serializable> Serializable for Vec<T> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        let element = builder.type_ref_of::<T>()?;
        builder.restricted(Restriction::List { element })
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let items = self.iter().map(|item| cx.write(item)).collect::<Result<_, _>>()?;
        Ok(Value::List(items))
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        list_items(value)?.iter().map(|item| cx.read::<T>(item)).collect()
    }
}

impl<T: Serializable, const N: usize> Serializable for [T; N] {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        let element = builder.type_ref_of::<T>()?;
        builder.restricted(Restriction::Array { element })
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let items = self.iter().map(|item| cx.write(item)).collect::<Result<_, _>>()?;
        Ok(Value::List(items))
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        let items = list_items(value)?;
        if items.len() != N {
            return Err(SerializationError::malformed(format!(
                "array of {N} elements holds {}",
                items.len()
            )));
        }
        let decoded: Vec<T> = items.iter().map(|item| cx.read::<T>(item)).collect::<Result<_, _>>()?;
        decoded
            .try_into()
            .map_err(|_| SerializationError::malformed("array length changed while decoding"))
    }
}

impl<T: Serializable + Eq + Hash> Serializable for HashSet<T> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        let element = builder.type_ref_of::<T>()?;
        builder.restricted(Restriction::Set { element })
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let items = self.iter().map(|item| cx.write(item)).collect::<Result<_, _>>()?;
        Ok(Value::List(items))
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        list_items(value)?.iter().map(|item| cx.read::<T>(item)).collect()
    }
}

impl<T: Serializable + Ord> Serializable for BTreeSet<T> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        let element = builder.type_ref_of::<T>()?;
        builder.restricted(Restriction::Set { element })
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let items = self.iter().map(|item| cx.write(item)).collect::<Result<_, _>>()?;
        Ok(Value::List(items))
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        list_items(value)?.iter().map(|item| cx.read::<T>(item)).collect()
    }
}

impl<K: Serializable + Eq + Hash, V: Serializable> Serializable for HashMap<K, V> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        let key = builder.type_ref_of::<K>()?;
        let value = builder.type_ref_of::<V>()?;
        builder.restricted(Restriction::Map { key, value })
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let mut entries = Vec::with_capacity(self.len());
        for (k, v) in self {
            entries.push((cx.write(k)?, cx.write(v)?));
        }
        Ok(Value::Map(entries))
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        map_entries(value)?
            .iter()
            .map(|(k, v)| -> SerializationResult<(K, V)> { Ok((cx.read::<K>(k)?, cx.read::<V>(v)?)) })
            .collect()
    }
}

impl<K: Serializable + Ord, V: Serializable> Serializable for BTreeMap<K, V> {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        let key = builder.type_ref_of::<K>()?;
        let value = builder.type_ref_of::<V>()?;
        builder.restricted(Restriction::Map { key, value })
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let mut entries = Vec::with_capacity(self.len());
        for (k, v) in self {
            entries.push((cx.write(k)?, cx.write(v)?));
        }
        Ok(Value::Map(entries))
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        map_entries(value)?
            .iter()
            .map(|(k, v)| -> SerializationResult<(K, V)> { Ok((cx.read::<K>(k)?, cx.read::<V>(v)?)) })
            .collect()
    }
}
