//! Declarative implementations of [`Serializable`](crate::Serializable) for
//! plain composites and enums.

/// Implements `Serializable` for a struct whose fields are all public and
/// whose constructor takes every field in order.
///
/// ```ignore
/// struct Person { name: String, age: Option<u32> }
/// impl_composite!(Person, "app.Person", { name: String, age: Option<u32> });
/// impl_composite!(Tagged, "app.Tagged", markers = ["app.Auditable"], { id: u64 });
/// ```
#[macro_export]
macro_rules! impl_composite {
    (
        $ty:ty, $name:literal $(, markers = [$($marker:literal),* $(,)?])?,
        { $($field:ident : $fty:ty),* $(,)? }
    ) => {
        impl $crate::Serializable for $ty {
            fn describe(
                builder: &mut $crate::SchemaBuilder<'_>,
            ) -> $crate::SerializationResult<$crate::carapace_model::TypeRef> {
                let shape = $crate::Shape::new($name)
                    $($(.marker($marker))*)?
                    $(.property::<$fty>(stringify!($field)))*
                    .canonical_constructor();
                builder.composite(shape)
            }

            fn encode(
                &self,
                cx: &mut $crate::WriteContext<'_>,
            ) -> $crate::SerializationResult<$crate::carapace_model::Value> {
                cx.record::<Self>()?
                    $(.field(stringify!($field), &self.$field)?)*
                    .finish()
            }

            #[allow(unused_mut, unused_variables)]
            fn decode(
                value: &$crate::carapace_model::Value,
                cx: &mut $crate::ReadContext<'_>,
            ) -> $crate::SerializationResult<Self> {
                let mut record = cx.record::<Self>(value)?;
                Ok(Self {
                    $($field: record.field::<$fty>(stringify!($field))?,)*
                })
            }
        }
    };
}

/// Implements `Serializable` for a fieldless enum, with optional
/// [`EnumTransform`](crate::carapace_model::EnumTransform)s.
///
/// ```ignore
/// enum Color { Red, Green }
/// impl_enum!(Color, "app.Color", { Red, Green });
/// ```
#[macro_export]
macro_rules! impl_enum {
    (
        $ty:ty, $name:literal, { $($variant:ident),* $(,)? }
        $(, transforms = [$($transform:expr),* $(,)?])?
    ) => {
        impl $crate::Serializable for $ty {
            fn describe(
                builder: &mut $crate::SchemaBuilder<'_>,
            ) -> $crate::SerializationResult<$crate::carapace_model::TypeRef> {
                let shape = $crate::EnumShape::new($name, &[$(stringify!($variant)),*])
                    $($(.transform($transform))*)?;
                builder.enumeration(shape)
            }

            fn encode(
                &self,
                cx: &mut $crate::WriteContext<'_>,
            ) -> $crate::SerializationResult<$crate::carapace_model::Value> {
                let constant = match self {
                    $(Self::$variant => stringify!($variant),)*
                };
                cx.enum_constant::<Self>(constant)
            }

            fn decode(
                value: &$crate::carapace_model::Value,
                cx: &mut $crate::ReadContext<'_>,
            ) -> $crate::SerializationResult<Self> {
                let constant = cx.enum_constant::<Self>(value)?;
                $(
                    if constant == stringify!($variant) {
                        return Ok(Self::$variant);
                    }
                )*
                Err($crate::SerializationError::evolution(
                    $name,
                    format!("unknown constant '{constant}'"),
                ))
            }
        }
    };
}
