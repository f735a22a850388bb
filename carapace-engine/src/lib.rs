//! Schema-driven binary object serialization for Carapace.
//!
//! Typed values are converted into self-describing envelopes: a schema
//! section listing every type the data needs, with its fingerprint, and a
//! positional data section. Decoding checks the schema first, then rebuilds
//! values into the local types, evolving records whose shape has changed.
//!
//! # Architecture
//!
//! - **SchemaBuilder**: turns Rust types into [`TypeModel`](carapace_model::TypeModel)
//!   entries, rejecting shapes the composite policy does not allow
//! - **SerializerRegistry**: builtin or custom-proxy strategy per type
//! - **Encoder** / **Decoder**: [`WriteContext`] and [`ReadContext`]
//! - **EvolutionResolver**: field mapping for changed shapes, cached per
//!   fingerprint pair
//! - **ObjectReferenceTable**: handles for shared `Arc` identities
//! - **WhitelistGuard**: decode-time allow-list over every schema entry
//!
//! # Example
//!
//! ```
//! use carapace_engine::{SerializationContext, SerializerFactory, impl_composite};
//!
//! #[derive(Debug, PartialEq)]
//! struct Point { x: i32, y: i32 }
//! impl_composite!(Point, "geo.Point", { x: i32, y: i32 });
//!
//! let factory = SerializerFactory::new();
//! let context = SerializationContext::default();
//! let bytes = factory.serialize(&Point { x: 1, y: 2 }, &context).unwrap();
//! let back: Point = factory.deserialize(bytes.as_slice(), &context).unwrap();
//! assert_eq!(back, Point { x: 1, y: 2 });
//! ```

pub mod context;
mod data;
mod decoder;
mod encoder;
pub mod envelope;
mod error;
pub mod evolution;
mod factory;
pub mod inspect;
mod macros;
pub mod references;
pub mod registry;
mod schema;
mod serializable;
pub mod whitelist;

pub use carapace_model;

pub use context::{
    AcceptAllEncodings, AcceptedEncodings, ContextConfig, DecodeLimits, EncodingWhitelist, NoEncodings,
    QuickEncodingWhitelist, SerializationContext, SerializationEncoding, UseCase,
};
pub use data::{ByteReader, ByteWriter};
pub use decoder::{ReadContext, RecordReader, RemoteSchema};
pub use encoder::{RecordWriter, SerializedBytes, WriteContext};
pub use error::{ErrorKind, NotSerializableReason, SerializationError, SerializationResult};
pub use evolution::{EvolutionPlan, EvolutionResolver, FieldSource, PlanState};
pub use factory::SerializerFactory;
pub use registry::{CustomSerializer, SerializerRegistry, Strategy};
pub use schema::{Access, BuiltSchema, EnumShape, PropertyShape, SchemaBuilder, Shape, Synthetic};
pub use serializable::{Bound, Bytes, DynSerializable, Proxied, Serializable};
pub use whitelist::{
    AllWhitelist, ClassWhitelist, EmptyWhitelist, MutableClassWhitelist, WhitelistConfig, WhitelistGuard,
    WhitelistMode, WhitelistPolicy,
};
