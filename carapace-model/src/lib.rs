//! Type model for the Carapace serialization engine.
//!
//! Defines the pure data that every other Carapace component depends on:
//! - [`TypeModel`]: how a type decomposes into named, typed fields
//!   (composite) or into a restricted collection or enum
//! - [`FieldSpec`] / [`TypeRef`]: one field of a composite and what it points at
//! - [`Schema`]: an ordered set of entries with unique type names
//! - [`Fingerprint`] / [`Fingerprinter`]: canonical structural identity
//! - [`Value`]: the dynamic intermediate form written to and read from envelopes
//! - [`TransformsSchema`]: enum evolution metadata carried next to the schema
//!
//! Nothing in this crate knows about Rust types or registries; it only
//! describes shapes and hashes them.

mod error;
mod fingerprint;
mod model;
mod primitive;
mod transform;
mod value;

pub use error::{ModelError, ModelResult};
pub use fingerprint::{Fingerprint, Fingerprinter, fingerprint, fingerprint_schema};
pub use model::{FieldSpec, Restriction, Schema, TypeKind, TypeModel, TypeRef};
pub use primitive::PrimitiveType;
pub use transform::{EnumTransform, TransformsSchema};
pub use value::{Record, Value};
