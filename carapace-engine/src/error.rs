//! Error types for the serialization engine.

use carapace_model::{ModelError, Value};
use thiserror::Error;

/// Result type for serialization operations.
pub type SerializationResult<T> = Result<T, SerializationError>;

/// Why a type has no viable encode or decode strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotSerializableReason {
    /// A nested type that captures an enclosing instance.
    #[error("synthetic field / nested inner class (enclosed by '{enclosing}')")]
    InnerClass { enclosing: String },

    /// Closures and other values without a canonical field representation.
    #[error("synthetic classes not supported")]
    Synthetic,

    #[error("property '{property}' of '{type_name}' is non public")]
    NonPublicProperty { type_name: String, property: String },

    #[error("no public constructor")]
    NoPublicConstructor,

    #[error("constructor does not match properties: {detail}")]
    ConstructorMismatch { detail: String },

    #[error("property '{property}' is declared twice")]
    DuplicateProperty { property: String },

    #[error("enum constant '{constant}' is declared twice")]
    DuplicateConstant { constant: String },

    #[error("property '{property}' was not written")]
    MissingProperty { property: String },

    #[error("property '{property}' is not declared")]
    UndeclaredProperty { property: String },

    #[error("'{constant}' is not a declared constant")]
    UnknownConstant { constant: String },

    #[error("not described as a composite type")]
    NotComposite,

    #[error("not described as an enum type")]
    NotEnum,

    #[error("custom proxy type must be a composite")]
    ProxyNotComposite,

    #[error("no custom serializer is registered")]
    NoSerializer,

    #[error("no subtype reader is registered for bound '{bound}'")]
    NoSubtypeReader { bound: String },

    /// The graph needs a backreference but the context forbids them.
    #[error("object references are disabled and the object graph is cyclic")]
    ObjectReferencesDisabled,
}

/// Stable discriminant of [`SerializationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotSerializable,
    EvolutionIncompatible,
    WhitelistRejected,
    MalformedEnvelope,
    ReferenceTable,
    EncodingRejected,
    UnsupportedVersion,
    DepthExceeded,
    CustomSerializer,
    Model,
    Config,
}

/// Errors reported by `serialize` and `deserialize`.
#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    /// A reachable type cannot be encoded (or decoded) by any strategy.
    #[error("type '{type_name}' is not serializable: {reason}")]
    NotSerializable {
        type_name: String,
        reason: NotSerializableReason,
    },

    /// The envelope is well formed but the local type cannot consume it.
    #[error("cannot evolve '{type_name}': {reason}")]
    EvolutionIncompatible { type_name: String, reason: String },

    /// The envelope names a type the whitelist does not permit.
    #[error("type '{type_name}' is not whitelisted for deserialization")]
    WhitelistRejected { type_name: String },

    /// Framing, schema or data section is inconsistent or truncated.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A backreference that cannot be resolved.
    #[error("reference table error: {0}")]
    ReferenceTable(String),

    /// The envelope claims a data encoding the context does not accept.
    #[error("encoding rejected: {0}")]
    EncodingRejected(String),

    #[error("unsupported serialization version {0}")]
    UnsupportedVersion(u8),

    #[error("nesting depth exceeds the limit of {0}")]
    DepthExceeded(usize),

    /// A registered custom serializer failed to rebuild its target.
    #[error("custom serializer for '{type_name}' failed: {reason}")]
    CustomSerializer { type_name: String, reason: String },

    #[error("type model error: {0}")]
    Model(#[from] ModelError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SerializationError {
    pub fn not_serializable(type_name: impl Into<String>, reason: NotSerializableReason) -> Self {
        Self::NotSerializable {
            type_name: type_name.into(),
            reason,
        }
    }

    pub fn evolution(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EvolutionIncompatible {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedEnvelope(detail.into())
    }

    pub fn custom(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CustomSerializer {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// A decoded value of the wrong shape for the type reading it.
    pub fn unexpected(expected: &str, found: &Value) -> Self {
        Self::MalformedEnvelope(format!("expected {expected}, found {}", found.kind_name()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSerializable { .. } => ErrorKind::NotSerializable,
            Self::EvolutionIncompatible { .. } => ErrorKind::EvolutionIncompatible,
            Self::WhitelistRejected { .. } => ErrorKind::WhitelistRejected,
            Self::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            Self::ReferenceTable(_) => ErrorKind::ReferenceTable,
            Self::EncodingRejected(_) => ErrorKind::EncodingRejected,
            Self::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Self::DepthExceeded(_) => ErrorKind::DepthExceeded,
            Self::CustomSerializer { .. } => ErrorKind::CustomSerializer,
            Self::Model(_) => ErrorKind::Model,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The type named by the error, when there is one.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::NotSerializable { type_name, .. }
            | Self::EvolutionIncompatible { type_name, .. }
            | Self::WhitelistRejected { type_name }
            | Self::CustomSerializer { type_name, .. } => Some(type_name),
            _ => None,
        }
    }
}
