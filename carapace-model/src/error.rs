//! Error types for the type model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while assembling or hashing type models.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A strict schema (as parsed from an envelope) lists a name twice.
    #[error("type '{0}' appears more than once in the schema")]
    DuplicateType(String),

    /// Two entries in one schema share a name but not a shape.
    #[error("type '{0}' is defined more than once with different shapes")]
    ConflictingDefinition(String),

    /// A field or element refers to a type the schema does not contain.
    #[error("type '{from}' references '{to}', which is not part of the schema")]
    DanglingReference { from: String, to: String },

    /// Lookup of a type name that is not in the schema.
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// A fingerprint string could not be parsed.
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),
}
