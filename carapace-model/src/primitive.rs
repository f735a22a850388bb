use serde::{Deserialize, Serialize};
use std::fmt;

/// Leaf types encoded directly in the data section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
    String,
    Bytes,
}

impl PrimitiveType {
    /// Canonical lowercase name, used in schema display and fingerprints.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Char => "char",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }

    /// Returns true when a value written as `self` can be read losslessly as
    /// `target`.
    ///
    /// This is the complete widening allow-list used by schema evolution:
    ///
    /// | from  | to                              |
    /// |-------|---------------------------------|
    /// | i8    | i16, i32, i64, f64              |
    /// | i16   | i32, i64, f64                   |
    /// | i32   | i64, f64                        |
    /// | u8    | u16, u32, u64, i16, i32, i64, f64 |
    /// | u16   | u32, u64, i32, i64, f64         |
    /// | u32   | u64, i64                        |
    /// | f32   | f64                             |
    /// | char  | string                          |
    ///
    /// Every other change of primitive type is rejected.
    pub fn widens_to(self, target: PrimitiveType) -> bool {
        use PrimitiveType::*;
        self == target
            || matches!(
                (self, target),
                (I8, I16 | I32 | I64 | F64)
                    | (I16, I32 | I64 | F64)
                    | (I32, I64 | F64)
                    | (U8, U16 | U32 | U64 | I16 | I32 | I64 | F64)
                    | (U16, U32 | U64 | I32 | I64 | F64)
                    | (U32, U64 | I64)
                    | (F32, F64)
                    | (Char, String)
            )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
