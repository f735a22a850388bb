use std::sync::Arc;

/// Dynamic intermediate form of encoded data.
///
/// Encoders turn typed objects into a `Value` tree which is written
/// positionally; decoders read the tree back before any typed object is
/// constructed. Record and enum values refer to schema entries by index.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Enum { type_index: u32, constant: String },
    Record(Record),
    /// First occurrence of a shared identity, tagged with its handle.
    Shared { handle: u32, value: Arc<Value> },
    /// Later occurrence of a shared identity.
    BackRef(u32),
}

/// A composite value: one slot per declared field, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_index: u32,
    pub fields: Vec<Value>,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short variant name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::I16(_) => "i16",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U8(_) => "u8",
            Value::U16(_) => "u16",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Enum { .. } => "enum",
            Value::Record(_) => "record",
            Value::Shared { .. } => "shared",
            Value::BackRef(_) => "backref",
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }
}
