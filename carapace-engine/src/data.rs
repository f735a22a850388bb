//! Data section byte codec.
//!
//! Each value is a tag byte followed by its payload. Integers are LEB128
//! varints (zigzag for signed), floats are little-endian bits and strings,
//! bytes and collections are length prefixed. Record payloads carry no
//! field count: the schema entry named by the record's type index fixes it,
//! so field positions follow declared order.

use crate::context::DecodeLimits;
use crate::error::{SerializationError, SerializationResult};
use carapace_model::{Record, Schema, TypeModel, Value};
use std::collections::HashSet;
use std::sync::Arc;

const NULL: u8 = 0x00;
const FALSE: u8 = 0x01;
const TRUE: u8 = 0x02;
const I8: u8 = 0x03;
const I16: u8 = 0x04;
const I32: u8 = 0x05;
const I64: u8 = 0x06;
const U8: u8 = 0x07;
const U16: u8 = 0x08;
const U32: u8 = 0x09;
const U64: u8 = 0x0A;
const F32: u8 = 0x0B;
const F64: u8 = 0x0C;
const CHAR: u8 = 0x0D;
const STRING: u8 = 0x0E;
const BYTES: u8 = 0x0F;
const LIST: u8 = 0x10;
const MAP: u8 = 0x11;
const ENUM: u8 = 0x12;
const RECORD: u8 = 0x13;
const SHARED: u8 = 0x14;
const BACKREF: u8 = 0x15;

fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn entry<'s>(schema: &'s Schema, type_index: u32) -> SerializationResult<&'s TypeModel> {
    schema
        .entry(type_index as usize)
        .ok_or_else(|| SerializationError::malformed(format!("type index {type_index} out of range")))
}

/// Writes a [`Value`] tree into data section bytes.
pub struct ByteWriter<'s> {
    schema: &'s Schema,
    buf: Vec<u8>,
}

impl<'s> ByteWriter<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            buf: Vec::new(),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7F) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    fn tagged(&mut self, tag: u8, v: u64) {
        self.buf.push(tag);
        self.varint(v);
    }

    fn prefix(&mut self, tag: u8, len: usize) {
        self.tagged(tag, len as u64);
    }

    pub fn write(&mut self, value: &Value) -> SerializationResult<()> {
        match value {
            Value::Null => self.buf.push(NULL),
            Value::Bool(false) => self.buf.push(FALSE),
            Value::Bool(true) => self.buf.push(TRUE),
            Value::I8(v) => self.tagged(I8, zigzag(i64::from(*v))),
            Value::I16(v) => self.tagged(I16, zigzag(i64::from(*v))),
            Value::I32(v) => self.tagged(I32, zigzag(i64::from(*v))),
            Value::I64(v) => self.tagged(I64, zigzag(*v)),
            Value::U8(v) => self.tagged(U8, u64::from(*v)),
            Value::U16(v) => self.tagged(U16, u64::from(*v)),
            Value::U32(v) => self.tagged(U32, u64::from(*v)),
            Value::U64(v) => self.tagged(U64, *v),
            Value::F32(v) => {
                self.buf.push(F32);
                self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Value::F64(v) => {
                self.buf.push(F64);
                self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
            }
            Value::Char(c) => self.tagged(CHAR, u64::from(u32::from(*c))),
            Value::String(s) => {
                self.prefix(STRING, s.len());
                self.buf.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                self.prefix(BYTES, b.len());
                self.buf.extend_from_slice(b);
            }
            Value::List(items) => {
                self.prefix(LIST, items.len());
                for item in items {
                    self.write(item)?;
                }
            }
            Value::Map(entries) => {
                self.prefix(MAP, entries.len());
                for (k, v) in entries {
                    self.write(k)?;
                    self.write(v)?;
                }
            }
            Value::Enum {
                type_index,
                constant,
            } => {
                let model = entry(self.schema, *type_index)?;
                let ordinal = model
                    .enum_values()
                    .and_then(|values| values.iter().position(|v| v == constant))
                    .ok_or_else(|| {
                        SerializationError::malformed(format!(
                            "'{constant}' is not a constant of '{}'",
                            model.type_name
                        ))
                    })?;
                self.tagged(ENUM, u64::from(*type_index));
                self.varint(ordinal as u64);
            }
            Value::Record(record) => {
                let model = entry(self.schema, record.type_index)?;
                if !model.is_composite() || model.fields().len() != record.fields.len() {
                    return Err(SerializationError::malformed(format!(
                        "record does not match the shape of '{}'",
                        model.type_name
                    )));
                }
                self.tagged(RECORD, u64::from(record.type_index));
                for field in &record.fields {
                    self.write(field)?;
                }
            }
            Value::Shared { handle, value } => {
                self.tagged(SHARED, u64::from(*handle));
                self.write(value)?;
            }
            Value::BackRef(handle) => self.tagged(BACKREF, u64::from(*handle)),
        }
        Ok(())
    }
}

/// Reads data section bytes into a bounded [`Value`] tree.
pub struct ByteReader<'b, 's> {
    bytes: &'b [u8],
    pos: usize,
    schema: &'s Schema,
    limits: DecodeLimits,
    depth: usize,
    handles: HashSet<u32>,
}

impl<'b, 's> ByteReader<'b, 's> {
    pub fn new(bytes: &'b [u8], schema: &'s Schema, limits: DecodeLimits) -> Self {
        Self {
            bytes,
            pos: 0,
            schema,
            limits,
            depth: 0,
            handles: HashSet::new(),
        }
    }

    /// Reads exactly one value and rejects trailing bytes.
    pub fn read_root(mut self) -> SerializationResult<Value> {
        let value = self.read()?;
        if self.pos != self.bytes.len() {
            return Err(SerializationError::malformed(format!(
                "{} trailing bytes after data",
                self.bytes.len() - self.pos
            )));
        }
        Ok(value)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn byte(&mut self) -> SerializationResult<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| SerializationError::malformed("truncated data section"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn take(&mut self, len: usize) -> SerializationResult<&'b [u8]> {
        if len > self.remaining() {
            return Err(SerializationError::malformed("truncated data section"));
        }
        let bytes: &'b [u8] = self.bytes;
        let slice = &bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn varint(&mut self) -> SerializationResult<u64> {
        let mut result = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = self.byte()?;
            let bits = u64::from(byte & 0x7F);
            if shift == 63 && bits > 1 {
                break;
            }
            result |= bits << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(SerializationError::malformed("varint overflows 64 bits"))
    }

    fn narrow<T: TryFrom<u64>>(&mut self, what: &str) -> SerializationResult<T> {
        let raw = self.varint()?;
        T::try_from(raw).map_err(|_| SerializationError::malformed(format!("{what} {raw} out of range")))
    }

    fn signed<T: TryFrom<i64>>(&mut self, what: &str) -> SerializationResult<T> {
        let raw = unzigzag(self.varint()?);
        T::try_from(raw).map_err(|_| SerializationError::malformed(format!("{what} {raw} out of range")))
    }

    /// A length prefix, bounded by the limits and by the bytes left, given
    /// that each element takes at least `min_size` bytes.
    fn length(&mut self, min_size: usize) -> SerializationResult<usize> {
        let len: usize = self.narrow("length")?;
        if len > self.limits.max_collection_len {
            return Err(SerializationError::malformed(format!(
                "collection of {len} elements exceeds the limit of {}",
                self.limits.max_collection_len
            )));
        }
        if len.saturating_mul(min_size) > self.remaining() {
            return Err(SerializationError::malformed(format!(
                "length {len} overruns the data section"
            )));
        }
        Ok(len)
    }

    fn read(&mut self) -> SerializationResult<Value> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(SerializationError::DepthExceeded(self.limits.max_depth));
        }
        let value = self.read_tagged();
        self.depth -= 1;
        value
    }

    fn read_tagged(&mut self) -> SerializationResult<Value> {
        let tag = self.byte()?;
        let value = match tag {
            NULL => Value::Null,
            FALSE => Value::Bool(false),
            TRUE => Value::Bool(true),
            I8 => Value::I8(self.signed("i8")?),
            I16 => Value::I16(self.signed("i16")?),
            I32 => Value::I32(self.signed("i32")?),
            I64 => Value::I64(unzigzag(self.varint()?)),
            U8 => Value::U8(self.narrow("u8")?),
            U16 => Value::U16(self.narrow("u16")?),
            U32 => Value::U32(self.narrow("u32")?),
            U64 => Value::U64(self.varint()?),
            F32 => {
                let mut bits = [0u8; 4];
                bits.copy_from_slice(self.take(4)?);
                Value::F32(f32::from_bits(u32::from_le_bytes(bits)))
            }
            F64 => {
                let mut bits = [0u8; 8];
                bits.copy_from_slice(self.take(8)?);
                Value::F64(f64::from_bits(u64::from_le_bytes(bits)))
            }
            CHAR => {
                let raw: u32 = self.narrow("char")?;
                let c = char::from_u32(raw)
                    .ok_or_else(|| SerializationError::malformed(format!("invalid char {raw:#x}")))?;
                Value::Char(c)
            }
            STRING => {
                let len = self.length(1)?;
                let raw = self.take(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|e| SerializationError::malformed(format!("invalid utf-8 string: {e}")))?;
                Value::String(s.to_string())
            }
            BYTES => {
                let len = self.length(1)?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            LIST => {
                let len = self.length(1)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read()?);
                }
                Value::List(items)
            }
            MAP => {
                let len = self.length(2)?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let k = self.read()?;
                    let v = self.read()?;
                    entries.push((k, v));
                }
                Value::Map(entries)
            }
            ENUM => {
                let type_index: u32 = self.narrow("type index")?;
                let ordinal: usize = self.narrow("ordinal")?;
                let model = entry(self.schema, type_index)?;
                let values = model.enum_values().ok_or_else(|| {
                    SerializationError::malformed(format!("'{}' is not an enum", model.type_name))
                })?;
                let constant = values.get(ordinal).ok_or_else(|| {
                    SerializationError::malformed(format!(
                        "ordinal {ordinal} out of range for '{}'",
                        model.type_name
                    ))
                })?;
                Value::Enum {
                    type_index,
                    constant: constant.clone(),
                }
            }
            RECORD => {
                let type_index: u32 = self.narrow("type index")?;
                let model = entry(self.schema, type_index)?;
                if !model.is_composite() {
                    return Err(SerializationError::malformed(format!(
                        "'{}' is not a composite",
                        model.type_name
                    )));
                }
                let count = model.fields().len();
                if count > self.remaining() {
                    return Err(SerializationError::malformed("truncated data section"));
                }
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(self.read()?);
                }
                Value::Record(Record { type_index, fields })
            }
            SHARED => {
                let handle: u32 = self.narrow("handle")?;
                // Defined before its value so a cycle can point back at it.
                if !self.handles.insert(handle) {
                    return Err(SerializationError::ReferenceTable(format!(
                        "handle {handle} is defined twice"
                    )));
                }
                let value = self.read()?;
                Value::Shared {
                    handle,
                    value: Arc::new(value),
                }
            }
            BACKREF => {
                let handle: u32 = self.narrow("handle")?;
                if !self.handles.contains(&handle) {
                    return Err(SerializationError::ReferenceTable(format!(
                        "backreference to handle {handle} which was never emitted"
                    )));
                }
                Value::BackRef(handle)
            }
            other => {
                return Err(SerializationError::malformed(format!("unknown value tag {other:#04x}")));
            }
        };
        Ok(value)
    }
}
