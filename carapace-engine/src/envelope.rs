//! Envelope framing.
//!
//! ```text
//! "CRPC" | version u8 | encoding u8 | schema | transforms | data
//! ```
//!
//! Each section is a u32 big-endian length followed by its bytes. The schema
//! and transforms sections are bincode, so the schema can be parsed and
//! checked without touching the data section.

use crate::context::{DecodeLimits, SerializationEncoding};
use crate::error::{SerializationError, SerializationResult};
use bincode::Options;
use carapace_model::{Fingerprint, TransformsSchema, TypeModel, TypeRef};
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 4] = b"CRPC";

/// Version written when the context does not prefer another.
pub const CURRENT_VERSION: u8 = 1;

/// Versions this build reads and writes.
pub const SUPPORTED_VERSIONS: &[u8] = &[1];

const HEADER_LEN: usize = MAGIC.len() + 2;

/// One schema entry with the fingerprint its writer computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribedType {
    pub fingerprint: Fingerprint,
    pub model: TypeModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSection {
    /// How the root value refers to its type.
    pub root: TypeRef,
    /// Record and enum values index into this list.
    pub entries: Vec<DescribedType>,
}

/// A parsed envelope. The data section is left undecoded.
#[derive(Debug, Clone)]
pub struct Envelope<'b> {
    pub version: u8,
    pub encoding: Option<SerializationEncoding>,
    pub schema: SchemaSection,
    pub transforms: TransformsSchema,
    pub data: &'b [u8],
}

fn bincode_options(limit: usize) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(limit as u64)
}

fn push_section(out: &mut Vec<u8>, name: &str, section: &[u8]) -> SerializationResult<()> {
    let len = u32::try_from(section.len())
        .map_err(|_| SerializationError::malformed(format!("{name} section too large: {} bytes", section.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(section);
    Ok(())
}

/// Frames the three sections into envelope bytes.
pub fn write_envelope(
    version: u8,
    schema: &SchemaSection,
    transforms: &TransformsSchema,
    data: &[u8],
) -> SerializationResult<Vec<u8>> {
    let schema_bytes = bincode_options(u32::MAX as usize)
        .serialize(schema)
        .map_err(|e| SerializationError::malformed(format!("schema section encode error: {e}")))?;
    let transform_bytes = bincode_options(u32::MAX as usize)
        .serialize(transforms)
        .map_err(|e| SerializationError::malformed(format!("transforms section encode error: {e}")))?;

    let mut out =
        Vec::with_capacity(HEADER_LEN + 12 + schema_bytes.len() + transform_bytes.len() + data.len());
    out.extend_from_slice(MAGIC);
    out.push(version);
    // No data encoding is ever applied on write.
    out.push(0);
    push_section(&mut out, "schema", &schema_bytes)?;
    push_section(&mut out, "transforms", &transform_bytes)?;
    push_section(&mut out, "data", data)?;
    Ok(out)
}

struct Cursor<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    fn section(&mut self, name: &str) -> SerializationResult<&'b [u8]> {
        let bytes: &'b [u8] = self.bytes;
        let len_bytes = bytes
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| SerializationError::malformed(format!("truncated {name} section length")))?;
        let mut len = [0u8; 4];
        len.copy_from_slice(len_bytes);
        let len = u32::from_be_bytes(len) as usize;
        self.pos += 4;

        // Validate size before slicing
        if len > bytes.len() - self.pos {
            return Err(SerializationError::malformed(format!(
                "{name} section claims {len} bytes, {} remain",
                bytes.len() - self.pos
            )));
        }
        let section = &bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(section)
    }
}

/// Parses the header and the schema and transforms sections.
pub fn parse_envelope<'b>(bytes: &'b [u8], limits: &DecodeLimits) -> SerializationResult<Envelope<'b>> {
    if bytes.len() > limits.max_envelope_bytes {
        return Err(SerializationError::malformed(format!(
            "envelope of {} bytes exceeds the limit of {}",
            bytes.len(),
            limits.max_envelope_bytes
        )));
    }
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(SerializationError::malformed("missing envelope magic"));
    }

    let version = bytes[MAGIC.len()];
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(SerializationError::UnsupportedVersion(version));
    }
    let encoding = match bytes[MAGIC.len() + 1] {
        0 => None,
        tag => Some(
            SerializationEncoding::from_tag(tag)
                .ok_or_else(|| SerializationError::malformed(format!("unknown data encoding {tag}")))?,
        ),
    };

    let mut cursor = Cursor {
        bytes,
        pos: HEADER_LEN,
    };
    let schema_bytes = cursor.section("schema")?;
    let transform_bytes = cursor.section("transforms")?;
    let data = cursor.section("data")?;
    if cursor.pos != bytes.len() {
        return Err(SerializationError::malformed(format!(
            "{} trailing bytes after envelope",
            bytes.len() - cursor.pos
        )));
    }

    let schema: SchemaSection = bincode_options(schema_bytes.len())
        .deserialize(schema_bytes)
        .map_err(|e| SerializationError::malformed(format!("schema section decode error: {e}")))?;
    if schema.entries.len() > limits.max_schema_entries {
        return Err(SerializationError::malformed(format!(
            "schema of {} entries exceeds the limit of {}",
            schema.entries.len(),
            limits.max_schema_entries
        )));
    }
    let transforms: TransformsSchema = bincode_options(transform_bytes.len())
        .deserialize(transform_bytes)
        .map_err(|e| SerializationError::malformed(format!("transforms section decode error: {e}")))?;

    Ok(Envelope {
        version,
        encoding,
        schema,
        transforms,
        data,
    })
}
