//! Malformed, tampered and unsupported envelopes.

mod common;

use carapace_engine::carapace_model::{
    FieldSpec, Fingerprint, PrimitiveType, Schema, TransformsSchema, TypeModel, TypeRef, Value, fingerprint_schema,
};
use carapace_engine::envelope::{CURRENT_VERSION, DescribedType, MAGIC, SchemaSection, parse_envelope, write_envelope};
use carapace_engine::{AcceptAllEncodings, ByteWriter, DecodeLimits, ErrorKind, SerializerFactory};
use common::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;

const VERSION_OFFSET: usize = 4;
const ENCODING_OFFSET: usize = 5;

fn person_bytes() -> Vec<u8> {
    SerializerFactory::new()
        .serialize(&alice(), &context())
        .unwrap()
        .into_vec()
}

fn decode(bytes: &[u8]) -> carapace_engine::SerializationResult<Person> {
    SerializerFactory::new().deserialize::<Person>(bytes, &context())
}

// =============================================================================
// FRAMING
// =============================================================================

#[test]
fn envelope_starts_with_magic_and_version() {
    let bytes = person_bytes();
    assert_eq!(&bytes[..4], MAGIC);
    assert_eq!(bytes[VERSION_OFFSET], 1);
    assert_eq!(bytes[ENCODING_OFFSET], 0);
}

#[test]
fn empty_input_is_malformed() {
    assert_eq!(decode(&[]).unwrap_err().kind(), ErrorKind::MalformedEnvelope);
}

#[test]
fn wrong_magic_is_malformed() {
    let mut bytes = person_bytes();
    bytes[0] = b'X';
    assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::MalformedEnvelope);
}

#[test]
fn every_truncation_is_rejected() {
    let bytes = person_bytes();
    for len in 0..bytes.len() {
        let err = decode(&bytes[..len]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEnvelope, "truncated to {len}");
    }
}

#[test]
fn trailing_bytes_are_rejected() {
    let mut bytes = person_bytes();
    bytes.push(0);
    assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::MalformedEnvelope);
}

#[test]
fn oversized_envelope_is_rejected() {
    let bytes = person_bytes();
    let limits = DecodeLimits {
        max_envelope_bytes: bytes.len() - 1,
        ..DecodeLimits::default()
    };
    let context = context().with_limits(limits);
    let err = SerializerFactory::new()
        .deserialize::<Person>(&bytes, &context)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
}

// =============================================================================
// VERSION AND ENCODING
// =============================================================================

#[test]
fn unknown_version_is_unsupported() {
    let mut bytes = person_bytes();
    bytes[VERSION_OFFSET] = 9;
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
    assert!(err.to_string().contains('9'), "{err}");
}

#[test]
fn claimed_encoding_is_rejected_by_default() {
    let mut bytes = person_bytes();
    bytes[ENCODING_OFFSET] = 2;
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncodingRejected);
    assert!(err.to_string().contains("snappy"), "{err}");
}

#[test]
fn accepted_encoding_is_still_unreadable() {
    let mut bytes = person_bytes();
    bytes[ENCODING_OFFSET] = 1;
    let context = context().with_encoding_whitelist(Arc::new(AcceptAllEncodings));
    let err = SerializerFactory::new()
        .deserialize::<Person>(&bytes, &context)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
    assert!(err.to_string().contains("deflate"), "{err}");
}

#[test]
fn unknown_encoding_tag_is_malformed() {
    let mut bytes = person_bytes();
    bytes[ENCODING_OFFSET] = 0x7f;
    assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::MalformedEnvelope);
}

// =============================================================================
// SCHEMA TAMPERING
// =============================================================================

/// Re-frames `bytes` after `edit` has changed its schema section.
fn reframe(bytes: &[u8], edit: impl FnOnce(&mut carapace_engine::envelope::SchemaSection)) -> Vec<u8> {
    let envelope = parse_envelope(bytes, &DecodeLimits::default()).unwrap();
    let mut schema = envelope.schema.clone();
    edit(&mut schema);
    write_envelope(envelope.version, &schema, &envelope.transforms, envelope.data).unwrap()
}

#[test]
fn reframing_unchanged_schema_is_lossless() {
    let bytes = person_bytes();
    assert_eq!(reframe(&bytes, |_| {}), bytes);
}

#[test]
fn declared_fingerprint_must_match() {
    let zero = Fingerprint::parse(&"00".repeat(32)).unwrap();
    let bytes = reframe(&person_bytes(), |schema| schema.entries[0].fingerprint = zero);
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
    assert!(err.to_string().contains("fingerprint mismatch"), "{err}");
}

#[test]
fn edited_entry_without_new_fingerprint_is_caught() {
    let bytes = reframe(&person_bytes(), |schema| {
        let entry = schema
            .entries
            .iter_mut()
            .find(|e| e.model.type_name == "app.Address")
            .unwrap();
        entry.model.markers.push("app.Injected".into());
    });
    assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::MalformedEnvelope);
}

#[test]
fn dangling_reference_is_malformed() {
    let bytes = reframe(&person_bytes(), |schema| {
        schema.entries.retain(|e| e.model.type_name != "app.Address");
    });
    assert_eq!(decode(&bytes).unwrap_err().kind(), ErrorKind::MalformedEnvelope);
}

#[test]
fn too_many_schema_entries_are_rejected() {
    let bytes = person_bytes();
    let limits = DecodeLimits {
        max_schema_entries: 1,
        ..DecodeLimits::default()
    };
    let err = parse_envelope(&bytes, &limits).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
}

#[test]
fn long_schema_chain_is_verified_without_overflow() {
    // Honest fingerprints over a chain far deeper than any value limit.
    let len = 3_000;
    let models: Vec<TypeModel> = (0..len)
        .map(|i| {
            let fields = if i + 1 < len {
                vec![FieldSpec::nullable("next", TypeRef::named(format!("deep.T{}", i + 1)))]
            } else {
                Vec::new()
            };
            TypeModel::composite(format!("deep.T{i}"), fields)
        })
        .collect();
    let schema = Schema::from_entries(models).unwrap();
    let fingerprints = fingerprint_schema(&schema).unwrap();
    let section = SchemaSection {
        root: TypeRef::Primitive(PrimitiveType::I32),
        entries: schema
            .entries()
            .iter()
            .zip(fingerprints)
            .map(|(model, fingerprint)| DescribedType {
                fingerprint,
                model: model.clone(),
            })
            .collect(),
    };
    let mut writer = ByteWriter::new(&schema);
    writer.write(&Value::I32(1)).unwrap();
    let bytes = write_envelope(CURRENT_VERSION, &section, &TransformsSchema::new(), &writer.into_bytes()).unwrap();

    assert_eq!(decode_i32(&bytes).unwrap(), 1);

    let limits = DecodeLimits {
        max_schema_entries: len - 1,
        ..DecodeLimits::default()
    };
    let err = SerializerFactory::new()
        .deserialize::<i32>(&bytes, &context().with_limits(limits))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
}

fn decode_i32(bytes: &[u8]) -> carapace_engine::SerializationResult<i32> {
    SerializerFactory::new().deserialize::<i32>(bytes, &context())
}

// =============================================================================
// DATA SECTION
// =============================================================================

#[test]
fn corrupted_data_never_panics() {
    let bytes = person_bytes();
    let envelope = parse_envelope(&bytes, &DecodeLimits::default()).unwrap();
    let data_start = bytes.len() - envelope.data.len();
    for i in data_start..bytes.len() {
        let mut corrupt = bytes.clone();
        corrupt[i] ^= 0xff;
        // Any outcome but a panic is acceptable.
        let _ = decode(&corrupt);
    }
}

#[test]
fn deep_nesting_is_bounded_on_decode() {
    let nested: Vec<Vec<Vec<i32>>> = vec![vec![vec![1]]];
    let factory = SerializerFactory::new();
    let bytes = factory.serialize(&nested, &context()).unwrap();
    let limits = DecodeLimits {
        max_depth: 2,
        ..DecodeLimits::default()
    };
    let err = factory
        .deserialize::<Vec<Vec<Vec<i32>>>>(bytes.as_slice(), &context().with_limits(limits))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DepthExceeded);
}
