//! Schema-only inspection of envelopes.
//!
//! [`describe`] reads an envelope without any local types: entries are listed
//! with their declared fingerprints (and whether they verify), and the data
//! section is rendered as JSON using the remote field names.

use crate::context::DecodeLimits;
use crate::data::ByteReader;
use crate::envelope::parse_envelope;
use crate::error::{SerializationError, SerializationResult};
use carapace_model::{EnumTransform, Restriction, Schema, TypeKind, TypeModel, Value, fingerprint_schema};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub type_ref: String,
    pub nullable: bool,
    pub mandatory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSummary {
    pub name: String,
    pub kind: String,
    pub fingerprint: String,
    /// Whether the declared fingerprint matches the recomputed one.
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxies: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub type_name: String,
    pub rules: Vec<String>,
}

/// Everything an envelope says about itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeSummary {
    pub version: u8,
    pub encoding: Option<String>,
    pub root: String,
    pub types: Vec<TypeSummary>,
    pub transforms: Vec<TransformSummary>,
    /// `None` when the data section claims an encoding.
    pub data: Option<serde_json::Value>,
}

impl EnvelopeSummary {
    pub fn all_verified(&self) -> bool {
        self.types.iter().all(|t| t.verified)
    }
}

fn kind_name(model: &TypeModel) -> &'static str {
    match &model.kind {
        TypeKind::Composite { .. } => "composite",
        TypeKind::Restricted(Restriction::List { .. }) => "list",
        TypeKind::Restricted(Restriction::Set { .. }) => "set",
        TypeKind::Restricted(Restriction::Array { .. }) => "array",
        TypeKind::Restricted(Restriction::Map { .. }) => "map",
        TypeKind::Restricted(Restriction::Enum { .. }) => "enum",
    }
}

fn rule(transform: &EnumTransform) -> String {
    match transform {
        EnumTransform::Default { new, old } => format!("default {new} -> {old}"),
        EnumTransform::Rename { from, to } => format!("rename {from} -> {to}"),
    }
}

/// Renders a data value with field names taken from `schema`.
pub fn render(value: &Value, schema: &Schema) -> serde_json::Value {
    use serde_json::{Map, Value as Json, json};

    match value {
        Value::Null => Json::Null,
        Value::Bool(v) => json!(v),
        Value::I8(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::F32(v) => Json::from(f64::from(*v)),
        Value::F64(v) => Json::from(*v),
        Value::Char(c) => Json::String(c.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(hex::encode(b)),
        Value::List(items) => Json::Array(items.iter().map(|v| render(v, schema)).collect()),
        Value::Map(entries) => Json::Array(
            entries
                .iter()
                .map(|(k, v)| Json::Array(vec![render(k, schema), render(v, schema)]))
                .collect(),
        ),
        Value::Enum { constant, .. } => Json::String(constant.clone()),
        Value::Record(record) => {
            let mut object = Map::new();
            let model = schema.entry(record.type_index as usize);
            if let Some(model) = model {
                object.insert("@type".to_string(), Json::String(model.type_name.clone()));
            }
            for (i, field) in record.fields.iter().enumerate() {
                let name = model
                    .and_then(|m| m.fields().get(i))
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| format!("#{i}"));
                object.insert(name, render(field, schema));
            }
            Json::Object(object)
        }
        Value::Shared { handle, value } => match render(value, schema) {
            Json::Object(mut object) => {
                object.insert("@ref".to_string(), json!(handle));
                Json::Object(object)
            }
            other => json!({ "@ref": handle, "value": other }),
        },
        Value::BackRef(handle) => json!({ "@backref": handle }),
    }
}

/// Summarizes `bytes` without decoding into any local type.
pub fn describe(bytes: &[u8], limits: &DecodeLimits) -> SerializationResult<EnvelopeSummary> {
    let envelope = parse_envelope(bytes, limits)?;
    let declared: Vec<_> = envelope.schema.entries.iter().map(|e| e.fingerprint).collect();
    let models = envelope.schema.entries.iter().map(|e| e.model.clone()).collect();
    let schema = Schema::from_entries(models).map_err(|e| SerializationError::malformed(e.to_string()))?;
    // A schema that cannot be fingerprinted verifies nothing.
    let computed = fingerprint_schema(&schema).unwrap_or_default();

    let types = schema
        .iter()
        .zip(&declared)
        .enumerate()
        .map(|(i, (model, fingerprint))| TypeSummary {
            name: model.type_name.clone(),
            kind: kind_name(model).to_string(),
            fingerprint: fingerprint.to_hex(),
            verified: computed.get(i) == Some(fingerprint),
            proxies: model.proxies.clone(),
            markers: model.markers.clone(),
            fields: model
                .fields()
                .iter()
                .map(|f| FieldSummary {
                    name: f.name.clone(),
                    type_ref: f.type_ref.to_string(),
                    nullable: f.nullable,
                    mandatory: f.mandatory,
                })
                .collect(),
            values: model.enum_values().map(<[String]>::to_vec).unwrap_or_default(),
        })
        .collect();

    let transforms = envelope
        .transforms
        .iter()
        .map(|(type_name, rules)| TransformSummary {
            type_name: type_name.to_string(),
            rules: rules.iter().map(rule).collect(),
        })
        .collect();

    let data = match envelope.encoding {
        Some(_) => None,
        None => {
            let root = ByteReader::new(envelope.data, &schema, *limits).read_root()?;
            Some(render(&root, &schema))
        }
    };

    Ok(EnvelopeSummary {
        version: envelope.version,
        encoding: envelope.encoding.map(|e| e.to_string()),
        root: envelope.schema.root.to_string(),
        types,
        transforms,
        data,
    })
}

impl fmt::Display for EnvelopeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "envelope v{} encoding={} root={}",
            self.version,
            self.encoding.as_deref().unwrap_or("none"),
            self.root
        )?;
        writeln!(f, "types ({}):", self.types.len())?;
        for (i, t) in self.types.iter().enumerate() {
            let status = if t.verified { "ok" } else { "MISMATCH" };
            write!(f, "  [{i}] {} {} {} {status}", t.name, t.kind, &t.fingerprint[..8.min(t.fingerprint.len())])?;
            if let Some(target) = &t.proxies {
                write!(f, " proxies={target}")?;
            }
            if !t.markers.is_empty() {
                write!(f, " markers={}", t.markers.join(","))?;
            }
            writeln!(f)?;
            for field in &t.fields {
                let optional = if field.nullable { "?" } else { "" };
                writeln!(f, "      {}{optional}: {}", field.name, field.type_ref)?;
            }
            if !t.values.is_empty() {
                writeln!(f, "      {}", t.values.join(" | "))?;
            }
        }
        for transform in &self.transforms {
            writeln!(f, "transforms {}: {}", transform.type_name, transform.rules.join(", "))?;
        }
        match &self.data {
            Some(data) => write!(f, "data: {data}"),
            None => write!(f, "data: <encoded>"),
        }
    }
}
