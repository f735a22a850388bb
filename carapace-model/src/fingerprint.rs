//! Canonical structural fingerprints.
//!
//! A fingerprint is SHA-256 over a length-prefixed canonical form of one
//! entry: type name, kind tag, sorted markers, then either the fields in
//! declared order as `(name, nested fingerprint, nullable, mandatory)`, the
//! element/key/value fingerprints, or the sorted enum constants. Nested named
//! references are resolved through the enclosing schema before the parent is
//! hashed, so the result only depends on structure.
//!
//! Recursive types are grouped into strongly connected components. Inside a
//! component, references hash as a placeholder derived from the target's
//! name, and each member is bound to a digest over the whole component. The
//! result never depends on which type the walk started from.

use crate::error::{ModelError, ModelResult};
use crate::model::{Restriction, Schema, TypeKind, TypeModel, TypeRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

const DOMAIN: &[u8] = b"carapace.fingerprint.v1";

const TAG_COMPOSITE: u8 = 0x01;
const TAG_LIST: u8 = 0x02;
const TAG_SET: u8 = 0x03;
const TAG_ARRAY: u8 = 0x04;
const TAG_MAP: u8 = 0x05;
const TAG_ENUM: u8 = 0x06;
const TAG_PRIMITIVE: u8 = 0x10;
const TAG_ANY: u8 = 0x11;
const TAG_IN_PROGRESS: u8 = 0x12;
const TAG_CYCLE: u8 = 0x13;

/// A 32-byte structural identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn parse(s: &str) -> ModelResult<Self> {
        let bytes = hex::decode(s).map_err(|e| ModelError::InvalidFingerprint(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ModelError::InvalidFingerprint(format!("expected 32 bytes: {s}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical byte form fed to the hasher.
struct Canonical(Sha256);

impl Canonical {
    fn new() -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        Self(hasher)
    }

    fn tag(&mut self, tag: u8) {
        self.0.update([tag]);
    }

    fn flag(&mut self, flag: bool) {
        self.0.update([flag as u8]);
    }

    fn len(&mut self, len: usize) {
        self.0.update((len as u64).to_be_bytes());
    }

    fn str(&mut self, s: &str) {
        self.len(s.len());
        self.0.update(s.as_bytes());
    }

    fn fingerprint(&mut self, fp: &Fingerprint) {
        self.0.update(fp.0);
    }

    fn finish(self) -> Fingerprint {
        Fingerprint(self.0.finalize().into())
    }
}

fn leaf(tag: u8, name: &str) -> Fingerprint {
    let mut c = Canonical::new();
    c.tag(tag);
    c.str(name);
    c.finish()
}

/// Memoizing fingerprint calculator over one schema.
pub struct Fingerprinter<'s> {
    schema: &'s Schema,
    cache: HashMap<&'s str, Fingerprint>,
}

/// Tarjan state for one walk over the uncached part of the type graph.
#[derive(Default)]
struct Components<'s> {
    index: HashMap<&'s str, usize>,
    low: HashMap<&'s str, usize>,
    stack: Vec<&'s str>,
    on_stack: HashSet<&'s str>,
    next: usize,
    sealed: Vec<Vec<&'s str>>,
}

impl<'s> Components<'s> {
    fn lower(&mut self, name: &'s str, candidate: usize) {
        if let Some(low) = self.low.get_mut(name) {
            *low = (*low).min(candidate);
        }
    }
}

/// One type on the walk, and the next of its references to follow.
struct Frame<'s> {
    name: &'s str,
    order: usize,
    targets: Vec<&'s str>,
    cursor: usize,
}

impl<'s> Fingerprinter<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            cache: HashMap::new(),
        }
    }

    /// Fingerprint of the named schema entry.
    pub fn fingerprint(&mut self, type_name: &str) -> ModelResult<Fingerprint> {
        if let Some(fp) = self.cache.get(type_name) {
            return Ok(*fp);
        }
        let schema = self.schema;
        let root = schema
            .get(type_name)
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))?;

        let mut walk = Components::default();
        self.connect(&mut walk, &root.type_name)?;
        // Tarjan seals dependencies before their dependents.
        for component in &walk.sealed {
            self.seal(component);
        }
        self.cache
            .get(type_name)
            .copied()
            .ok_or_else(|| ModelError::UnknownType(type_name.to_string()))
    }

    /// Fingerprint of a model whose references resolve through this
    /// schema. The model itself need not be an entry; references to its own
    /// name are treated as self references.
    pub fn fingerprint_model(&mut self, model: &TypeModel) -> ModelResult<Fingerprint> {
        if self.schema.get(&model.type_name) == Some(model) {
            return self.fingerprint(&model.type_name);
        }
        for type_ref in model.references() {
            if let Some(to) = type_ref.referenced_name() {
                if to != model.type_name {
                    self.fingerprint(to).map_err(|e| match e {
                        ModelError::UnknownType(to) => ModelError::DanglingReference {
                            from: model.type_name.clone(),
                            to,
                        },
                        other => other,
                    })?;
                }
            }
        }
        let members = HashSet::from([model.type_name.as_str()]);
        Ok(self.local(model, &members))
    }

    /// Fingerprint of a field, element, key or value reference.
    pub fn fingerprint_ref(&mut self, type_ref: &TypeRef) -> ModelResult<Fingerprint> {
        match type_ref {
            TypeRef::Primitive(p) => Ok(leaf(TAG_PRIMITIVE, p.name())),
            TypeRef::Any { bound } => Ok(leaf(TAG_ANY, bound)),
            TypeRef::Named(name) => self.fingerprint(name),
        }
    }

    /// Tarjan's walk from `root`, on an explicit frame stack so schema depth
    /// never reaches the call stack.
    fn connect(&self, walk: &mut Components<'s>, root: &'s str) -> ModelResult<()> {
        let mut frames = vec![self.open(walk, root)?];
        loop {
            let Some(frame) = frames.last_mut() else {
                return Ok(());
            };
            let name = frame.name;
            let step = frame.targets.get(frame.cursor).copied();
            frame.cursor += 1;

            if let Some(to) = step {
                match walk.index.get(to) {
                    None => frames.push(self.open(walk, to)?),
                    Some(&seen) if walk.on_stack.contains(to) => walk.lower(name, seen),
                    Some(_) => {}
                }
                continue;
            }

            let Some(done) = frames.pop() else {
                return Ok(());
            };
            let low = walk.low.get(name).copied().unwrap_or(done.order);
            if let Some(parent) = frames.last() {
                walk.lower(parent.name, low);
            }
            if low == done.order {
                let mut component = Vec::new();
                while let Some(member) = walk.stack.pop() {
                    walk.on_stack.remove(member);
                    component.push(member);
                    if member == name {
                        break;
                    }
                }
                walk.sealed.push(component);
            }
        }
    }

    /// Numbers `name` and lists the uncached types it references.
    fn open(&self, walk: &mut Components<'s>, name: &'s str) -> ModelResult<Frame<'s>> {
        let schema = self.schema;
        let order = walk.next;
        walk.next += 1;
        walk.index.insert(name, order);
        walk.low.insert(name, order);
        walk.stack.push(name);
        walk.on_stack.insert(name);

        let model = schema
            .get(name)
            .ok_or_else(|| ModelError::UnknownType(name.to_string()))?;
        let mut targets = Vec::new();
        for type_ref in model.references() {
            let Some(to) = type_ref.referenced_name() else {
                continue;
            };
            let target = schema
                .get(to)
                .ok_or_else(|| ModelError::DanglingReference {
                    from: name.to_string(),
                    to: to.to_string(),
                })?;
            let to = target.type_name.as_str();
            if !self.cache.contains_key(to) {
                targets.push(to);
            }
        }
        Ok(Frame {
            name,
            order,
            targets,
            cursor: 0,
        })
    }

    /// Fingerprints every member of one strongly connected component.
    ///
    /// References inside the component hash as name placeholders. For a
    /// component of more than one type, each member is then bound to a
    /// digest of every member's local form, so a change anywhere in a cycle
    /// reaches every type on it.
    fn seal(&mut self, component: &[&'s str]) {
        let schema = self.schema;
        let members: HashSet<&str> = component.iter().copied().collect();
        let mut locals: Vec<(&'s str, Fingerprint)> = component
            .iter()
            .filter_map(|name| schema.get(name).map(|m| (*name, self.local(m, &members))))
            .collect();

        if locals.len() == 1 {
            let (name, fp) = locals[0];
            self.cache.insert(name, fp);
            return;
        }

        locals.sort_by(|a, b| a.0.cmp(b.0));
        let mut digest = Canonical::new();
        digest.tag(TAG_CYCLE);
        digest.len(locals.len());
        for (name, local) in &locals {
            digest.str(name);
            digest.fingerprint(local);
        }
        let digest = digest.finish();

        for (name, local) in locals {
            let mut c = Canonical::new();
            c.fingerprint(&local);
            c.fingerprint(&digest);
            self.cache.insert(name, c.finish());
        }
    }

    /// Canonical hash of one entry. References to `members` become
    /// placeholders; every other named reference must already be cached.
    fn local(&self, model: &TypeModel, members: &HashSet<&str>) -> Fingerprint {
        let mut c = Canonical::new();
        c.str(&model.type_name);

        match &model.kind {
            TypeKind::Composite { fields } => {
                c.tag(TAG_COMPOSITE);
                Self::sorted(&mut c, &model.markers);
                c.len(fields.len());
                for field in fields {
                    c.str(&field.name);
                    c.fingerprint(&self.nested(&field.type_ref, members));
                    c.flag(field.nullable);
                    c.flag(field.mandatory);
                }
            }
            TypeKind::Restricted(restriction) => {
                let (tag, refs): (u8, Vec<&TypeRef>) = match restriction {
                    Restriction::List { element } => (TAG_LIST, vec![element]),
                    Restriction::Set { element } => (TAG_SET, vec![element]),
                    Restriction::Array { element } => (TAG_ARRAY, vec![element]),
                    Restriction::Map { key, value } => (TAG_MAP, vec![key, value]),
                    Restriction::Enum { values } => {
                        c.tag(TAG_ENUM);
                        Self::sorted(&mut c, &model.markers);
                        Self::sorted(&mut c, values);
                        return c.finish();
                    }
                };
                c.tag(tag);
                Self::sorted(&mut c, &model.markers);
                for type_ref in refs {
                    c.fingerprint(&self.nested(type_ref, members));
                }
            }
        }
        c.finish()
    }

    fn nested(&self, type_ref: &TypeRef, members: &HashSet<&str>) -> Fingerprint {
        match type_ref {
            TypeRef::Primitive(p) => leaf(TAG_PRIMITIVE, p.name()),
            TypeRef::Any { bound } => leaf(TAG_ANY, bound),
            TypeRef::Named(name) if members.contains(name.as_str()) => {
                leaf(TAG_IN_PROGRESS, name)
            }
            TypeRef::Named(name) => self
                .cache
                .get(name.as_str())
                .copied()
                .unwrap_or_else(|| leaf(TAG_IN_PROGRESS, name)),
        }
    }

    fn sorted(c: &mut Canonical, items: &[String]) {
        let mut sorted: Vec<&String> = items.iter().collect();
        sorted.sort();
        c.len(sorted.len());
        for item in sorted {
            c.str(item);
        }
    }
}

/// Fingerprint of one model, resolving references through `schema`.
pub fn fingerprint(model: &TypeModel, schema: &Schema) -> ModelResult<Fingerprint> {
    Fingerprinter::new(schema).fingerprint_model(model)
}

/// Fingerprints of every entry, aligned with `schema.entries()`.
pub fn fingerprint_schema(schema: &Schema) -> ModelResult<Vec<Fingerprint>> {
    let mut fingerprinter = Fingerprinter::new(schema);
    schema
        .iter()
        .map(|entry| fingerprinter.fingerprint(&entry.type_name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let fp = leaf(TAG_PRIMITIVE, "i32");
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
        assert_eq!(fp.short().len(), 8);
    }

    #[test]
    fn parse_rejects_wrong_width() {
        assert!(matches!(
            Fingerprint::parse("abcd"),
            Err(ModelError::InvalidFingerprint(_))
        ));
        assert!(Fingerprint::parse("not hex").is_err());
    }
}
