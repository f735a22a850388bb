//! Shared test types for engine tests.

#![allow(dead_code)]

use carapace_engine::carapace_model::{EnumTransform, TypeRef, Value};
use carapace_engine::{
    Bound, CustomSerializer, DynSerializable, EnumShape, ReadContext, SchemaBuilder, Serializable,
    SerializationContext, SerializationResult, SerializerFactory, Shape, WriteContext, impl_composite,
    impl_enum,
};
use std::sync::Arc;

// =============================================================================
// PLAIN COMPOSITES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub street: String,
    pub city: String,
}

impl_composite!(Address, "app.Address", { street: String, city: String });

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub name: String,
    pub age: Option<u32>,
    pub address: Address,
    pub tags: Vec<String>,
}

impl_composite!(Person, "app.Person", {
    name: String,
    age: Option<u32>,
    address: Address,
    tags: Vec<String>,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Color {
    Red,
    Green,
    Blue,
}

impl_enum!(Color, "app.Color", { Red, Green, Blue });

pub fn alice() -> Person {
    Person {
        name: "Alice".to_string(),
        age: Some(34),
        address: Address {
            street: "1 Main St".to_string(),
            city: "Springfield".to_string(),
        },
        tags: vec!["admin".to_string(), "ops".to_string()],
    }
}

// =============================================================================
// SHARED IDENTITY
// =============================================================================

/// Two fields that may point at one allocation.
#[derive(Debug, Clone)]
pub struct Pair {
    pub left: Arc<Address>,
    pub right: Arc<Address>,
}

impl_composite!(Pair, "app.Pair", { left: Arc<Address>, right: Arc<Address> });

/// A node that can be linked into a cycle after construction.
#[derive(Debug)]
pub struct Ring {
    pub label: String,
    pub next: parking_lot::Mutex<Option<Arc<Ring>>>,
}

impl Ring {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            next: parking_lot::Mutex::new(None),
        })
    }
}

impl Serializable for Ring {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        builder.composite(
            Shape::new("app.Ring")
                .property::<String>("label")
                .property::<Option<Arc<Ring>>>("next")
                .canonical_constructor(),
        )
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let next = self.next.lock().clone();
        cx.record::<Self>()?
            .field("label", &self.label)?
            .field("next", &next)?
            .finish()
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        let ring = Self::construct(value, cx)?;
        ring.populate(value, cx)?;
        Ok(ring)
    }

    fn construct(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        let mut record = cx.record::<Self>(value)?;
        Ok(Self {
            label: record.field("label")?,
            next: parking_lot::Mutex::new(None),
        })
    }

    fn populate(&self, value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<()> {
        let mut record = cx.record::<Self>(value)?;
        let next: Option<Arc<Ring>> = record.field("next")?;
        *self.next.lock() = next;
        Ok(())
    }
}

/// A node that reads its link while it is constructed, so it cannot take
/// part in a decoded cycle.
#[derive(Debug)]
pub struct EagerRing {
    pub label: String,
    pub next: parking_lot::Mutex<Option<Arc<EagerRing>>>,
}

impl EagerRing {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            next: parking_lot::Mutex::new(None),
        })
    }
}

impl Serializable for EagerRing {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        builder.composite(
            Shape::new("app.EagerRing")
                .property::<String>("label")
                .property::<Option<Arc<EagerRing>>>("next")
                .canonical_constructor(),
        )
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        let next = self.next.lock().clone();
        cx.record::<Self>()?
            .field("label", &self.label)?
            .field("next", &next)?
            .finish()
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        let mut record = cx.record::<Self>(value)?;
        Ok(Self {
            label: record.field("label")?,
            next: parking_lot::Mutex::new(record.field("next")?),
        })
    }
}

// =============================================================================
// COVARIANT ELEMENTS
// =============================================================================

pub trait Figure: DynSerializable {
    fn area(&self) -> f64;
}

impl Bound for dyn Figure {
    const BOUND: &'static str = "geo.Figure";
}

#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub radius: f64,
}

impl_composite!(Circle, "geo.Circle", { radius: f64 });

impl Figure for Circle {
    fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Square {
    pub side: f64,
}

impl_composite!(Square, "geo.Square", { side: f64 });

impl Figure for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

pub struct Drawing {
    pub title: String,
    pub figures: Vec<Box<dyn Figure>>,
}

impl std::fmt::Debug for Drawing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drawing")
            .field("title", &self.title)
            .field("figures", &self.figures.len())
            .finish()
    }
}

impl_composite!(Drawing, "geo.Drawing", {
    title: String,
    figures: Vec<Box<dyn Figure>>,
});

pub fn circle(c: Circle) -> Box<dyn Figure> {
    Box::new(c)
}

pub fn square(s: Square) -> Box<dyn Figure> {
    Box::new(s)
}

/// A factory that can read every `Figure`.
pub fn figure_factory() -> SerializerFactory {
    let mut factory = SerializerFactory::new();
    factory.register_subtype::<dyn Figure, Circle>(circle).unwrap();
    factory.register_subtype::<dyn Figure, Square>(square).unwrap();
    factory
}

// =============================================================================
// CUSTOM SERIALIZERS
// =============================================================================

/// A value with no serializable shape of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instant {
    secs: i64,
    nanos: u32,
}

impl Instant {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstantProxy {
    pub secs: i64,
    pub nanos: u32,
}

impl_composite!(InstantProxy, "time.InstantProxy", { secs: i64, nanos: u32 });

pub struct InstantSerializer;

impl CustomSerializer for InstantSerializer {
    type Target = Instant;
    type Proxy = InstantProxy;
    const TARGET: &'static str = "time.Instant";

    fn to_proxy(&self, target: &Instant) -> InstantProxy {
        InstantProxy {
            secs: target.secs(),
            nanos: target.nanos(),
        }
    }

    fn from_proxy(&self, proxy: InstantProxy) -> SerializationResult<Instant> {
        if proxy.nanos >= 1_000_000_000 {
            return Err(carapace_engine::SerializationError::custom(
                Self::TARGET,
                "nanos out of range",
            ));
        }
        Ok(Instant::new(proxy.secs, proxy.nanos))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MillisProxy {
    pub millis: i64,
}

impl_composite!(MillisProxy, "time.MillisProxy", { millis: i64 });

/// Millisecond precision; drops sub-millisecond nanos.
pub struct InstantAsMillis;

impl CustomSerializer for InstantAsMillis {
    type Target = Instant;
    type Proxy = MillisProxy;
    const TARGET: &'static str = "time.Instant";

    fn to_proxy(&self, target: &Instant) -> MillisProxy {
        MillisProxy {
            millis: target.secs() * 1000 + i64::from(target.nanos() / 1_000_000),
        }
    }

    fn from_proxy(&self, proxy: MillisProxy) -> SerializationResult<Instant> {
        let secs = proxy.millis.div_euclid(1000);
        let nanos = (proxy.millis.rem_euclid(1000) as u32) * 1_000_000;
        Ok(Instant::new(secs, nanos))
    }
}

/// A composite holding a custom-only field.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub at: Instant,
}

impl Serializable for Event {
    fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
        builder.composite(
            Shape::new("app.Event")
                .property::<String>("name")
                .custom_property::<Instant>("at")
                .canonical_constructor(),
        )
    }

    fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
        cx.record::<Self>()?
            .field("name", &self.name)?
            .custom_field("at", &self.at)?
            .finish()
    }

    fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
        let mut record = cx.record::<Self>(value)?;
        Ok(Self {
            name: record.field("name")?,
            at: record.custom_field("at")?,
        })
    }
}

/// Serializable on its own, but replaced when a custom serializer is
/// registered for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl_composite!(Version, "app.Version", { major: u16, minor: u16 });

#[derive(Debug, Clone, PartialEq)]
pub struct VersionText {
    pub text: String,
}

impl_composite!(VersionText, "app.VersionText", { text: String });

pub struct VersionAsText;

impl CustomSerializer for VersionAsText {
    type Target = Version;
    type Proxy = VersionText;
    const TARGET: &'static str = "app.Version";

    fn to_proxy(&self, target: &Version) -> VersionText {
        VersionText {
            text: format!("{}.{}", target.major, target.minor),
        }
    }

    fn from_proxy(&self, proxy: VersionText) -> SerializationResult<Version> {
        let parse = |s: &str| {
            s.parse::<u16>()
                .map_err(|e| carapace_engine::SerializationError::custom(Self::TARGET, e.to_string()))
        };
        match proxy.text.split_once('.') {
            Some((major, minor)) => Ok(Version {
                major: parse(major)?,
                minor: parse(minor)?,
            }),
            None => Err(carapace_engine::SerializationError::custom(
                Self::TARGET,
                format!("'{}' is not major.minor", proxy.text),
            )),
        }
    }
}

// =============================================================================
// EVOLUTION SHAPES
// =============================================================================

/// Several local shapes of the same logical types, as different releases
/// would declare them.
pub mod v1 {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Account {
        pub id: u64,
    }

    impl_composite!(Account, "bank.Account", { id: u64 });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Counter {
        pub count: i32,
    }

    impl_composite!(Counter, "stats.Counter", { count: i32 });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Settings {
        pub theme: String,
    }

    impl_composite!(Settings, "app.Settings", { theme: String });

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Level {
        Low,
        Mid,
    }

    impl_enum!(Level, "app.Level", { Low, Mid });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Label {
        pub text: String,
    }

    impl_composite!(Label, "app.Label", { text: String });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Holder {
        pub account: Account,
    }

    impl_composite!(Holder, "bank.Holder", { account: Account });
}

pub mod v2 {
    use super::*;

    /// Adds a nullable field.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Account {
        pub id: u64,
        pub nickname: Option<String>,
    }

    impl_composite!(Account, "bank.Account", { id: u64, nickname: Option<String> });

    /// Widens `count`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Counter {
        pub count: i64,
    }

    impl_composite!(Counter, "stats.Counter", { count: i64 });

    /// Adds a non-nullable field readers may default.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Settings {
        pub theme: String,
        pub retries: u32,
    }

    impl Serializable for Settings {
        fn describe(builder: &mut SchemaBuilder<'_>) -> SerializationResult<TypeRef> {
            builder.composite(
                Shape::new("app.Settings")
                    .property::<String>("theme")
                    .defaulted_property::<u32>("retries")
                    .canonical_constructor(),
            )
        }

        fn encode(&self, cx: &mut WriteContext<'_>) -> SerializationResult<Value> {
            cx.record::<Self>()?
                .field("theme", &self.theme)?
                .field("retries", &self.retries)?
                .finish()
        }

        fn decode(value: &Value, cx: &mut ReadContext<'_>) -> SerializationResult<Self> {
            let mut record = cx.record::<Self>(value)?;
            Ok(Self {
                theme: record.field("theme")?,
                retries: record.field_or_else("retries", || 3)?,
            })
        }
    }

    /// Renames `Mid` to `Medium` and adds `High`, read as `Medium` by
    /// readers that do not know it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Level {
        Low,
        Medium,
        High,
    }

    impl_enum!(Level, "app.Level", { Low, Medium, High }, transforms = [
        EnumTransform::Rename { from: "Mid".into(), to: "Medium".into() },
        EnumTransform::Default { new: "High".into(), old: "Medium".into() },
    ]);

    /// Changes `text` to a number.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Label {
        pub text: i32,
    }

    impl_composite!(Label, "app.Label", { text: i32 });

    #[derive(Debug, Clone, PartialEq)]
    pub struct Holder {
        pub account: Account,
    }

    impl_composite!(Holder, "bank.Holder", { account: Account });
}

pub mod v3 {
    use super::*;

    /// Adds a mandatory primitive.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Account {
        pub id: u64,
        pub balance: i64,
    }

    impl_composite!(Account, "bank.Account", { id: u64, balance: i64 });

    /// Same fields as `v1::Account`, plus a marker.
    #[derive(Debug, Clone, PartialEq)]
    pub struct AuditedAccount {
        pub id: u64,
    }

    impl_composite!(AuditedAccount, "bank.Account", markers = ["bank.Audited"], { id: u64 });
}

// =============================================================================
// HELPERS
// =============================================================================

pub fn context() -> SerializationContext {
    SerializationContext::default()
}

/// Serializes with `writer` and reads the bytes back with `reader`.
pub fn evolve<W: Serializable, R: Serializable>(value: &W) -> SerializationResult<R> {
    let context = context();
    let bytes = SerializerFactory::new().serialize(value, &context)?;
    SerializerFactory::new().deserialize::<R>(bytes.as_slice(), &context)
}

/// Serializes and deserializes with one factory.
pub fn round_trip<T: Serializable>(factory: &SerializerFactory, value: &T) -> SerializationResult<T> {
    let context = context();
    let bytes = factory.serialize(value, &context)?;
    factory.deserialize::<T>(bytes.as_slice(), &context)
}

/// An enum shape with no Rust type behind it, for builder tests.
pub fn loose_enum(name: &str, values: &[&str]) -> EnumShape {
    EnumShape::new(name, values)
}
