// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Specialised event deserializers and their cache.
//!
//! Decoding an event through [crate::value::read_value] re-consults class
//! metadata for every field of every event. For hot event types it pays to
//! compile the schema decisions — field order, primitive kinds, constant
//! pool flags, nesting — once into a [Deserializer]: a flat program of
//! [DecodeOp]s interpreted by a tight match, producing owned [EventValue]
//! trees with no metadata lookups on the decode path.
//!
//! Programs are self-contained, so they can be shared: a process-wide
//! registry keyed by metadata fingerprint hands out [DeserializerCache]
//! instances, and each cache maps [DeserializerKey]s to programs with LRU
//! eviction. Recordings produced by the same recorder configuration hit
//! the same cache entries across parses.
//!
//! Two output layouts are chosen per class at compile time: small flat
//! events (at most 10 fields, at most 2 complex fields) build their field
//! map eagerly; anything larger decodes into an ordered pair list that
//! hydrates into an index on first lookup.

use {
    crate::{
        common::{leb128_i16, leb128_i32, leb128_i64},
        context::ScratchBuffers,
        error::{Error, Result},
        metadata::{ClassElement, FieldElement, Metadata},
        string_table::Encoding,
        value::{parse_boolean, parse_char, PrimitiveKind, MAX_NESTING},
    },
    log::debug,
    lru::LruCache,
    nom::{
        bytes::streaming::take,
        number::streaming::{be_f32, be_f64, be_i8},
    },
    rustc_hash::FxHashMap,
    std::{
        num::NonZeroUsize,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex, OnceLock,
        },
    },
};

/// Default maximum number of deserializers kept per cache.
pub const DEFAULT_CACHE_MAX: usize = 1000;

/// Identity of a specialised deserializer.
///
/// Two keys are equal iff the numeric type id, the class name, the super
/// type, and the ordered `"<field type name>:<field name>"` list all match.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DeserializerKey {
    pub type_id: i64,
    pub name: String,
    pub super_type: Option<String>,
    pub fields: Vec<String>,
}

impl DeserializerKey {
    pub fn for_class(class: &ClassElement<'_>, metadata: &Metadata<'_>) -> Self {
        let fields = class
            .fields
            .iter()
            .map(|f| {
                let type_name = metadata
                    .class_name(f.type_id)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| f.type_id.to_string());

                format!("{type_name}:{}", f.name)
            })
            .collect();

        Self {
            type_id: class.id,
            name: class.name.to_string(),
            super_type: class.super_type.as_ref().map(|s| s.to_string()),
            fields,
        }
    }
}

/// One instruction of a decode program.
#[derive(Clone, Debug)]
enum DecodeOp {
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Char,
    Float,
    Double,
    /// An encoded string. Carries the chunk's `java.lang.String` class id
    /// so pool-referenced strings resolve against the right pool.
    String(i64),
    /// A varint index into the constant pool of the carried type.
    CpRef(i64),
    /// A varint element count followed by that many elements.
    Array(Box<DecodeOp>),
    /// A nested complex value decoded by its own program.
    Complex(Arc<Deserializer>),
}

#[derive(Debug)]
struct FieldDecoder {
    name: Arc<str>,
    op: DecodeOp,
}

/// Output layout of a program, chosen at compile time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Layout {
    /// Build the field map during decoding.
    Eager,
    /// Decode into an ordered pair list; index on first lookup.
    Lazy,
}

/// An owned, dynamically typed value produced by a [Deserializer].
#[derive(Clone, Debug)]
pub enum EventValue {
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Char(char),
    Float(f32),
    Double(f64),
    String(String),
    /// An unresolved reference into the constant pool of `class_id`.
    ///
    /// Resolution is the consumer's choice, against the chunk's pools.
    ConstantPool { class_id: i64, index: i64 },
    Array(Vec<EventValue>),
    Object(EventObject),
}

impl EventValue {
    /// Widen any integral variant to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(*v as i64),
            Self::Short(v) => Some(*v as i64),
            Self::Int(v) => Some(*v as i64),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let Self::Boolean(v) = self {
            Some(*v)
        } else {
            None
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(v) = self {
            Some(v.as_str())
        } else {
            None
        }
    }

    pub fn as_object(&self) -> Option<&EventObject> {
        if let Self::Object(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

/// A decoded event: field names mapped to values.
pub enum EventObject {
    Eager {
        class_id: i64,
        map: FxHashMap<Arc<str>, EventValue>,
    },
    Lazy(LazyObject),
}

impl EventObject {
    /// The class id of the decoded value.
    pub fn class_id(&self) -> i64 {
        match self {
            Self::Eager { class_id, .. } => *class_id,
            Self::Lazy(lazy) => lazy.class_id,
        }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        match self {
            Self::Eager { map, .. } => map.len(),
            Self::Lazy(lazy) => lazy.pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a field value by name.
    pub fn get(&self, name: &str) -> Option<&EventValue> {
        match self {
            Self::Eager { map, .. } => map.get(name),
            Self::Lazy(lazy) => lazy.get(name),
        }
    }
}

impl std::fmt::Debug for EventObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eager { class_id, map } => f
                .debug_struct("EventObject")
                .field("class_id", class_id)
                .field("fields", map)
                .finish(),
            Self::Lazy(lazy) => f
                .debug_struct("EventObject")
                .field("class_id", &lazy.class_id)
                .field("fields", &lazy.pairs)
                .finish(),
        }
    }
}

impl Clone for EventObject {
    fn clone(&self) -> Self {
        match self {
            Self::Eager { class_id, map } => Self::Eager {
                class_id: *class_id,
                map: map.clone(),
            },
            Self::Lazy(lazy) => Self::Lazy(LazyObject {
                class_id: lazy.class_id,
                pairs: lazy.pairs.clone(),
                index: OnceLock::new(),
            }),
        }
    }
}

/// Field storage that defers map construction until a lookup happens.
pub struct LazyObject {
    class_id: i64,
    pairs: Vec<(Arc<str>, EventValue)>,
    index: OnceLock<FxHashMap<Arc<str>, usize>>,
}

impl LazyObject {
    /// The fields in class declaration order.
    pub fn pairs(&self) -> &[(Arc<str>, EventValue)] {
        &self.pairs
    }

    /// Whether the lookup index has been built yet.
    pub fn hydrated(&self) -> bool {
        self.index.get().is_some()
    }

    fn get(&self, name: &str) -> Option<&EventValue> {
        let index = self.index.get_or_init(|| {
            self.pairs
                .iter()
                .enumerate()
                .map(|(i, (name, _))| (name.clone(), i))
                .collect()
        });

        Some(&self.pairs[*index.get(name)?].1)
    }
}

/// A compiled decode program for one class.
#[derive(Debug)]
pub struct Deserializer {
    class_id: i64,
    name: Arc<str>,
    fields: Vec<FieldDecoder>,
    layout: Layout,
}

impl Deserializer {
    /// Compile a program for a class.
    ///
    /// Nested complex field types compile through `cache`, so shared inner
    /// types (thread, stack trace, ...) are compiled once per schema.
    pub fn build(
        class: &ClassElement<'_>,
        metadata: &Metadata<'_>,
        cache: &DeserializerCache,
    ) -> Result<Self> {
        Self::build_at_depth(class, metadata, cache, 0)
    }

    fn build_at_depth(
        class: &ClassElement<'_>,
        metadata: &Metadata<'_>,
        cache: &DeserializerCache,
        depth: usize,
    ) -> Result<Self> {
        if depth > MAX_NESTING {
            return Err(Error::TypeGraphTooDeep(class.id));
        }

        let fields = class
            .fields
            .iter()
            .map(|field| {
                Ok(FieldDecoder {
                    name: Arc::from(field.name.as_ref()),
                    op: op_for_field(field, metadata, cache, depth)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let complex_fields = fields
            .iter()
            .filter(|f| {
                matches!(&f.op, DecodeOp::Complex(_))
                    || matches!(&f.op, DecodeOp::Array(el) if matches!(el.as_ref(), DecodeOp::Complex(_)))
            })
            .count();

        let layout = if fields.len() <= 10 && complex_fields <= 2 {
            Layout::Eager
        } else {
            Layout::Lazy
        };

        Ok(Self {
            class_id: class.id,
            name: Arc::from(class.name.as_ref()),
            fields,
            layout,
        })
    }

    pub fn class_id(&self) -> i64 {
        self.class_id
    }

    /// The class name this program decodes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Decode one value, returning the remaining input and the object.
    pub fn deserialize<'a>(
        &self,
        mut s: &'a [u8],
        scratch: &mut ScratchBuffers,
    ) -> Result<(&'a [u8], EventObject)> {
        let mut pairs = Vec::with_capacity(self.fields.len());

        for field in &self.fields {
            let (rest, value) = decode_op(&field.op, s, scratch)?;
            s = rest;
            pairs.push((field.name.clone(), value));
        }

        let object = match self.layout {
            Layout::Eager => EventObject::Eager {
                class_id: self.class_id,
                map: pairs.into_iter().collect(),
            },
            Layout::Lazy => EventObject::Lazy(LazyObject {
                class_id: self.class_id,
                pairs,
                index: OnceLock::new(),
            }),
        };

        Ok((s, object))
    }
}

fn op_for_field(
    field: &FieldElement<'_>,
    metadata: &Metadata<'_>,
    cache: &DeserializerCache,
    depth: usize,
) -> Result<DecodeOp> {
    let element = if field.constant_pool {
        DecodeOp::CpRef(field.type_id)
    } else {
        op_for_class(field.type_id, metadata, cache, depth)?
    };

    Ok(if field.is_array_type() {
        DecodeOp::Array(Box::new(element))
    } else {
        element
    })
}

fn op_for_class(
    class_id: i64,
    metadata: &Metadata<'_>,
    cache: &DeserializerCache,
    depth: usize,
) -> Result<DecodeOp> {
    if depth > MAX_NESTING {
        return Err(Error::TypeGraphTooDeep(class_id));
    }

    if let Some(kind) = metadata.primitive_kind(class_id) {
        return Ok(match kind {
            PrimitiveKind::Boolean => DecodeOp::Boolean,
            PrimitiveKind::Byte => DecodeOp::Byte,
            PrimitiveKind::Short => DecodeOp::Short,
            PrimitiveKind::Int => DecodeOp::Int,
            PrimitiveKind::Long => DecodeOp::Long,
            PrimitiveKind::Char => DecodeOp::Char,
            PrimitiveKind::Float => DecodeOp::Float,
            PrimitiveKind::Double => DecodeOp::Double,
            PrimitiveKind::String => DecodeOp::String(class_id),
        });
    }

    let class = metadata
        .class_by_id(class_id)
        .ok_or(Error::ClassNotFound(class_id))?;

    if class.is_simple_wrapper() {
        return op_for_field(&class.fields[0], metadata, cache, depth + 1);
    }

    let key = DeserializerKey::for_class(class, metadata);
    let inner = cache.get_or_build(key, || {
        Deserializer::build_at_depth(class, metadata, cache, depth + 1)
    })?;

    Ok(DecodeOp::Complex(inner))
}

fn decode_op<'a>(
    op: &DecodeOp,
    s: &'a [u8],
    scratch: &mut ScratchBuffers,
) -> Result<(&'a [u8], EventValue)> {
    Ok(match op {
        DecodeOp::Boolean => {
            let (s, v) = parse_boolean(s)?;
            (s, EventValue::Boolean(v))
        }
        DecodeOp::Byte => {
            let (s, v) = be_i8(s)?;
            (s, EventValue::Byte(v))
        }
        DecodeOp::Short => {
            let (s, v) = leb128_i16(s)?;
            (s, EventValue::Short(v))
        }
        DecodeOp::Int => {
            let (s, v) = leb128_i32(s)?;
            (s, EventValue::Int(v))
        }
        DecodeOp::Long => {
            let (s, v) = leb128_i64(s)?;
            (s, EventValue::Long(v))
        }
        DecodeOp::Char => {
            let (s, v) = parse_char(s)?;
            (s, EventValue::Char(v))
        }
        DecodeOp::Float => {
            let (s, v) = be_f32(s)?;
            (s, EventValue::Float(v))
        }
        DecodeOp::Double => {
            let (s, v) = be_f64(s)?;
            (s, EventValue::Double(v))
        }
        DecodeOp::String(string_class_id) => decode_string(s, *string_class_id, scratch)?,
        DecodeOp::CpRef(class_id) => {
            let (s, index) = leb128_i64(s)?;
            (
                s,
                EventValue::ConstantPool {
                    class_id: *class_id,
                    index,
                },
            )
        }
        DecodeOp::Array(element) => {
            let (mut s, len) = leb128_i32(s)?;

            let mut values = Vec::with_capacity((len as usize).min(4096));
            for _ in 0..len {
                let (rest, v) = decode_op(element, s, scratch)?;
                s = rest;
                values.push(v);
            }

            (s, EventValue::Array(values))
        }
        DecodeOp::Complex(inner) => {
            let (s, object) = inner.deserialize(s, scratch)?;
            (s, EventValue::Object(object))
        }
    })
}

fn decode_string<'a>(
    s: &'a [u8],
    string_class_id: i64,
    scratch: &mut ScratchBuffers,
) -> Result<(&'a [u8], EventValue)> {
    let (s, encoding) = Encoding::parse(s)?;

    Ok(match encoding {
        Encoding::Null => (s, EventValue::Null),
        Encoding::Empty => (s, EventValue::String(String::new())),
        Encoding::PoolRef => {
            let (s, index) = leb128_i64(s)?;

            (
                s,
                EventValue::ConstantPool {
                    class_id: string_class_id,
                    index,
                },
            )
        }
        Encoding::Utf8 => {
            let (s, len) = leb128_i32(s)?;
            let (s, raw) = take(len.max(0) as usize)(s)?;

            let text = std::str::from_utf8(raw)
                .map_err(|e| Error::Deserialize(format!("invalid UTF-8 string: {e}")))?;

            (s, EventValue::String(text.to_string()))
        }
        Encoding::CharArray => {
            let (mut s, unit_count) = leb128_i32(s)?;

            scratch.chars.clear();
            for _ in 0..unit_count {
                let unit;
                (s, unit) = leb128_i32(s)?;
                scratch.chars.push(unit as u16);
            }

            let text = String::from_utf16(&scratch.chars)
                .map_err(|e| Error::Deserialize(format!("invalid UTF-16 string: {e}")))?;

            (s, EventValue::String(text))
        }
        Encoding::Latin1 => {
            let (s, len) = leb128_i32(s)?;
            let (s, raw) = take(len.max(0) as usize)(s)?;

            (
                s,
                EventValue::String(raw.iter().map(|b| char::from(*b)).collect()),
            )
        }
    })
}

/// Cache hit/miss/eviction counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;

        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A bounded, synchronised cache of compiled deserializers.
///
/// Lookups touch entries in access order; insertion beyond the maximum
/// evicts the least recently used program. Safe to use from multiple
/// parses concurrently.
pub struct DeserializerCache {
    inner: Mutex<LruCache<DeserializerKey, Arc<Deserializer>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DeserializerCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch the program for `key`, building and inserting it on a miss.
    ///
    /// Equal keys always resolve to the same program instance while it
    /// remains cached. The build runs outside the lock; if two threads
    /// race, the first insertion wins and the loser's build is discarded.
    pub fn get_or_build(
        &self,
        key: DeserializerKey,
        build: impl FnOnce() -> Result<Deserializer>,
    ) -> Result<Arc<Deserializer>> {
        if let Some(hit) = self.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        let built = Arc::new(build()?);

        let mut inner = self.lock();
        if let Some(existing) = inner.get(&key) {
            return Ok(existing.clone());
        }

        if inner.push(key, built.clone()).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        Ok(built)
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The maximum number of cached programs.
    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<DeserializerKey, Arc<Deserializer>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            // A panic while holding the lock leaves the cache intact; keep
            // serving it.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

static REGISTRY: OnceLock<Mutex<FxHashMap<u64, Arc<DeserializerCache>>>> = OnceLock::new();

/// Obtain the process-wide cache for a metadata fingerprint.
///
/// All chunks — across recordings and across parses — whose metadata hashes
/// to the same fingerprint share one cache. `max_entries` applies when the
/// cache is first created.
pub fn shared_cache(fingerprint: u64, max_entries: usize) -> Arc<DeserializerCache> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(FxHashMap::default()));

    let mut registry = match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    registry
        .entry(fingerprint)
        .or_insert_with(|| Arc::new(DeserializerCache::new(max_entries)))
        .clone()
}

/// Pre-build deserializers and skip programs for every class in a chunk.
///
/// Intended to run once per chunk, after metadata is ready and before
/// events are decoded.
pub fn bind_deserializers(metadata: &Metadata<'_>, cache: &DeserializerCache) -> Result<()> {
    for class in metadata.classes() {
        metadata.skipper_for(class.id)?;

        if metadata.primitive_kind(class.id).is_some() || class.is_simple_wrapper() {
            continue;
        }

        let key = DeserializerKey::for_class(class, metadata);
        cache.get_or_build(key, || Deserializer::build(class, metadata, cache))?;
    }

    debug!(
        "bound deserializers for {} classes (cache size {})",
        metadata.class_count(),
        cache.len()
    );

    Ok(())
}

/// Fetch (building if necessary) the cached deserializer for a class.
pub fn deserializer_for(
    class_id: i64,
    metadata: &Metadata<'_>,
    cache: &DeserializerCache,
) -> Result<Arc<Deserializer>> {
    let class = metadata
        .class_by_id(class_id)
        .ok_or(Error::ClassNotFound(class_id))?;

    let key = DeserializerKey::for_class(class, metadata);

    cache.get_or_build(key, || Deserializer::build(class, metadata, cache))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{leb, metadata_event, utf8_string, ClassSpec, FieldSpec};
    use crate::metadata::Metadata;

    fn metadata_with(classes: Vec<ClassSpec>) -> Vec<u8> {
        let mut all = ClassSpec::primitives();
        all.extend(classes);
        metadata_event(&all)
    }

    fn key_for(metadata: &Metadata<'_>, id: i64) -> DeserializerKey {
        DeserializerKey::for_class(metadata.class_by_id(id).unwrap(), metadata)
    }

    #[test]
    fn key_equality_is_component_wise() {
        let event = metadata_with(vec![ClassSpec::new(100, "test.Event")
            .super_type("jdk.jfr.Event")
            .field(FieldSpec::new("a", 8))
            .field(FieldSpec::new("b", 9))]);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let key = key_for(&metadata, 100);
        assert_eq!(key, key_for(&metadata, 100));
        assert_eq!(key.fields, vec!["int:a".to_string(), "long:b".to_string()]);

        let mut other = key.clone();
        other.fields.reverse();
        assert_ne!(key, other);
    }

    #[test]
    fn decode_flat_event() {
        let event = metadata_with(vec![ClassSpec::new(100, "test.Event")
            .field(FieldSpec::new("count", 8))
            .field(FieldSpec::new("flag", 4))
            .field(FieldSpec::new("label", 12))]);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let cache = DeserializerCache::new(16);
        let deserializer = deserializer_for(100, &metadata, &cache).unwrap();
        assert_eq!(deserializer.layout(), Layout::Eager);
        assert_eq!(deserializer.name(), "test.Event");

        let mut payload = leb(42);
        payload.push(1);
        payload.extend_from_slice(&utf8_string("tag"));

        let mut scratch = ScratchBuffers::default();
        let (rest, object) = deserializer.deserialize(&payload, &mut scratch).unwrap();
        assert!(rest.is_empty());

        assert_eq!(object.class_id(), 100);
        assert_eq!(object.len(), 3);
        assert_eq!(object.get("count").unwrap().as_i64(), Some(42));
        assert_eq!(object.get("flag").unwrap().as_bool(), Some(true));
        assert_eq!(object.get("label").unwrap().as_str(), Some("tag"));
        assert!(object.get("missing").is_none());
    }

    #[test]
    fn wide_events_use_lazy_layout() {
        let fields = (0..12)
            .map(|i| FieldSpec::new(format!("f{i}"), 9))
            .collect::<Vec<_>>();
        let mut class = ClassSpec::new(100, "test.Wide");
        for f in fields {
            class = class.field(f);
        }
        let event = metadata_with(vec![class]);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let cache = DeserializerCache::new(16);
        let deserializer = deserializer_for(100, &metadata, &cache).unwrap();
        assert_eq!(deserializer.layout(), Layout::Lazy);

        let mut payload = Vec::new();
        for i in 0..12u64 {
            payload.extend_from_slice(&leb(i * 10));
        }

        let mut scratch = ScratchBuffers::default();
        let (_, object) = deserializer.deserialize(&payload, &mut scratch).unwrap();

        let EventObject::Lazy(lazy) = &object else {
            panic!("expected lazy layout");
        };
        // Pair order follows field order; no index until the first lookup.
        assert!(!lazy.hydrated());
        assert_eq!(lazy.pairs()[3].0.as_ref(), "f3");

        assert_eq!(object.get("f7").unwrap().as_i64(), Some(70));
        let EventObject::Lazy(lazy) = &object else {
            unreachable!();
        };
        assert!(lazy.hydrated());
    }

    #[test]
    fn nested_complex_and_cp_fields() {
        let event = metadata_with(vec![
            ClassSpec::new(60, "test.Frame")
                .field(FieldSpec::new("method", 12).constant_pool())
                .field(FieldSpec::new("line", 8)),
            ClassSpec::new(61, "test.Trace")
                .field(FieldSpec::new("frames", 60).array())
                .field(FieldSpec::new("name", 12)),
        ]);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let cache = DeserializerCache::new(16);
        let deserializer = deserializer_for(61, &metadata, &cache).unwrap();
        // The nested frame program was compiled through the cache.
        assert_eq!(cache.len(), 2);

        let mut payload = leb(2);
        payload.extend_from_slice(&leb(5));
        payload.extend_from_slice(&leb(100));
        payload.extend_from_slice(&leb(6));
        payload.extend_from_slice(&leb(200));
        payload.extend_from_slice(&utf8_string("main"));

        let mut scratch = ScratchBuffers::default();
        let (rest, object) = deserializer.deserialize(&payload, &mut scratch).unwrap();
        assert!(rest.is_empty());

        let EventValue::Array(frames) = object.get("frames").unwrap() else {
            panic!("expected array");
        };
        assert_eq!(frames.len(), 2);

        let frame = frames[0].as_object().unwrap();
        assert!(matches!(
            frame.get("method"),
            Some(EventValue::ConstantPool {
                class_id: 12,
                index: 5
            })
        ));
        assert_eq!(frame.get("line").unwrap().as_i64(), Some(100));
    }

    #[test]
    fn cache_returns_same_instance_and_counts() {
        let event = metadata_with(vec![ClassSpec::new(100, "test.Event")
            .field(FieldSpec::new("a", 8))]);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let cache = DeserializerCache::new(16);

        let a = deserializer_for(100, &metadata, &cache).unwrap();
        let b = deserializer_for(100, &metadata, &cache).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.hits + stats.misses, 2);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn lru_eviction_bounds_size() {
        let max = 4;
        let cache = DeserializerCache::new(max);

        // Distinct single-class schemas; each builds one program.
        for i in 0..10i64 {
            let event = metadata_with(vec![ClassSpec::new(100 + i, format!("test.E{i}"))
                .field(FieldSpec::new("a", 8))]);
            let (_, metadata) = Metadata::parse(&event).unwrap();
            deserializer_for(100 + i, &metadata, &cache).unwrap();

            assert!(cache.len() <= max);
        }

        let stats = cache.stats();
        assert_eq!(stats.misses, 10);
        assert_eq!(stats.evictions, 6);
        assert_eq!(cache.len(), max);
    }

    #[test]
    fn shared_cache_is_keyed_by_fingerprint() {
        let a = shared_cache(0xdead_beef_0001, 100);
        let b = shared_cache(0xdead_beef_0001, 100);
        let c = shared_cache(0xdead_beef_0002, 100);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn bind_builds_all_programs() {
        let event = metadata_with(vec![
            ClassSpec::new(60, "test.Inner").field(FieldSpec::new("x", 8)),
            ClassSpec::new(61, "test.Outer").field(FieldSpec::new("inner", 60)),
        ]);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let cache = DeserializerCache::new(16);
        bind_deserializers(&metadata, &cache).unwrap();

        assert_eq!(cache.len(), 2);
        // Binding again is all hits, no growth.
        let before = cache.stats().misses;
        bind_deserializers(&metadata, &cache).unwrap();
        assert_eq!(cache.stats().misses, before);
    }
}
