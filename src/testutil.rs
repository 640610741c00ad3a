// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synthetic recording encoders for tests.
//!
//! These build byte-exact JFR structures from specs: varints, the string
//! encodings, metadata events (string table + element tree), checkpoint
//! events, and whole chunks. Fields that link structures together — event
//! sizes and checkpoint deltas — are written as fixed-width padded varints
//! so [ChunkBuilder] can patch them in place without shifting offsets.

use rustc_hash::FxHashMap;

/// Canonical LEB-128 encoding, JFR flavoured: at most 9 bytes, the 9th
/// carrying all 8 bits.
pub fn leb(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();

    for _ in 0..8 {
        if v < 0x80 {
            out.push(v as u8);
            return out;
        }
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }

    out.push(v as u8);
    out
}

/// Encode `v` in exactly `width` bytes using redundant continuation bits.
///
/// Decodes to the same value as [leb]; the fixed width makes the field
/// patchable in place.
pub fn leb_padded(mut v: u64, width: usize) -> Vec<u8> {
    assert!((1..=8).contains(&width));

    let mut out = Vec::with_capacity(width);

    for _ in 0..width - 1 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }

    assert!(v < 0x80, "value does not fit in {width} padded bytes");
    out.push(v as u8);

    out
}

/// Encoding 3: UTF-8 bytes with a varint length.
pub fn utf8_string(s: &str) -> Vec<u8> {
    let mut out = vec![3];
    out.extend_from_slice(&leb(s.len() as u64));
    out.extend_from_slice(s.as_bytes());
    out
}

/// Encoding 4: varint-encoded UTF-16 code units with a varint count.
pub fn utf16_string(s: &str) -> Vec<u8> {
    let units = s.encode_utf16().collect::<Vec<_>>();

    let mut out = vec![4];
    out.extend_from_slice(&leb(units.len() as u64));
    for unit in units {
        out.extend_from_slice(&leb(unit as u64));
    }
    out
}

/// Encoding 5: Latin-1 bytes with a varint length.
pub fn latin1_string(s: &str) -> Vec<u8> {
    let mut out = vec![5];
    out.extend_from_slice(&leb(s.chars().count() as u64));
    for c in s.chars() {
        let code = c as u32;
        assert!(code <= 0xff, "character {c:?} is not Latin-1");
        out.push(code as u8);
    }
    out
}

/// Encoding 2: a constant pool reference.
pub fn cp_ref_string(index: i64) -> Vec<u8> {
    let mut out = vec![2];
    out.extend_from_slice(&leb(index as u64));
    out
}

/// A generic event record: padded 4-byte size, type id, payload.
pub fn event_bytes(type_id: i64, payload: &[u8]) -> Vec<u8> {
    let type_encoded = leb(type_id as u64);
    let size = 4 + type_encoded.len() + payload.len();

    let mut out = leb_padded(size as u64, 4);
    out.extend_from_slice(&type_encoded);
    out.extend_from_slice(payload);
    out
}

/// Declares an annotation attached to a class or field.
#[derive(Clone, Debug)]
pub struct AnnotationSpec {
    pub type_id: i64,
    pub values: Vec<(String, String)>,
}

impl AnnotationSpec {
    pub fn new(type_id: i64) -> Self {
        Self {
            type_id,
            values: vec![],
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((key.into(), value.into()));
        self
    }
}

/// Declares a setting attached to a class.
#[derive(Clone, Debug)]
pub struct SettingSpec {
    pub name: String,
    pub type_id: i64,
    pub default_value: String,
}

impl SettingSpec {
    pub fn new(name: impl Into<String>, type_id: i64, default_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id,
            default_value: default_value.into(),
        }
    }
}

/// Declares a field of a [ClassSpec].
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub type_id: i64,
    pub constant_pool: bool,
    pub array: bool,
    pub annotations: Vec<AnnotationSpec>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, type_id: i64) -> Self {
        Self {
            name: name.into(),
            type_id,
            constant_pool: false,
            array: false,
            annotations: vec![],
        }
    }

    pub fn constant_pool(mut self) -> Self {
        self.constant_pool = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }
}

/// Declares a class for a synthetic metadata event.
#[derive(Clone, Debug)]
pub struct ClassSpec {
    pub id: i64,
    pub name: String,
    pub super_type: Option<String>,
    pub simple: bool,
    pub fields: Vec<FieldSpec>,
    pub annotations: Vec<AnnotationSpec>,
    pub settings: Vec<SettingSpec>,
}

impl ClassSpec {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            super_type: None,
            simple: false,
            fields: vec![],
            annotations: vec![],
            settings: vec![],
        }
    }

    pub fn super_type(mut self, name: impl Into<String>) -> Self {
        self.super_type = Some(name.into());
        self
    }

    pub fn simple(mut self) -> Self {
        self.simple = true;
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn annotation(mut self, annotation: AnnotationSpec) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn setting(mut self, setting: SettingSpec) -> Self {
        self.settings.push(setting);
        self
    }

    /// The built-in types under the ids tests use throughout.
    pub fn primitives() -> Vec<Self> {
        [
            (4, "boolean"),
            (5, "byte"),
            (6, "short"),
            (7, "char"),
            (8, "int"),
            (9, "long"),
            (10, "float"),
            (11, "double"),
            (12, "java.lang.String"),
        ]
        .into_iter()
        .map(|(id, name)| ClassSpec::new(id, name))
        .collect()
    }
}

#[derive(Default)]
struct StringInterner {
    strings: Vec<String>,
    indices: FxHashMap<String, u64>,
}

impl StringInterner {
    fn intern(&mut self, s: &str) -> u64 {
        if let Some(index) = self.indices.get(s) {
            return *index;
        }

        let index = self.strings.len() as u64;
        self.strings.push(s.to_string());
        self.indices.insert(s.to_string(), index);
        index
    }
}

struct Element {
    name: u64,
    attributes: Vec<(u64, u64)>,
    children: Vec<Element>,
}

impl Element {
    fn serialize(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&leb(self.name));
        out.extend_from_slice(&leb(self.attributes.len() as u64));
        for (k, v) in &self.attributes {
            out.extend_from_slice(&leb(*k));
            out.extend_from_slice(&leb(*v));
        }
        out.extend_from_slice(&leb(self.children.len() as u64));
        for child in &self.children {
            child.serialize(out);
        }
    }
}

fn annotation_element(annotation: &AnnotationSpec, interner: &mut StringInterner) -> Element {
    let mut attributes = vec![(
        interner.intern("class"),
        interner.intern(&annotation.type_id.to_string()),
    )];
    for (key, value) in &annotation.values {
        attributes.push((interner.intern(key), interner.intern(value)));
    }

    Element {
        name: interner.intern("annotation"),
        attributes,
        children: vec![],
    }
}

/// Encode a full metadata event for a set of classes.
///
/// Includes the string table, the element tree (root → metadata → classes,
/// plus a region), and the event header with a padded 4-byte size.
pub fn metadata_event(classes: &[ClassSpec]) -> Vec<u8> {
    let mut interner = StringInterner::default();

    let class_elements = classes
        .iter()
        .map(|class| {
            let mut attributes = vec![
                (interner.intern("id"), interner.intern(&class.id.to_string())),
                (interner.intern("name"), interner.intern(&class.name)),
            ];
            if let Some(super_type) = &class.super_type {
                attributes.push((interner.intern("superType"), interner.intern(super_type)));
            }
            if class.simple {
                attributes.push((interner.intern("simpleType"), interner.intern("true")));
            }

            let mut children = class
                .fields
                .iter()
                .map(|field| {
                    let mut attributes = vec![
                        (interner.intern("name"), interner.intern(&field.name)),
                        (
                            interner.intern("class"),
                            interner.intern(&field.type_id.to_string()),
                        ),
                    ];
                    if field.array {
                        attributes
                            .push((interner.intern("dimension"), interner.intern("1")));
                    }
                    if field.constant_pool {
                        attributes
                            .push((interner.intern("constantPool"), interner.intern("true")));
                    }

                    let children = field
                        .annotations
                        .iter()
                        .map(|a| annotation_element(a, &mut interner))
                        .collect();

                    Element {
                        name: interner.intern("field"),
                        attributes,
                        children,
                    }
                })
                .collect::<Vec<_>>();

            children.extend(
                class
                    .annotations
                    .iter()
                    .map(|a| annotation_element(a, &mut interner)),
            );

            children.extend(class.settings.iter().map(|setting| Element {
                name: interner.intern("setting"),
                attributes: vec![
                    (interner.intern("name"), interner.intern(&setting.name)),
                    (
                        interner.intern("class"),
                        interner.intern(&setting.type_id.to_string()),
                    ),
                    (
                        interner.intern("defaultValue"),
                        interner.intern(&setting.default_value),
                    ),
                ],
                children: vec![],
            }));

            Element {
                name: interner.intern("class"),
                attributes,
                children,
            }
        })
        .collect::<Vec<_>>();

    let root = Element {
        name: interner.intern("root"),
        attributes: vec![],
        children: vec![
            Element {
                name: interner.intern("metadata"),
                attributes: vec![],
                children: class_elements,
            },
            Element {
                name: interner.intern("region"),
                attributes: vec![
                    (interner.intern("locale"), interner.intern("en_US")),
                    (interner.intern("gmtOffset"), interner.intern("0")),
                ],
                children: vec![],
            },
        ],
    };

    let mut tree = Vec::new();
    root.serialize(&mut tree);

    let mut table = Vec::new();
    for s in &interner.strings {
        table.extend_from_slice(&utf8_string(s));
    }

    // Header tail: type id, start, duration, metadata id, string count.
    let mut tail = leb(0);
    tail.extend_from_slice(&leb(0));
    tail.extend_from_slice(&leb(0));
    tail.extend_from_slice(&leb(1));
    tail.extend_from_slice(&leb(interner.strings.len() as u64));

    let size = 4 + tail.len() + table.len() + tree.len();

    let mut out = leb_padded(size as u64, 4);
    out.extend_from_slice(&tail);
    out.extend_from_slice(&table);
    out.extend_from_slice(&tree);
    out
}

/// Declares one per-type pool of a checkpoint event.
#[derive(Clone, Debug, Default)]
pub struct PoolSpec {
    pub type_id: i64,
    pub entries: Vec<(i64, Vec<u8>)>,
}

impl PoolSpec {
    pub fn new(type_id: i64) -> Self {
        Self {
            type_id,
            entries: vec![],
        }
    }

    pub fn entry(mut self, index: i64, value: Vec<u8>) -> Self {
        self.entries.push((index, value));
        self
    }
}

/// Byte offset of the padded delta field within a checkpoint event.
const CHECKPOINT_DELTA_OFFSET: usize = 7;

/// Encode a checkpoint event from pool specs.
pub fn checkpoint_event(pools: &[PoolSpec], delta: i64, flush: bool) -> Vec<u8> {
    let mut body = Vec::new();
    for pool in pools {
        body.extend_from_slice(&leb(pool.type_id as u64));
        body.extend_from_slice(&leb(pool.entries.len() as u64));
        for (index, value) in &pool.entries {
            body.extend_from_slice(&leb(*index as u64));
            body.extend_from_slice(value);
        }
    }

    checkpoint_event_raw(pools.len() as u64, &body, delta, flush)
}

/// Encode a checkpoint event from a raw pool body and explicit pool count.
///
/// Used to reproduce writer quirks a [PoolSpec] cannot express.
pub fn checkpoint_event_raw(pool_count: u64, body: &[u8], delta: i64, flush: bool) -> Vec<u8> {
    // Fixed prefix: type id 1, start 0, duration 0 are one byte each, so
    // the padded delta always lands at CHECKPOINT_DELTA_OFFSET.
    let mut tail = leb(1);
    tail.extend_from_slice(&leb(0));
    tail.extend_from_slice(&leb(0));
    tail.extend_from_slice(&leb_padded(delta as u64, 4));
    tail.push(flush as u8);
    tail.extend_from_slice(&leb(pool_count));
    tail.extend_from_slice(body);

    let size = 4 + tail.len();

    let mut out = leb_padded(size as u64, 4);
    out.extend_from_slice(&tail);

    debug_assert_eq!(
        &out[CHECKPOINT_DELTA_OFFSET..CHECKPOINT_DELTA_OFFSET + 4],
        leb_padded(delta as u64, 4).as_slice()
    );

    out
}

const CHUNK_HEADER_SIZE: usize = 68;

/// Assembles one chunk: header, events, metadata, checkpoint chain.
///
/// The header's metadata and constant pool positions, and the deltas
/// linking consecutive checkpoint events, are patched at build time.
#[derive(Default)]
pub struct ChunkBuilder {
    body: Vec<u8>,
    metadata_position: u64,
    checkpoint_positions: Vec<usize>,
}

impl ChunkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a generic event.
    pub fn add_event(mut self, type_id: i64, payload: &[u8]) -> Self {
        self.body.extend_from_slice(&event_bytes(type_id, payload));
        self
    }

    /// Append the chunk's metadata event.
    pub fn add_metadata(mut self, classes: &[ClassSpec]) -> Self {
        self.metadata_position = (CHUNK_HEADER_SIZE + self.body.len()) as u64;
        self.body.extend_from_slice(&metadata_event(classes));
        self
    }

    /// Append a checkpoint event. Chain deltas are fixed up in [Self::build].
    pub fn add_checkpoint(mut self, pools: &[PoolSpec], flush: bool) -> Self {
        self.checkpoint_positions
            .push(CHUNK_HEADER_SIZE + self.body.len());
        self.body
            .extend_from_slice(&checkpoint_event(pools, 0, flush));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut body = self.body;

        for (i, position) in self.checkpoint_positions.iter().enumerate() {
            let delta = match self.checkpoint_positions.get(i + 1) {
                Some(next) => (next - position) as u64,
                None => 0,
            };

            let field = position - CHUNK_HEADER_SIZE + CHECKPOINT_DELTA_OFFSET;
            body[field..field + 4].copy_from_slice(&leb_padded(delta, 4));
        }

        let chunk_size = (CHUNK_HEADER_SIZE + body.len()) as u64;
        let constant_pool_position = self
            .checkpoint_positions
            .first()
            .map(|p| *p as u64)
            .unwrap_or(0);

        let mut out = Vec::with_capacity(chunk_size as usize);
        out.extend_from_slice(b"FLR\0");
        out.extend_from_slice(&2u16.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&chunk_size.to_be_bytes());
        out.extend_from_slice(&constant_pool_position.to_be_bytes());
        out.extend_from_slice(&self.metadata_position.to_be_bytes());
        out.extend_from_slice(&1_600_000_000_000_000_000u64.to_be_bytes());
        out.extend_from_slice(&1_000_000_000u64.to_be_bytes());
        out.extend_from_slice(&0u64.to_be_bytes());
        out.extend_from_slice(&1_000_000_000u64.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());

        debug_assert_eq!(out.len(), CHUNK_HEADER_SIZE);

        out.extend_from_slice(&body);
        out
    }
}
