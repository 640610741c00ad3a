// Copyright 2023 Gregory Szorc.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Metadata events.
//!
//! Each chunk defines its own type system in a single metadata event. The
//! event is three parts back to back: a [MetadataHeader], a string table
//! (decoded lazily by [crate::string_table::LazyStringTable]), and a tree
//! of elements in which every name, attribute key, and attribute value is
//! an index into that table.
//!
//! The tree arrives as uniform integer-valued [ElementRecord]s. Typed
//! elements are built from them in one recursive pass that matches on
//! resolved names:
//!
//! * root
//!   * metadata
//!     * [ClassElement] 0..N
//!       * [AnnotationElement] 0..N
//!       * [FieldElement] 0..N
//!         * [AnnotationElement] 0..N
//!       * [SettingsElement] 0..N
//!         * [AnnotationElement] 0..N
//!   * [RegionElement]
//!
//! The [Metadata] struct is the chunk's type dictionary: it owns the string
//! table and the class definitions and resolves classes by id and by name.
//! It also computes a stable fingerprint of the event schema which keys the
//! process-wide deserializer cache.

use {
    crate::{
        chunk::{ChunkHeader, TimeResolver},
        common::{leb128_i32, leb128_i64},
        error::{Error, ParseResult, Result},
        skipper::TypeSkipper,
        string_table::{LazyStringTable, StringValue},
        value::PrimitiveKind,
    },
    chrono::FixedOffset,
    nom::{
        error::context,
        multi::count,
        sequence::{pair, tuple},
    },
    rustc_hash::{FxHashMap, FxHasher},
    std::{
        borrow::Cow,
        cell::{OnceCell, RefCell},
        hash::Hasher,
        rc::Rc,
        str::FromStr,
        sync::Arc,
    },
};

/// The fixed leading fields of the metadata event.
///
/// A metadata event begins like any record — size, then type id, which is
/// always 0 — and continues with timing, a self id, and the number of
/// string table entries that follow.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetadataHeader {
    pub size: i32,
    pub type_id: i64,
    pub start_nanos: i64,
    pub duration_nanos: i64,
    pub metadata_id: i64,
    /// How many string table entries follow this header.
    pub string_count: i32,
}

impl MetadataHeader {
    pub fn parse(s: &[u8]) -> ParseResult<Self> {
        let (s, (size, type_id)) = pair(leb128_i32, leb128_i64)(s)?;
        let (s, (start_nanos, duration_nanos, metadata_id)) =
            tuple((leb128_i64, leb128_i64, leb128_i64))(s)?;
        let (s, string_count) = leb128_i32(s)?;

        Ok((
            s,
            Self {
                size,
                type_id,
                start_nanos,
                duration_nanos,
                metadata_id,
                string_count,
            },
        ))
    }
}

/// One node of the metadata element tree, still in integer form.
///
/// The wire encodes every element the same way — a name, a run of
/// key/value attribute pairs, then nested children — with all text
/// expressed as string table indices. Typed elements are built from these
/// by resolving the names and matching on them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ElementRecord {
    pub name_index: i32,
    pub attributes: Vec<(i32, i32)>,
    pub children: Vec<ElementRecord>,
}

impl ElementRecord {
    pub fn parse(s: &[u8]) -> ParseResult<Self> {
        let (s, (name_index, attribute_count)) = pair(leb128_i32, leb128_i32)(s)?;

        let (s, attributes) =
            count(pair(leb128_i32, leb128_i32), attribute_count.max(0) as usize)(s)?;

        let (s, child_count) = leb128_i32(s)?;

        let (s, children) = count(Self::parse, child_count.max(0) as usize)(s)?;

        Ok((
            s,
            Self {
                name_index,
                attributes,
                children,
            },
        ))
    }
}

/// Resolve a string table index that must hold inline text.
///
/// Names and attributes in the element tree cannot be pool references —
/// pools are not decodable until the metadata itself is — so anything
/// else is malformed.
fn attr_str<'a>(st: &mut LazyStringTable<'a>, index: i32) -> Result<Cow<'a, str>> {
    // A negative index sign-extends to an out-of-range slot and fails the
    // table's bounds check.
    st.get(index as usize)?.to_cow().ok_or_else(|| {
        Error::ElementConstructLogic(format!(
            "string {index} in the element tree is not inline text"
        ))
    })
}

fn element_name<'a>(record: &ElementRecord, st: &mut LazyStringTable<'a>) -> Result<Cow<'a, str>> {
    attr_str(st, record.name_index)
}

fn missing_attr(element: &'static str, attr: &'static str) -> Error {
    Error::ElementConstructLogic(format!("{element} element is missing its {attr} attribute"))
}

fn unknown_attr(element: &'static str, attr: &str) -> Error {
    Error::ElementConstructLogic(format!("{element} element carries unknown attribute {attr}"))
}

fn parse_i64_attr(v: &str, what: &'static str) -> Result<i64> {
    i64::from_str(v)
        .map_err(|e| Error::ElementConstructLogic(format!("{what} is not an integer: {e}")))
}

#[derive(Clone, Debug)]
pub struct AnnotationElement<'a> {
    /// Class id of the annotation type.
    pub type_id: i64,
    pub values: Vec<(Cow<'a, str>, Cow<'a, str>)>,
}

impl<'a> AnnotationElement<'a> {
    fn from_record(record: ElementRecord, st: &mut LazyStringTable<'a>) -> Result<Self> {
        // One attribute names the annotation type; everything else is an
        // arbitrary key/value payload kept verbatim.
        let mut type_id = None;
        let mut values = Vec::with_capacity(record.attributes.len().saturating_sub(1));

        for (key, value) in record.attributes {
            let key = attr_str(st, key)?;
            let value = attr_str(st, value)?;

            if key == "class" {
                type_id = Some(parse_i64_attr(value.as_ref(), "annotation type id")?);
            } else {
                values.push((key, value));
            }
        }

        Ok(Self {
            type_id: type_id.ok_or_else(|| missing_attr("annotation", "class"))?,
            values,
        })
    }
}

/// One field declaration inside a class.
#[derive(Clone, Debug)]
pub struct FieldElement<'a> {
    pub annotations: Vec<AnnotationElement<'a>>,
    pub name: Cow<'a, str>,
    /// Id of the class this field is typed as.
    pub type_id: i64,
    /// Present and positive for array fields.
    pub dimension: Option<i64>,
    /// When set, the field is encoded as a varint index into the constant
    /// pool of its type rather than as an inline value.
    pub constant_pool: bool,
}

impl<'a> FieldElement<'a> {
    fn from_record(record: ElementRecord, st: &mut LazyStringTable<'a>) -> Result<Self> {
        let mut name = None;
        let mut type_id = None;
        let mut dimension = None;
        let mut constant_pool = false;

        for (key, value) in record.attributes {
            let key = attr_str(st, key)?;
            let value = attr_str(st, value)?;

            match key.as_ref() {
                "name" => {
                    name.replace(value);
                }
                "class" => {
                    type_id.replace(value);
                }
                "dimension" => {
                    dimension.replace(parse_i64_attr(value.as_ref(), "field dimension")?);
                }
                // Always "true" when present.
                "constantPool" => {
                    constant_pool = true;
                }
                other => return Err(unknown_attr("field", other)),
            }
        }

        let annotations = record
            .children
            .into_iter()
            .map(|child| match element_name(&child, st)?.as_ref() {
                "annotation" => AnnotationElement::from_record(child, st),
                other => Err(Error::ElementConstructLogic(format!(
                    "field element has {other} child, expected annotation"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let name = name.ok_or_else(|| missing_attr("field", "name"))?;
        let type_id = type_id.ok_or_else(|| missing_attr("field", "class"))?;
        let type_id = parse_i64_attr(type_id.as_ref(), "field type id")?;

        Ok(Self {
            annotations,
            name,
            type_id,
            dimension,
            constant_pool,
        })
    }

    /// True for array fields.
    pub fn is_array_type(&self) -> bool {
        self.dimension.unwrap_or(0) > 0
    }
}

/// A recorder setting declared on an event class.
#[derive(Clone, Debug)]
pub struct SettingsElement<'a> {
    pub annotations: Vec<AnnotationElement<'a>>,
    pub name: Cow<'a, str>,
    /// Id of the class typing the setting's value.
    pub type_id: i64,
    pub default_value: Cow<'a, str>,
}

impl<'a> SettingsElement<'a> {
    fn from_record(record: ElementRecord, st: &mut LazyStringTable<'a>) -> Result<Self> {
        let mut name = None;
        let mut type_id = None;
        let mut default_value = None;

        for (key, value) in record.attributes {
            let key = attr_str(st, key)?;
            let value = attr_str(st, value)?;

            match key.as_ref() {
                "name" => {
                    name.replace(value);
                }
                "class" => {
                    type_id.replace(value);
                }
                "defaultValue" => {
                    default_value.replace(value);
                }
                other => return Err(unknown_attr("setting", other)),
            }
        }

        let annotations = record
            .children
            .into_iter()
            .map(|child| match element_name(&child, st)?.as_ref() {
                "annotation" => AnnotationElement::from_record(child, st),
                other => Err(Error::ElementConstructLogic(format!(
                    "setting element has {other} child, expected annotation"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        let name = name.ok_or_else(|| missing_attr("setting", "name"))?;
        let type_id = type_id.ok_or_else(|| missing_attr("setting", "class"))?;
        let type_id = parse_i64_attr(type_id.as_ref(), "setting type id")?;
        let default_value = default_value.ok_or_else(|| missing_attr("setting", "defaultValue"))?;

        Ok(Self {
            annotations,
            name,
            type_id,
            default_value,
        })
    }
}

/// One class declaration — a type in the chunk's dictionary.
#[derive(Clone, Debug)]
pub struct ClassElement<'a> {
    pub annotations: Vec<AnnotationElement<'a>>,
    /// Field declarations, in encoding order.
    pub fields: Vec<FieldElement<'a>>,
    pub settings: Vec<SettingsElement<'a>>,
    /// Fully qualified name, `java.lang.String` style.
    pub name: Cow<'a, str>,
    pub super_type: Option<Cow<'a, str>>,
    /// Whether this is a transparent single-field wrapper.
    pub simple_type: Option<Cow<'a, str>>,
    /// The id fields and events use to refer to this class.
    pub id: i64,
}

impl<'a> ClassElement<'a> {
    fn from_record(record: ElementRecord, st: &mut LazyStringTable<'a>) -> Result<Self> {
        let mut name = None;
        let mut super_type = None;
        let mut simple_type = None;
        let mut id = None;

        for (key, value) in record.attributes {
            let key = attr_str(st, key)?;
            let value = attr_str(st, value)?;

            match key.as_ref() {
                "name" => {
                    name.replace(value);
                }
                "superType" => {
                    super_type.replace(value);
                }
                "simpleType" => {
                    simple_type.replace(value);
                }
                "id" => {
                    id.replace(value);
                }
                other => return Err(unknown_attr("class", other)),
            }
        }

        let mut annotations = vec![];
        let mut fields = vec![];
        let mut settings = vec![];

        for child in record.children {
            match element_name(&child, st)?.as_ref() {
                "annotation" => annotations.push(AnnotationElement::from_record(child, st)?),
                "field" => fields.push(FieldElement::from_record(child, st)?),
                "setting" => settings.push(SettingsElement::from_record(child, st)?),
                other => {
                    return Err(Error::ElementConstructLogic(format!(
                        "class element has unexpected {other} child"
                    )));
                }
            }
        }

        let name = name.ok_or_else(|| missing_attr("class", "name"))?;
        let id = id.ok_or_else(|| missing_attr("class", "id"))?;
        let id = parse_i64_attr(id.as_ref(), "class id")?;

        Ok(Self {
            annotations,
            fields,
            settings,
            name,
            super_type,
            simple_type,
            id,
        })
    }

    /// Whether instances of this class are transparent wrappers around their
    /// single field.
    ///
    /// Value walking and skipper programs unwrap such classes to the
    /// underlying field.
    pub fn is_simple_wrapper(&self) -> bool {
        matches!(self.simple_type.as_deref(), Some("true")) && self.fields.len() == 1
    }

    /// Every annotation reachable from this class: its own, its fields',
    /// and its settings'. Duplicates are possible.
    pub fn all_annotations(&self) -> impl Iterator<Item = &AnnotationElement<'a>> + '_ {
        self.annotations
            .iter()
            .chain(self.fields.iter().flat_map(|f| f.annotations.iter()))
            .chain(self.settings.iter().flat_map(|s| s.annotations.iter()))
    }
}

/// Locale and timezone information recorded alongside the type dictionary.
#[derive(Clone, Debug, Default)]
pub struct RegionElement<'a> {
    pub locale: Option<Cow<'a, str>>,
    /// Offset from GMT in milliseconds, kept as its string spelling.
    pub gmt_offset: Option<Cow<'a, str>>,
}

impl<'a> RegionElement<'a> {
    fn from_record(record: ElementRecord, st: &mut LazyStringTable<'a>) -> Result<Self> {
        let mut locale = None;
        let mut gmt_offset = None;

        for (key, value) in record.attributes {
            let key = attr_str(st, key)?;
            let value = attr_str(st, value)?;

            match key.as_ref() {
                "locale" => {
                    locale.replace(value);
                }
                "gmtOffset" => {
                    gmt_offset.replace(value);
                }
                other => return Err(unknown_attr("region", other)),
            }
        }

        Ok(Self { locale, gmt_offset })
    }

    /// The recording's UTC offset. Chunks without one resolve as UTC.
    pub fn fixed_offset(&self) -> Result<FixedOffset> {
        let millis = match self.gmt_offset.as_deref() {
            Some(v) => parse_i64_attr(v, "region gmtOffset")?,
            None => 0,
        };

        FixedOffset::east_opt((millis / 1000) as i32).ok_or_else(|| {
            Error::ElementConstructLogic(format!("region gmtOffset out of range: {millis}"))
        })
    }
}

/// A chunk's type dictionary.
///
/// Built from one fully decoded metadata event. Resolves classes by
/// numeric id and by name, answers which ids are built-in primitives, and
/// caches the per-class artifacts derived from the dictionary (skip
/// programs, the schema fingerprint).
pub struct Metadata<'a> {
    /// The header of the event this dictionary was built from.
    pub header: MetadataHeader,

    /// The table every tree name and attribute indexes into.
    ///
    /// Frozen once the element tree is read; the interior mutability only
    /// caches decoded entries.
    string_table: RefCell<LazyStringTable<'a>>,

    /// Locale information for the chunk.
    pub region: RegionElement<'a>,

    classes: FxHashMap<i64, Arc<ClassElement<'a>>>,
    names: FxHashMap<String, i64>,
    primitives: FxHashMap<i64, PrimitiveKind>,
    skippers: RefCell<FxHashMap<i64, Rc<TypeSkipper>>>,
    fingerprint: OnceCell<u64>,
}

impl<'a> Metadata<'a> {
    /// Decode a whole metadata event into a type dictionary.
    ///
    /// Input must start at the event record itself, size field first.
    pub fn parse(s: &'a [u8]) -> Result<(&'a [u8], Self)> {
        let (s, header) = context("reading metadata header", MetadataHeader::parse)(s)?;

        let (s, string_table) =
            LazyStringTable::parse(s, header.string_count.max(0) as usize)?;

        let (s, root) = context("reading metadata element tree", ElementRecord::parse)(s)?;

        let metadata = Self::build(header, string_table, root)?;

        Ok((s, metadata))
    }

    /// Turn the integer-valued tree into the typed dictionary.
    ///
    /// Resolves every name and attribute through the string table and
    /// constructs the lookup tables.
    fn build(
        header: MetadataHeader,
        mut st: LazyStringTable<'a>,
        root: ElementRecord,
    ) -> Result<Self> {
        if element_name(&root, &mut st)?.as_ref() != "root" {
            return Err(Error::ElementConstructLogic(
                "metadata tree does not start at a root element".to_string(),
            ));
        }

        let mut class_elements = vec![];
        let mut region = None;

        for child in root.children {
            match element_name(&child, &mut st)?.as_ref() {
                "metadata" => {
                    for el in child.children {
                        match element_name(&el, &mut st)?.as_ref() {
                            "class" => {
                                class_elements.push(ClassElement::from_record(el, &mut st)?)
                            }
                            other => {
                                return Err(Error::ElementConstructLogic(format!(
                                    "metadata element has unexpected {other} child"
                                )));
                            }
                        }
                    }
                }
                "region" => {
                    region.replace(RegionElement::from_record(child, &mut st)?);
                }
                other => return Err(Error::ElementNameUnknown(other.to_string())),
            }
        }

        let mut classes =
            FxHashMap::with_capacity_and_hasher(class_elements.len(), Default::default());
        let mut names = FxHashMap::with_capacity_and_hasher(class_elements.len(), Default::default());
        let mut primitives = FxHashMap::default();

        for class in class_elements {
            if let Some(kind) = PrimitiveKind::from_name(class.name.as_ref()) {
                primitives.insert(class.id, kind);
            }

            names.insert(class.name.to_string(), class.id);
            classes.insert(class.id, Arc::new(class));
        }

        Ok(Self {
            header,
            string_table: RefCell::new(st),
            region: region.unwrap_or_default(),
            classes,
            names,
            primitives,
            skippers: RefCell::new(FxHashMap::default()),
            fingerprint: OnceCell::new(),
        })
    }

    /// Look up a class by its id.
    pub fn class_by_id(&self, id: i64) -> Option<&ClassElement<'a>> {
        self.classes.get(&id).map(|x| x.as_ref())
    }

    /// Look up a class by its fully qualified name.
    pub fn class_by_name(&self, name: &str) -> Option<&ClassElement<'a>> {
        self.class_by_id(*self.names.get(name)?)
    }

    /// Resolve the class ID for the class having the specified name.
    pub fn class_id(&self, name: &str) -> Option<i64> {
        self.names.get(name).copied()
    }

    /// Resolve the name of the class having the specified ID.
    pub fn class_name(&self, id: i64) -> Option<&str> {
        self.class_by_id(id).map(|c| c.name.as_ref())
    }

    /// Iterate over all classes defined by this chunk.
    pub fn classes(&self) -> impl Iterator<Item = &ClassElement<'a>> + '_ {
        self.classes.values().map(|x| x.as_ref())
    }

    /// Number of classes defined by this chunk.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Obtain an entry from the chunk's string table.
    ///
    /// Lookups are bounds checked.
    pub fn get_string(&self, index: usize) -> Result<StringValue<'a>> {
        Ok(self.string_table.borrow_mut().get(index)?.clone())
    }

    /// The primitive kind of a class, if it is one of the built-in types.
    pub fn primitive_kind(&self, id: i64) -> Option<PrimitiveKind> {
        self.primitives.get(&id).copied()
    }

    /// Obtain the compiled skip program for a class, building it on first use.
    pub fn skipper_for(&self, class_id: i64) -> Result<Rc<TypeSkipper>> {
        if let Some(skipper) = self.skippers.borrow().get(&class_id) {
            return Ok(skipper.clone());
        }

        let skipper = Rc::new(TypeSkipper::build(class_id, self)?);
        self.skippers
            .borrow_mut()
            .insert(class_id, skipper.clone());

        Ok(skipper)
    }

    /// Construct a [TimeResolver] for this chunk.
    pub fn time_resolver(&self, header: &ChunkHeader) -> Result<TimeResolver> {
        TimeResolver::new(header, &self.region)
    }

    /// A stable hash of the event schema this chunk declares.
    ///
    /// Derived from the full set of (class name, super type, ordered field
    /// (name, type name, dimension, constant pool)) tuples. Two chunks with
    /// equal fingerprints can share specialised deserializers.
    pub fn fingerprint(&self) -> u64 {
        *self.fingerprint.get_or_init(|| {
            let mut ids = self.classes.keys().copied().collect::<Vec<_>>();
            ids.sort_unstable();

            let mut hasher = FxHasher::default();

            for id in ids {
                let class = &self.classes[&id];

                hasher.write(class.name.as_bytes());
                hasher.write_u8(0);
                hasher.write(class.super_type.as_deref().unwrap_or("").as_bytes());
                hasher.write_u8(0);

                for field in &class.fields {
                    hasher.write(field.name.as_bytes());
                    hasher.write_u8(0);
                    match self.class_name(field.type_id) {
                        Some(name) => hasher.write(name.as_bytes()),
                        None => hasher.write_i64(field.type_id),
                    }
                    hasher.write_i64(field.dimension.unwrap_or(0));
                    hasher.write_u8(field.constant_pool as u8);
                }
            }

            hasher.finish()
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{metadata_event, ClassSpec, FieldSpec};

    fn test_classes() -> Vec<ClassSpec> {
        let mut classes = ClassSpec::primitives();
        classes.push(
            ClassSpec::new(100, "jdk.CustomEvent")
                .super_type("jdk.jfr.Event")
                .field(FieldSpec::new("startTime", 9))
                .field(FieldSpec::new("message", 12)),
        );
        classes
    }

    #[test]
    fn parse_and_lookup() {
        let event = metadata_event(&test_classes());
        let (_, metadata) = Metadata::parse(&event).unwrap();

        assert_eq!(metadata.header.type_id, 0);

        let class = metadata.class_by_id(100).unwrap();
        assert_eq!(class.name, "jdk.CustomEvent");
        assert_eq!(class.super_type.as_deref(), Some("jdk.jfr.Event"));
        assert_eq!(class.fields.len(), 2);
        assert_eq!(class.fields[0].name, "startTime");
        assert_eq!(class.fields[0].type_id, 9);

        assert_eq!(metadata.class_id("jdk.CustomEvent"), Some(100));
        assert_eq!(
            metadata.class_by_name("java.lang.String").map(|c| c.id),
            Some(12)
        );
        assert!(metadata.class_by_id(999).is_none());
        assert!(metadata.class_by_name("no.such.Class").is_none());

        assert_eq!(metadata.primitive_kind(9), Some(PrimitiveKind::Long));
        assert_eq!(metadata.primitive_kind(100), None);
    }

    #[test]
    fn string_table_is_bounds_checked() {
        let event = metadata_event(&test_classes());
        let (_, metadata) = Metadata::parse(&event).unwrap();

        assert!(metadata.get_string(0).is_ok());
        assert!(metadata.get_string(100_000).is_err());
    }

    #[test]
    fn fingerprint_is_schema_sensitive() {
        let a = metadata_event(&test_classes());
        let (_, md_a) = Metadata::parse(&a).unwrap();

        // Same schema, fresh parse: identical fingerprint.
        let b = metadata_event(&test_classes());
        let (_, md_b) = Metadata::parse(&b).unwrap();
        assert_eq!(md_a.fingerprint(), md_b.fingerprint());

        // Adding a field changes the fingerprint.
        let mut classes = test_classes();
        classes.pop();
        classes.push(
            ClassSpec::new(100, "jdk.CustomEvent")
                .super_type("jdk.jfr.Event")
                .field(FieldSpec::new("startTime", 9))
                .field(FieldSpec::new("message", 12))
                .field(FieldSpec::new("count", 8)),
        );
        let c = metadata_event(&classes);
        let (_, md_c) = Metadata::parse(&c).unwrap();
        assert_ne!(md_a.fingerprint(), md_c.fingerprint());
    }

    #[test]
    fn simple_wrapper_detection() {
        let mut classes = ClassSpec::primitives();
        classes.push(
            ClassSpec::new(50, "jdk.types.Ticks")
                .simple()
                .field(FieldSpec::new("value", 9)),
        );
        let event = metadata_event(&classes);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        assert!(metadata.class_by_id(50).unwrap().is_simple_wrapper());
        assert!(!metadata.class_by_id(9).unwrap().is_simple_wrapper());
    }

    #[test]
    fn annotations_and_settings_attach_to_their_owners() {
        use crate::testutil::{AnnotationSpec, SettingSpec};

        let mut classes = ClassSpec::primitives();
        classes.push(ClassSpec::new(200, "jdk.jfr.Label"));
        classes.push(
            ClassSpec::new(100, "jdk.CustomEvent")
                .super_type("jdk.jfr.Event")
                .annotation(AnnotationSpec::new(200).value("value", "Custom Event"))
                .setting(SettingSpec::new("enabled", 4, "true"))
                .field(
                    FieldSpec::new("startTime", 9)
                        .annotation(AnnotationSpec::new(200).value("value", "Start Time")),
                ),
        );

        let event = metadata_event(&classes);
        let (_, metadata) = Metadata::parse(&event).unwrap();

        let class = metadata.class_by_id(100).unwrap();

        assert_eq!(class.annotations.len(), 1);
        assert_eq!(class.annotations[0].type_id, 200);
        assert_eq!(class.annotations[0].values.len(), 1);
        assert_eq!(class.annotations[0].values[0].0, "value");
        assert_eq!(class.annotations[0].values[0].1, "Custom Event");

        assert_eq!(class.settings.len(), 1);
        assert_eq!(class.settings[0].name, "enabled");
        assert_eq!(class.settings[0].type_id, 4);
        assert_eq!(class.settings[0].default_value, "true");

        assert_eq!(class.fields[0].annotations.len(), 1);
        assert_eq!(class.fields[0].annotations[0].type_id, 200);

        // Class, field, and setting annotations all surface here.
        assert_eq!(class.all_annotations().count(), 2);
    }

    #[test]
    fn region_defaults_to_utc() {
        let region = RegionElement::default();
        assert_eq!(region.fixed_offset().unwrap().local_minus_utc(), 0);

        let region = RegionElement {
            locale: Some("en_US".into()),
            gmt_offset: Some("3600000".into()),
        };
        assert_eq!(region.fixed_offset().unwrap().local_minus_utc(), 3600);
    }
}
