//! The schema data model.
//!
//! A [`Schema`] is one node of the type description language: primitives,
//! composites, references and mapped-type constructors. A [`Proto`] is a
//! named collection of schemas and the unit of distribution and wire
//! compatibility.
//!
//! Schemas are pure data. They are produced once, by a generator or by
//! hand, then treated as immutable by the resolver, validator and wire
//! codec; only the encode-id assigner mutates them, at generation time.
//! The serde representation is an internally tagged JSON object
//! (`{"type": "Interface", ...}`) so a proto round-trips between the
//! in-language literal form and a JSON document.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::value::Value;

/// Scalar interpretation of a `Number` schema.
///
/// `int`/`uint` travel as (zig-zag) varints, `double` and the 64-bit
/// bigint scalars as 8 fixed bytes, plain `bigint` as a length-delimited
/// byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    Uint,
    Double,
    BigInt,
    BigInt64,
    BigUint64,
}

/// Key kind accepted by an interface index signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKeyType {
    String,
    /// Keys must be non-negative integer strings.
    Number,
}

/// Index signature of an interface: a type for every otherwise
/// undeclared key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSignature {
    #[serde(rename = "keyType")]
    pub key_type: IndexKeyType,
    #[serde(rename = "type")]
    pub ty: Box<Schema>,
}

/// Declared property of an interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    /// Stable encode id within the owning property list.
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(rename = "type")]
    pub ty: Schema,
    /// Documentation comment. Presentation metadata only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One `extends` entry of an interface. The target is conventionally a
/// [`Schema::Reference`] to another interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceExtend {
    /// Stable encode id within the owning extends list.
    pub id: u32,
    #[serde(rename = "type")]
    pub ty: Schema,
}

/// Member of an `Enum` schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumMember {
    /// Stable encode id; this is what travels on the wire.
    pub id: u32,
    /// String or number member value.
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Member of a `Union` or `Intersection` schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionMember {
    /// Stable encode id within the member list.
    pub id: u32,
    #[serde(rename = "type")]
    pub ty: Schema,
}

/// One node of the schema type description language.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Schema {
    Boolean,
    Number {
        /// Defaults to [`ScalarType::Double`] when absent.
        #[serde(
            default,
            rename = "scalarType",
            skip_serializing_if = "Option::is_none"
        )]
        scalar_type: Option<ScalarType>,
    },
    String,
    /// Any value at all. Travels as JSON text.
    Any,
    /// Any non-primitive value. Travels as JSON text.
    Object,
    Date,
    /// A single concrete value. Encodes to zero bytes: the value lives in
    /// the schema. An absent `literal` field is the `undefined` literal
    /// (JSON cannot express it).
    Literal {
        #[serde(
            default,
            deserialize_with = "some_json",
            skip_serializing_if = "Option::is_none"
        )]
        literal: Option<serde_json::Value>,
    },
    Array {
        #[serde(rename = "elementType")]
        element_type: Box<Schema>,
    },
    Tuple {
        #[serde(rename = "elementTypes")]
        element_types: Vec<Schema>,
        /// Index from which elements may be omitted.
        #[serde(
            default,
            rename = "optionalStartIndex",
            skip_serializing_if = "Option::is_none"
        )]
        optional_start_index: Option<usize>,
    },
    Enum {
        members: Vec<EnumMember>,
    },
    /// Opaque byte buffer.
    Buffer {
        /// Presentation hint naming the producing typed-array flavor.
        #[serde(default, rename = "arrayType", skip_serializing_if = "Option::is_none")]
        array_type: Option<String>,
    },
    Interface {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        extends: Option<Vec<InterfaceExtend>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        properties: Option<Vec<Property>>,
        #[serde(
            default,
            rename = "indexSignature",
            skip_serializing_if = "Option::is_none"
        )]
        index_signature: Option<Box<IndexSignature>>,
    },
    /// Reference to another schema of the same proto by [`SchemaId`].
    /// Targets prefixed with `?` are opaque externals: resolution does not
    /// follow them and they behave as `Any`.
    Reference {
        target: String,
    },
    /// `T[k]`: the type of property `k` of `T`.
    IndexedAccess {
        #[serde(rename = "objectType")]
        object_type: Box<Schema>,
        index: String,
    },
    /// Union of string literals, one per flattened property name of the
    /// target.
    Keyof {
        target: Box<Schema>,
    },
    Union {
        members: Vec<UnionMember>,
    },
    Intersection {
        members: Vec<UnionMember>,
    },
    /// Keep only the named keys of the target.
    Pick {
        target: Box<Schema>,
        keys: Vec<String>,
    },
    /// Remove the named keys from the target.
    Omit {
        target: Box<Schema>,
        keys: Vec<String>,
    },
    /// Every property of the target, made optional.
    Partial {
        target: Box<Schema>,
    },
    /// The target with another interface's properties laid over it.
    Overwrite {
        target: Box<Schema>,
        overwrite: Box<Schema>,
    },
    /// The target with `null`/`undefined` branches stripped.
    NonNullable {
        target: Box<Schema>,
    },
    /// User-supplied validation and (optionally) codec callbacks.
    Custom(CustomSchema),
}

impl Schema {
    /// Tag name of this schema kind, as used in the serde representation
    /// and in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Schema::Boolean => "Boolean",
            Schema::Number { .. } => "Number",
            Schema::String => "String",
            Schema::Any => "Any",
            Schema::Object => "Object",
            Schema::Date => "Date",
            Schema::Literal { .. } => "Literal",
            Schema::Array { .. } => "Array",
            Schema::Tuple { .. } => "Tuple",
            Schema::Enum { .. } => "Enum",
            Schema::Buffer { .. } => "Buffer",
            Schema::Interface { .. } => "Interface",
            Schema::Reference { .. } => "Reference",
            Schema::IndexedAccess { .. } => "IndexedAccess",
            Schema::Keyof { .. } => "Keyof",
            Schema::Union { .. } => "Union",
            Schema::Intersection { .. } => "Intersection",
            Schema::Pick { .. } => "Pick",
            Schema::Omit { .. } => "Omit",
            Schema::Partial { .. } => "Partial",
            Schema::Overwrite { .. } => "Overwrite",
            Schema::NonNullable { .. } => "NonNullable",
            Schema::Custom(_) => "Custom",
        }
    }

    /// Shorthand for a `Number` schema with the given scalar.
    pub fn number(scalar: ScalarType) -> Schema {
        Schema::Number {
            scalar_type: Some(scalar),
        }
    }

    /// Shorthand for the default `double` number schema.
    pub fn double() -> Schema {
        Schema::Number { scalar_type: None }
    }

    /// Shorthand for a literal schema over a JSON-expressible value.
    pub fn literal(value: serde_json::Value) -> Schema {
        Schema::Literal {
            literal: Some(value),
        }
    }

    /// The `undefined` literal schema.
    pub fn literal_undefined() -> Schema {
        Schema::Literal { literal: None }
    }

    /// Shorthand for a reference schema.
    pub fn reference(target: impl Into<String>) -> Schema {
        Schema::Reference {
            target: target.into(),
        }
    }
}

/// Callbacks of a [`Schema::Custom`].
///
/// Validation is required; encode/decode are optional and default to the
/// `Any` (JSON text) wire form. The callbacks live in memory only: a proto
/// containing `Custom` schemas serializes to a bare `{"type": "Custom"}`
/// marker and cannot be read back from JSON.
#[derive(Clone)]
pub struct CustomSchema {
    pub validate: Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>,
    pub encode: Option<Arc<dyn Fn(&Value) -> Result<Vec<u8>, String> + Send + Sync>>,
    pub decode: Option<Arc<dyn Fn(&[u8]) -> Result<Value, String> + Send + Sync>>,
}

impl CustomSchema {
    /// Custom schema with a validation predicate and the default codec.
    pub fn new<F>(validate: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        CustomSchema {
            validate: Arc::new(validate),
            encode: None,
            decode: None,
        }
    }

    /// Attaches encode/decode callbacks.
    pub fn with_codec<E, D>(mut self, encode: E, decode: D) -> Self
    where
        E: Fn(&Value) -> Result<Vec<u8>, String> + Send + Sync + 'static,
        D: Fn(&[u8]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.encode = Some(Arc::new(encode));
        self.decode = Some(Arc::new(decode));
        self
    }
}

impl fmt::Debug for CustomSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomSchema")
            .field("encode", &self.encode.is_some())
            .field("decode", &self.decode.is_some())
            .finish()
    }
}

impl Serialize for CustomSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        serializer.serialize_map(Some(0))?.end()
    }
}

impl<'de> Deserialize<'de> for CustomSchema {
    fn deserialize<D: Deserializer<'de>>(_: D) -> Result<Self, D::Error> {
        Err(serde::de::Error::custom(
            "`Custom` schemas carry native callbacks and cannot be read from JSON",
        ))
    }
}

/// Identifier of a schema within a proto, conventionally
/// `{module-path}/{TypeName}`.
pub type SchemaId = String;

/// A named collection of schemas; the unit of distribution and wire
/// compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Proto {
    schemas: BTreeMap<SchemaId, Schema>,
}

impl Proto {
    pub fn new() -> Proto {
        Proto::default()
    }

    /// Adds a schema under the given id, replacing any previous one.
    pub fn insert(&mut self, id: impl Into<SchemaId>, schema: Schema) -> Option<Schema> {
        self.schemas.insert(id.into(), schema)
    }

    pub fn get(&self, id: &str) -> Option<&Schema> {
        self.schemas.get(id)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SchemaId, &Schema)> {
        self.schemas.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&SchemaId, &mut Schema)> {
        self.schemas.iter_mut()
    }

    /// Parses a proto from its JSON document form.
    pub fn from_json(json: &str) -> Result<Proto, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Renders the proto as a JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl FromIterator<(SchemaId, Schema)> for Proto {
    fn from_iter<I: IntoIterator<Item = (SchemaId, Schema)>>(iter: I) -> Proto {
        Proto {
            schemas: iter.into_iter().collect(),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Deserializes a JSON field into `Some`, so that an explicit `null`
/// stays distinguishable from an absent field (`None` = absent =
/// the `undefined` literal).
fn some_json<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(deserializer).map(Some)
}
