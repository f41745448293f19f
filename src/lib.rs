//!
//! Athanor is a schema-driven binary serialization engine: schemas are
//! runtime data (interfaces, unions, enums, tuples and mapped-type
//! constructors over them), values are validated against a schema, then
//! encoded into a compact id-tagged binary form that tolerates schema
//! evolution: a decoder skips fields it does not know, and old and new
//! binaries interoperate on the fields both generations declare.
//!
//! ```
//! use athanor::{Athanor, Property, Proto, Schema, Value};
//!
//! let mut proto = Proto::new();
//! proto.insert(
//!     "demo/Msg",
//!     Schema::Interface {
//!         extends: None,
//!         properties: Some(vec![Property {
//!             id: 0,
//!             name: "text".to_owned(),
//!             optional: false,
//!             ty: Schema::String,
//!             comment: None,
//!         }]),
//!         index_signature: None,
//!     },
//! );
//!
//! let engine = Athanor::new(proto);
//! let value = Value::object([("text", Value::from("hi"))]);
//! let bytes = engine.encode(&value, "demo/Msg").unwrap();
//! assert_eq!(engine.decode(&bytes, "demo/Msg").unwrap(), value);
//! ```
//!
#![forbid(unsafe_code)]

mod buffer;
mod deserialize;
mod ids;
mod resolve;
mod schema;
mod serialize;
mod validate;
mod value;
mod varint;


pub use self::{
    deserialize::DecodeError,
    ids::{assign_proto_ids, gen_encode_ids, literal_key, schema_key, EncodeId, IdAssignment},
    resolve::{FlatInterface, FlatProperty, Origin, SchemaError},
    schema::{
        CustomSchema, EnumMember, IndexKeyType, IndexSignature, InterfaceExtend, Property, Proto,
        ScalarType, Schema, SchemaId, UnionMember,
    },
    serialize::EncodeError,
    validate::{ValidateError, ValidateErrorKind, ValidateOptions},
    value::Value,
};

use tracing::{debug, trace};

use crate::{
    deserialize::Decoder,
    resolve::{ResolveCaches, Resolver},
    serialize::Encoder,
    validate::Validator,
};

/// Engine-wide options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Keep `null` and `undefined` distinct everywhere. Default off.
    pub strict_null_checks: bool,
    /// Trust callers and skip the pre-encode validation pass.
    pub skip_encode_validate: bool,
    /// Skip re-validating decoded values.
    pub skip_decode_validate: bool,
}

/// The serialization engine: a proto plus its resolution caches.
///
/// Construction is cheap; flattening and union-property aggregation are
/// computed lazily and memoized. The engine is immutable and freely
/// shareable across threads; every operation is a pure function over
/// the proto and a local byte cursor.
pub struct Athanor {
    proto: Proto,
    caches: ResolveCaches,
    options: Options,
}

impl Athanor {
    pub fn new(proto: Proto) -> Athanor {
        Athanor::with_options(proto, Options::default())
    }

    pub fn with_options(proto: Proto, options: Options) -> Athanor {
        debug!(schemas = proto.len(), "engine ready");
        Athanor {
            proto,
            caches: ResolveCaches::default(),
            options,
        }
    }

    pub fn proto(&self) -> &Proto {
        &self.proto
    }

    pub fn options(&self) -> Options {
        self.options
    }

    /// Validates `value` against the schema and encodes it.
    ///
    /// The pre-encode validation pass runs with excess-property checks
    /// off: undeclared fields are dropped by the encoding, they are not
    /// errors.
    pub fn encode(&self, value: &Value, schema_id: &str) -> Result<Vec<u8>, EncodeError> {
        let schema = self.resolver().schema(schema_id)?;
        if !self.options.skip_encode_validate {
            Validator::new(self.resolver(), self.validate_options(false))
                .validate(value, schema, true)?;
        }
        let bytes = Encoder::new(self.resolver(), self.options.strict_null_checks)
            .encode(value, schema, true)?;
        trace!(schema = schema_id, len = bytes.len(), "encoded");
        Ok(bytes)
    }

    /// Decodes `bytes` and re-validates the result.
    ///
    /// Wire errors and post-decode validation failures share
    /// [`DecodeError`] and are distinguishable by variant.
    pub fn decode(&self, bytes: &[u8], schema_id: &str) -> Result<Value, DecodeError> {
        let schema = self.resolver().schema(schema_id)?;
        let value = Decoder::new(self.resolver()).decode(bytes, schema, true)?;
        if !self.options.skip_decode_validate {
            Validator::new(self.resolver(), self.validate_options(true))
                .validate(&value, schema, true)?;
        }
        trace!(schema = schema_id, "decoded");
        Ok(value)
    }

    /// Checks `value` against the schema with default validation options.
    pub fn validate(&self, value: &Value, schema_id: &str) -> Result<(), ValidateError> {
        self.validate_with(value, schema_id, self.validate_options(true))
    }

    pub fn validate_with(
        &self,
        value: &Value,
        schema_id: &str,
        options: ValidateOptions,
    ) -> Result<(), ValidateError> {
        let schema = self.resolver().schema(schema_id)?;
        Validator::new(self.resolver(), options).validate(value, schema, true)
    }

    /// Builds a copy of `value` with every field the schema does not
    /// declare removed.
    pub fn prune(&self, value: &Value, schema_id: &str) -> Result<Value, ValidateError> {
        let schema = self.resolver().schema(schema_id)?;
        Validator::new(self.resolver(), self.validate_options(true)).prune(value, schema, true)
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.proto, &self.caches)
    }

    fn validate_options(&self, excess_property_checks: bool) -> ValidateOptions {
        ValidateOptions {
            excess_property_checks,
            strict_null_checks: self.options.strict_null_checks,
        }
    }
}
