//! Encoder: values to bytes.
//!
//! Primitives use varints, fixed 8-byte spans and length-prefixed spans.
//! Composites use an *id block*: a varint count of present entries
//! followed by `(taggedId, payload)` pairs, where the tagged id packs a
//! 2-bit length class (low) and the entry's stable wire id (high). The
//! 2-bit class alone is enough to skip an entry, which is what lets
//! decoders built against other schema generations ignore fields they do
//! not know.
//!
//! The wire-id partition, applied uniformly by encoder and decoder:
//! id 0 in any block is the index-signature sentinel (an explicit key
//! string precedes the payload); interface blocks use ids `1..=9` for
//! extends entries (`extends.id + 1`, payload is the parent's own block)
//! and ids `>= 10` for own properties (`property.id + 10`);
//! union/intersection blocks use `member.id + 1`; overwrite blocks use
//! `1` for the target portion and `2` for the overwrite portion.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    buffer::Writer,
    resolve::{Origin, Resolver, SchemaError},
    schema::{Schema, ScalarType, UnionMember},
    validate::{ValidateError, ValidateOptions, Validator},
    value::Value,
    varint::{write_bigint, write_uvarint, write_varint},
};

/// Wire id reserved for index-signature entries in every id block.
pub(crate) const INDEX_KEY_WIRE_ID: u64 = 0;
/// First wire id of the own-property range in interface blocks.
pub(crate) const PROPERTY_WIRE_BASE: u64 = 10;
/// Wire id of the target portion of an overwrite block.
pub(crate) const OVERWRITE_TARGET_WIRE_ID: u64 = 1;
/// Wire id of the overwrite portion of an overwrite block.
pub(crate) const OVERWRITE_OVER_WIRE_ID: u64 = 2;

/// 2-bit payload class of an id-block entry. This is all a reader needs
/// to skip an entry it does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LengthType {
    LengthDelimited = 0,
    Varint = 1,
    Bit64 = 2,
    IdBlock = 3,
}

impl LengthType {
    pub(crate) fn from_bits(bits: u8) -> LengthType {
        match bits & 3 {
            0 => LengthType::LengthDelimited,
            1 => LengthType::Varint,
            2 => LengthType::Bit64,
            _ => LengthType::IdBlock,
        }
    }

    #[inline(always)]
    pub(crate) fn bits(self) -> u8 {
        self as u8
    }
}

/// Wire shape of one id-block entry.
pub(crate) struct LengthInfo {
    pub length_type: LengthType,
    /// The payload's natural encoding is not byte-length-prefixed, so the
    /// block wraps it in an explicit varint length.
    pub needs_prefix: bool,
}

/// Classifies a schema's payload for id-block framing.
pub(crate) fn length_info(
    resolver: Resolver<'_>,
    schema: &Schema,
    in_proto: bool,
) -> Result<LengthInfo, SchemaError> {
    let resolved = resolver.resolve(schema, in_proto)?;
    let (concrete, _) = resolved.parts();
    let (length_type, needs_prefix) = match concrete {
        Schema::Number { scalar_type } => match scalar_type.unwrap_or(ScalarType::Double) {
            ScalarType::Int | ScalarType::Uint => (LengthType::Varint, false),
            ScalarType::Double | ScalarType::BigInt64 | ScalarType::BigUint64 => {
                (LengthType::Bit64, false)
            }
            ScalarType::BigInt => (LengthType::LengthDelimited, false),
        },
        Schema::Enum { .. } | Schema::Date => (LengthType::Varint, false),
        Schema::String | Schema::Buffer { .. } | Schema::Any | Schema::Object => {
            (LengthType::LengthDelimited, false)
        }
        Schema::Interface { .. }
        | Schema::Pick { .. }
        | Schema::Omit { .. }
        | Schema::Partial { .. }
        | Schema::Overwrite { .. }
        | Schema::Union { .. }
        | Schema::Intersection { .. } => (LengthType::IdBlock, false),
        // A `0xFF` boolean byte would read as a varint continuation, and
        // array/tuple/literal/custom encodings carry no byte length of
        // their own; all of these get an explicit length prefix.
        Schema::Boolean
        | Schema::Literal { .. }
        | Schema::Array { .. }
        | Schema::Tuple { .. }
        | Schema::Custom(_) => (LengthType::LengthDelimited, true),
        Schema::Reference { .. }
        | Schema::IndexedAccess { .. }
        | Schema::Keyof { .. }
        | Schema::NonNullable { .. } => {
            unreachable!("derived schemas are unwrapped by resolve()")
        }
    };
    Ok(LengthInfo {
        length_type,
        needs_prefix,
    })
}

/// Value cannot be turned into bytes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("validation failed before encode: {0}")]
    Validate(#[from] ValidateError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("cannot encode {actual} as `{expected}`")]
    NotEncodable {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("custom encoder failed: {0}")]
    Custom(String),
}

pub(crate) struct Encoder<'p> {
    resolver: Resolver<'p>,
    strict_null_checks: bool,
}

impl<'p> Encoder<'p> {
    pub fn new(resolver: Resolver<'p>, strict_null_checks: bool) -> Encoder<'p> {
        Encoder {
            resolver,
            strict_null_checks,
        }
    }

    pub fn encode(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut w = Writer::new();
        self.write_value(value, schema, in_proto, &mut w)?;
        Ok(w.into_vec())
    }

    /// Validator used to pick matching union/intersection members.
    /// Excess checks stay off: undeclared fields are dropped by encoding,
    /// never errors.
    fn validator(&self) -> Validator<'p> {
        Validator::new(
            self.resolver,
            ValidateOptions {
                excess_property_checks: false,
                strict_null_checks: self.strict_null_checks,
            },
        )
    }

    fn write_value(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        let resolved = self.resolver.resolve(schema, in_proto)?;
        let (concrete, child_in_proto) = resolved.parts();
        match concrete {
            Schema::Boolean => match value {
                Value::Bool(b) => {
                    w.write_u8(if *b { 0xFF } else { 0x00 });
                    Ok(())
                }
                other => Err(not_encodable("boolean", other)),
            },
            Schema::Number { scalar_type } => {
                self.write_number(value, scalar_type.unwrap_or(ScalarType::Double), w)
            }
            Schema::String => match value {
                Value::String(s) => {
                    w.write_str(s);
                    Ok(())
                }
                other => Err(not_encodable("string", other)),
            },
            Schema::Any | Schema::Object => {
                w.write_str(&value.to_json().to_string());
                Ok(())
            }
            Schema::Date => match value {
                Value::Date(ms) => {
                    write_varint(w, *ms);
                    Ok(())
                }
                other => Err(not_encodable("Date", other)),
            },
            // The literal value lives in the schema; zero bytes travel.
            Schema::Literal { .. } => Ok(()),
            Schema::Buffer { .. } => match value {
                Value::Bytes(bytes) => {
                    write_uvarint(w, bytes.len() as u64);
                    w.write_bytes(bytes);
                    Ok(())
                }
                other => Err(not_encodable("buffer", other)),
            },
            Schema::Enum { members } => {
                let member = members
                    .iter()
                    .find(|m| Value::from_json(&m.value) == *value)
                    .ok_or_else(|| not_encodable("enum member", value))?;
                write_uvarint(w, u64::from(member.id));
                Ok(())
            }
            Schema::Array { element_type } => {
                let Value::Array(items) = value else {
                    return Err(not_encodable("Array", value));
                };
                write_uvarint(w, items.len() as u64);
                for item in items {
                    self.write_value(item, element_type, child_in_proto, w)?;
                }
                Ok(())
            }
            Schema::Tuple { element_types, .. } => {
                self.write_tuple(value, element_types, child_in_proto, w)
            }
            Schema::Interface { .. } => self.write_interface(value, concrete, child_in_proto, w),
            Schema::Pick { target: inner, .. }
            | Schema::Omit { target: inner, .. }
            | Schema::Partial { target: inner } => {
                // Mapped types travel as their target interface: picking
                // or omitting never perturbs wire ids, absent fields are
                // simply absent.
                if let Some(distributed) = self.resolver.distribute(concrete, child_in_proto)? {
                    self.write_value(value, &distributed, false, w)
                } else {
                    self.write_value(value, inner, child_in_proto, w)
                }
            }
            Schema::Overwrite { .. } => {
                if let Some(distributed) = self.resolver.distribute(concrete, child_in_proto)? {
                    self.write_value(value, &distributed, false, w)
                } else {
                    self.write_overwrite(value, concrete, child_in_proto, w)
                }
            }
            Schema::Union { members } | Schema::Intersection { members } => {
                self.write_members(value, concrete, members, child_in_proto, w)
            }
            Schema::Custom(custom) => match &custom.encode {
                Some(encode) => {
                    let bytes = encode(value).map_err(EncodeError::Custom)?;
                    w.write_bytes(&bytes);
                    Ok(())
                }
                None => {
                    w.write_str(&value.to_json().to_string());
                    Ok(())
                }
            },
            Schema::Reference { .. }
            | Schema::IndexedAccess { .. }
            | Schema::Keyof { .. }
            | Schema::NonNullable { .. } => {
                unreachable!("derived schemas are unwrapped by resolve()")
            }
        }
    }

    fn write_number(
        &self,
        value: &Value,
        scalar: ScalarType,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        match (scalar, value) {
            (ScalarType::Double, Value::Number(n)) => w.write_f64(*n),
            (ScalarType::Int, Value::Number(n)) => write_varint(w, *n as i64),
            (ScalarType::Uint, Value::Number(n)) => write_uvarint(w, *n as u64),
            (ScalarType::BigInt, Value::BigInt(b)) => write_bigint(w, *b),
            (ScalarType::BigInt64, Value::BigInt(b)) => {
                let b = i64::try_from(*b).map_err(|_| not_encodable("bigint64", value))?;
                w.write_i64_le(b);
            }
            (ScalarType::BigUint64, Value::BigInt(b)) => {
                let b = u64::try_from(*b).map_err(|_| not_encodable("biguint64", value))?;
                w.write_u64_le(b);
            }
            (ScalarType::BigInt | ScalarType::BigInt64 | ScalarType::BigUint64, other) => {
                return Err(not_encodable("bigint", other))
            }
            (_, other) => return Err(not_encodable("number", other)),
        }
        Ok(())
    }

    fn write_tuple(
        &self,
        value: &Value,
        element_types: &[Schema],
        in_proto: bool,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        let Value::Array(items) = value else {
            return Err(not_encodable("Array", value));
        };
        let mut upper = items.len().min(element_types.len());
        while upper > 0 {
            let omitted = match &items[upper - 1] {
                Value::Undefined => true,
                Value::Null if !self.strict_null_checks => {
                    !self.resolver.can_be_null(&element_types[upper - 1])?
                }
                _ => false,
            };
            if !omitted {
                break;
            }
            upper -= 1;
        }
        write_uvarint(w, upper as u64);
        for (item, ty) in items.iter().zip(element_types).take(upper) {
            self.write_value(item, ty, in_proto, w)?;
        }
        Ok(())
    }

    fn write_interface(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        let Value::Object(map) = value else {
            return Err(not_encodable("object", value));
        };
        let Schema::Interface { extends, .. } = schema else {
            unreachable!("write_interface is called with a resolved interface")
        };
        let flat = self.resolver.flatten(schema, in_proto)?;

        // Route each declared field to the list that defines it.
        let mut own = Vec::new();
        let mut inherited: BTreeMap<u32, BTreeMap<String, Value>> = BTreeMap::new();
        for p in &flat.properties {
            let Some(v) = map.get(&p.name) else { continue };
            if self.omits(v, &p.ty)? {
                continue;
            }
            match p.origin {
                Origin::Own => own.push((p, v)),
                Origin::Extend(eid) => {
                    inherited
                        .entry(eid)
                        .or_default()
                        .insert(p.name.clone(), v.clone());
                }
            }
        }

        // Undeclared keys travel as index-signature entries.
        let mut extra = Vec::new();
        if let Some(sig) = &flat.index_signature {
            for (k, v) in map {
                if flat.property(k).is_none() && !self.omits(v, &sig.ty)? {
                    extra.push((k, v));
                }
            }
        }

        write_uvarint(w, (inherited.len() + own.len() + extra.len()) as u64);

        for (eid, fields) in inherited {
            let ext = extends
                .iter()
                .flatten()
                .find(|e| e.id == eid)
                .unwrap_or_else(|| unreachable!("flatten only records declared extends ids"));
            self.write_entry(u64::from(eid) + 1, &ext.ty, &Value::Object(fields), w)?;
        }
        for (p, v) in own {
            self.write_entry(u64::from(p.id) + PROPERTY_WIRE_BASE, &p.ty, v, w)?;
        }
        if let Some(sig) = &flat.index_signature {
            for (k, v) in extra {
                let info = length_info(self.resolver, &sig.ty, false)?;
                write_uvarint(
                    w,
                    (INDEX_KEY_WIRE_ID << 2) | u64::from(info.length_type.bits()),
                );
                w.write_str(k);
                self.write_payload(v, &sig.ty, false, info.needs_prefix, w)?;
            }
        }
        Ok(())
    }

    fn write_overwrite(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        let Value::Object(map) = value else {
            return Err(not_encodable("object", value));
        };
        let Schema::Overwrite { target, overwrite } = schema else {
            unreachable!("write_overwrite is called with a resolved overwrite")
        };
        let target_flat = self.resolver.flatten(target, in_proto)?;
        let over_flat = self.resolver.flatten(overwrite, in_proto)?;

        let mut target_side = BTreeMap::new();
        let mut over_side = BTreeMap::new();
        for (k, v) in map {
            if v.is_undefined() {
                continue;
            }
            let overwritten = over_flat.property(k).is_some()
                || (over_flat.index_signature.is_some() && target_flat.property(k).is_none());
            if overwritten {
                over_side.insert(k.clone(), v.clone());
            } else {
                target_side.insert(k.clone(), v.clone());
            }
        }

        let count = usize::from(!target_side.is_empty()) + usize::from(!over_side.is_empty());
        write_uvarint(w, count as u64);
        if !target_side.is_empty() {
            self.write_entry(
                OVERWRITE_TARGET_WIRE_ID,
                target,
                &Value::Object(target_side),
                w,
            )?;
        }
        if !over_side.is_empty() {
            self.write_entry(
                OVERWRITE_OVER_WIRE_ID,
                overwrite,
                &Value::Object(over_side),
                w,
            )?;
        }
        Ok(())
    }

    fn write_members(
        &self,
        value: &Value,
        schema: &Schema,
        members: &[UnionMember],
        in_proto: bool,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        // Every matching member is written, so a value spanning several
        // object branches keeps all of its fields; the decoder merges.
        let matching = self
            .validator()
            .matching_members(value, schema, members, in_proto)?;
        if matching.is_empty() {
            return Err(not_encodable("union member", value));
        }
        write_uvarint(w, matching.len() as u64);
        for m in matching {
            self.write_entry(u64::from(m.id) + 1, &m.ty, value, w)?;
        }
        Ok(())
    }

    fn write_entry(
        &self,
        wire_id: u64,
        schema: &Schema,
        value: &Value,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        let info = length_info(self.resolver, schema, false)?;
        write_uvarint(w, (wire_id << 2) | u64::from(info.length_type.bits()));
        self.write_payload(value, schema, false, info.needs_prefix, w)
    }

    fn write_payload(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
        needs_prefix: bool,
        w: &mut Writer,
    ) -> Result<(), EncodeError> {
        if needs_prefix {
            let mut tmp = Writer::new();
            self.write_value(value, schema, in_proto, &mut tmp)?;
            let bytes = tmp.into_vec();
            write_uvarint(w, bytes.len() as u64);
            w.write_bytes(&bytes);
            Ok(())
        } else {
            self.write_value(value, schema, in_proto, w)
        }
    }

    /// Whether a property value stays off the wire entirely.
    fn omits(&self, value: &Value, ty: &Schema) -> Result<bool, SchemaError> {
        Ok(match value {
            Value::Undefined => true,
            // A `null` that the slot cannot hold stands for `undefined`
            // under non-strict null checks.
            Value::Null if !self.strict_null_checks => !self.resolver.can_be_null(ty)?,
            _ => false,
        })
    }
}

fn not_encodable(expected: &'static str, actual: &Value) -> EncodeError {
    EncodeError::NotEncodable {
        expected,
        actual: actual.type_name(),
    }
}
