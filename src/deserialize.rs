//! Decoder: bytes to values.
//!
//! The decoder walks the same wire grammar the encoder writes (see the
//! [`serialize`](crate::serialize) module docs for the id-block layout)
//! and skips any entry whose wire id it does not recognize, using only
//! the entry's 2-bit length class. Malformed input is a hard error;
//! nothing is ever coerced, and a failed decode never leaves partial
//! state behind.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    buffer::Reader,
    resolve::{FlatInterface, Origin, Resolver, SchemaError},
    schema::{Schema, ScalarType, UnionMember},
    serialize::{length_info, LengthType, OVERWRITE_OVER_WIRE_ID, OVERWRITE_TARGET_WIRE_ID, PROPERTY_WIRE_BASE},
    validate::ValidateError,
    value::Value,
    varint::{read_bigint, read_uvarint, read_varint},
};

/// Malformed bytes, schema failures and post-decode validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unexpected end of buffer")]
    OutOfBounds,

    #[error("varint is malformed or exceeds 64 bits")]
    VarintOverflow,

    #[error("integer value does not fit the target width")]
    IntegerOverflow,

    #[error("invalid boolean byte 0x{0:02X}")]
    InvalidBool(u8),

    #[error("unknown enum id {0}")]
    UnknownEnumId(u64),

    #[error("invalid utf-8 in string payload")]
    InvalidUtf8,

    #[error("invalid json payload: {0}")]
    InvalidJson(String),

    #[error("tuple payload carries more elements than the schema declares")]
    TupleOverflow,

    #[error("custom decoder failed: {0}")]
    Custom(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("decoded value failed validation: {0}")]
    Validate(#[from] ValidateError),
}

pub(crate) struct Decoder<'p> {
    resolver: Resolver<'p>,
}

impl<'p> Decoder<'p> {
    pub fn new(resolver: Resolver<'p>) -> Decoder<'p> {
        Decoder { resolver }
    }

    pub fn decode(
        &self,
        bytes: &[u8],
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Value, DecodeError> {
        let mut r = Reader::new(bytes);
        self.read_value(&mut r, schema, in_proto)
    }

    fn read_value(
        &self,
        r: &mut Reader<'_>,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Value, DecodeError> {
        let resolved = self.resolver.resolve(schema, in_proto)?;
        let (concrete, child_in_proto) = resolved.parts();
        match concrete {
            Schema::Boolean => match r.read_u8()? {
                0x00 => Ok(Value::Bool(false)),
                0xFF => Ok(Value::Bool(true)),
                other => Err(DecodeError::InvalidBool(other)),
            },
            Schema::Number { scalar_type } => {
                self.read_number(r, scalar_type.unwrap_or(ScalarType::Double))
            }
            Schema::String => Ok(Value::String(r.read_str()?.to_owned())),
            Schema::Any | Schema::Object => {
                let text = r.read_str()?;
                let json: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
                Ok(Value::from_json(&json))
            }
            Schema::Date => Ok(Value::Date(read_varint(r)?)),
            Schema::Literal { literal } => Ok(literal
                .as_ref()
                .map(Value::from_json)
                .unwrap_or(Value::Undefined)),
            Schema::Buffer { .. } => {
                let len = read_uvarint(r)? as usize;
                Ok(Value::Bytes(r.read_bytes(len)?.to_vec()))
            }
            Schema::Enum { members } => {
                let id = read_uvarint(r)?;
                let member = members
                    .iter()
                    .find(|m| u64::from(m.id) == id)
                    .ok_or(DecodeError::UnknownEnumId(id))?;
                Ok(Value::from_json(&member.value))
            }
            Schema::Array { element_type } => {
                let count = read_uvarint(r)?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(self.read_value(r, element_type, child_in_proto)?);
                }
                Ok(Value::Array(items))
            }
            Schema::Tuple { element_types, .. } => {
                let count = read_uvarint(r)? as usize;
                if count > element_types.len() {
                    return Err(DecodeError::TupleOverflow);
                }
                let mut items = Vec::with_capacity(count);
                for ty in element_types.iter().take(count) {
                    items.push(self.read_value(r, ty, child_in_proto)?);
                }
                Ok(Value::Array(items))
            }
            Schema::Interface { .. } => self.read_interface(r, concrete, child_in_proto),
            Schema::Pick { target: inner, .. }
            | Schema::Omit { target: inner, .. }
            | Schema::Partial { target: inner } => {
                if let Some(distributed) = self.resolver.distribute(concrete, child_in_proto)? {
                    return self.read_value(r, &distributed, false);
                }
                // Mapped types travel as their target interface; the view
                // is restricted to the mapped key set afterwards.
                let decoded = self.read_value(r, inner, child_in_proto)?;
                let flat = self.resolver.flatten(concrete, child_in_proto)?;
                Ok(restrict_to_flat(decoded, &flat))
            }
            Schema::Overwrite { .. } => {
                if let Some(distributed) = self.resolver.distribute(concrete, child_in_proto)? {
                    return self.read_value(r, &distributed, false);
                }
                self.read_overwrite(r, concrete, child_in_proto)
            }
            Schema::Union { members } | Schema::Intersection { members } => {
                self.read_members(r, members, child_in_proto)
            }
            Schema::Custom(custom) => match &custom.decode {
                Some(decode) => decode(r.take_remaining()).map_err(DecodeError::Custom),
                None => {
                    let text = r.read_str()?;
                    let json: serde_json::Value = serde_json::from_str(text)
                        .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
                    Ok(Value::from_json(&json))
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

    fn read_number(&self, r: &mut Reader<'_>, scalar: ScalarType) -> Result<Value, DecodeError> {
        match scalar {
            ScalarType::Double => Ok(Value::Number(r.read_f64()?)),
            ScalarType::Int => Ok(Value::Number(read_varint(r)? as f64)),
            ScalarType::Uint => Ok(Value::Number(read_uvarint(r)? as f64)),
            ScalarType::BigInt => Ok(Value::BigInt(read_bigint(r)?)),
            ScalarType::BigInt64 => Ok(Value::BigInt(i128::from(r.read_i64_le()?))),
            ScalarType::BigUint64 => Ok(Value::BigInt(i128::from(r.read_u64_le()?))),
        }
    }

    fn read_interface(
        &self,
        r: &mut Reader<'_>,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Value, DecodeError> {
        let Schema::Interface { extends, .. } = schema else {
            unreachable!("read_interface is called with a resolved interface")
        };
        let flat = self.resolver.flatten(schema, in_proto)?;

        let count = read_uvarint(r)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let tagged = read_uvarint(r)?;
            let bits = (tagged & 3) as u8;
            let wire_id = tagged >> 2;

            if wire_id == 0 {
                let key = r.read_str()?.to_owned();
                match &flat.index_signature {
                    Some(sig) => {
                        let info = length_info(self.resolver, &sig.ty, false)?;
                        if info.length_type.bits() != bits {
                            // The producer's key type differs from ours;
                            // treat the entry as unknown.
                            skip_payload(r, bits)?;
                            continue;
                        }
                        let v = self.read_payload(r, &sig.ty, false, info.needs_prefix)?;
                        if !v.is_undefined() {
                            map.insert(key, v);
                        }
                    }
                    None => skip_payload(r, bits)?,
                }
            } else if wire_id < PROPERTY_WIRE_BASE {
                let eid = (wire_id - 1) as u32;
                match extends.iter().flatten().find(|e| e.id == eid) {
                    Some(ext) => {
                        let info = length_info(self.resolver, &ext.ty, false)?;
                        if info.length_type.bits() != bits {
                            skip_payload(r, bits)?;
                            continue;
                        }
                        let parent = self.read_payload(r, &ext.ty, false, info.needs_prefix)?;
                        if let Value::Object(fields) = parent {
                            for (k, v) in fields {
                                // Own-property entries may still override.
                                map.entry(k).or_insert(v);
                            }
                        }
                    }
                    None => skip_payload(r, bits)?,
                }
            } else {
                let pid = wire_id - PROPERTY_WIRE_BASE;
                let property = flat
                    .properties
                    .iter()
                    .find(|p| p.origin == Origin::Own && u64::from(p.id) == pid);
                match property {
                    Some(p) => {
                        let info = length_info(self.resolver, &p.ty, false)?;
                        if info.length_type.bits() != bits {
                            skip_payload(r, bits)?;
                            continue;
                        }
                        let v = self.read_payload(r, &p.ty, false, info.needs_prefix)?;
                        if !v.is_undefined() {
                            map.insert(p.name.clone(), v);
                        }
                    }
                    None => skip_payload(r, bits)?,
                }
            }
        }
        Ok(Value::Object(map))
    }

    fn read_overwrite(
        &self,
        r: &mut Reader<'_>,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Value, DecodeError> {
        let Schema::Overwrite { target, overwrite } = schema else {
            unreachable!("read_overwrite is called with a resolved overwrite")
        };
        let count = read_uvarint(r)?;
        let mut merged = BTreeMap::new();
        for _ in 0..count {
            let tagged = read_uvarint(r)?;
            let bits = (tagged & 3) as u8;
            let wire_id = tagged >> 2;
            let side = match wire_id {
                OVERWRITE_TARGET_WIRE_ID => Some(&**target),
                OVERWRITE_OVER_WIRE_ID => Some(&**overwrite),
                0 => {
                    let _ = r.read_str()?;
                    None
                }
                _ => None,
            };
            match side {
                Some(side_schema) => {
                    let info = length_info(self.resolver, side_schema, in_proto)?;
                    if info.length_type.bits() != bits {
                        skip_payload(r, bits)?;
                        continue;
                    }
                    let part = self.read_payload(r, side_schema, in_proto, info.needs_prefix)?;
                    if let Value::Object(fields) = part {
                        // The overwrite entry is written last and wins.
                        merged.extend(fields);
                    }
                }
                None => skip_payload(r, bits)?,
            }
        }
        Ok(Value::Object(merged))
    }

    fn read_members(
        &self,
        r: &mut Reader<'_>,
        members: &[UnionMember],
        in_proto: bool,
    ) -> Result<Value, DecodeError> {
        let count = read_uvarint(r)?;
        let mut acc: Option<Value> = None;
        for _ in 0..count {
            let tagged = read_uvarint(r)?;
            let bits = (tagged & 3) as u8;
            let wire_id = tagged >> 2;
            if wire_id == 0 {
                let _ = r.read_str()?;
                skip_payload(r, bits)?;
                continue;
            }
            let member_id = wire_id - 1;
            match members.iter().find(|m| u64::from(m.id) == member_id) {
                Some(m) => {
                    let info = length_info(self.resolver, &m.ty, in_proto)?;
                    if info.length_type.bits() != bits {
                        skip_payload(r, bits)?;
                        continue;
                    }
                    let v = self.read_payload(r, &m.ty, in_proto, info.needs_prefix)?;
                    acc = Some(match acc.take() {
                        None => v,
                        Some(existing) => merge_members(existing, v),
                    });
                }
                None => skip_payload(r, bits)?,
            }
        }
        // A block whose every entry was skipped carries no recoverable
        // value; post-decode validation reports it against the schema.
        Ok(acc.unwrap_or(Value::Undefined))
    }

    fn read_payload(
        &self,
        r: &mut Reader<'_>,
        schema: &Schema,
        in_proto: bool,
        needs_prefix: bool,
    ) -> Result<Value, DecodeError> {
        if needs_prefix {
            let len = read_uvarint(r)? as usize;
            let span = r.read_bytes(len)?;
            let mut sub = Reader::new(span);
            self.read_value(&mut sub, schema, in_proto)
        } else {
            self.read_value(r, schema, in_proto)
        }
    }
}

/// Skips one id-block payload using only its 2-bit length class.
pub(crate) fn skip_payload(r: &mut Reader<'_>, bits: u8) -> Result<(), DecodeError> {
    match LengthType::from_bits(bits) {
        LengthType::LengthDelimited => {
            let len = read_uvarint(r)? as usize;
            r.skip(len)
        }
        LengthType::Varint => read_uvarint(r).map(|_| ()),
        LengthType::Bit64 => r.skip(8),
        LengthType::IdBlock => {
            let count = read_uvarint(r)?;
            for _ in 0..count {
                let tagged = read_uvarint(r)?;
                if tagged >> 2 == 0 {
                    let _ = r.read_str()?;
                }
                skip_payload(r, (tagged & 3) as u8)?;
            }
            Ok(())
        }
    }
}

/// Drops decoded fields outside a mapped type's key set.
fn restrict_to_flat(value: Value, flat: &FlatInterface) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| flat.property(k).is_some() || flat.index_signature.is_some())
                .collect(),
        ),
        other => other,
    }
}

/// Merges the payloads of several matching branches of one value:
/// objects union their fields, anything else keeps the first payload.
fn merge_members(acc: Value, next: Value) -> Value {
    match (acc, next) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                a.entry(k).or_insert(v);
            }
            Value::Object(a)
        }
        (acc, _) => acc,
    }
}
