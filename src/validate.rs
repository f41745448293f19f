//! Recursive structural validation and value pruning.
//!
//! Validation walks a value and a schema together, resolving references
//! and flattening interfaces on the way down. Failures are values, never
//! panics, and carry the property path they occurred under. Pruning is
//! the same traversal building a copy of the value with every undeclared
//! field dropped instead of reported.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use thiserror::Error;

use crate::{
    resolve::{FlatInterface, Resolver, SchemaError, ANY_NUMBER_KEY, ANY_STRING_KEY},
    schema::{IndexKeyType, ScalarType, Schema, UnionMember},
    value::Value,
};

/// Validation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Reject object fields the flattened schema does not declare
    /// (unless an index signature or an enclosing union branch admits
    /// them). Default on.
    pub excess_property_checks: bool,
    /// Keep `null` and `undefined` distinct. Default off: either stands
    /// for the other wherever exactly one of them is admitted.
    pub strict_null_checks: bool,
}

impl Default for ValidateOptions {
    fn default() -> ValidateOptions {
        ValidateOptions {
            excess_property_checks: true,
            strict_null_checks: false,
        }
    }
}

/// Value does not conform to the schema.
///
/// Displays as the failure itself, prefixed with the property path when
/// the failure is nested: ``Property `a.b`: expected type `string`, ...``.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidateError {
    path: Vec<String>,
    kind: ValidateErrorKind,
}

impl ValidateError {
    pub(crate) fn new(kind: ValidateErrorKind) -> ValidateError {
        ValidateError {
            path: Vec::new(),
            kind,
        }
    }

    /// Prefixes the path with one more segment on the way out of a
    /// nested check.
    pub(crate) fn at(mut self, segment: impl Into<String>) -> ValidateError {
        self.path.insert(0, segment.into());
        self
    }

    pub fn kind(&self) -> &ValidateErrorKind {
        &self.kind
    }

    /// Dotted property path of the failure; empty at the root.
    pub fn path(&self) -> String {
        self.path.join(".")
    }
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "Property `{}`: {}", self.path.join("."), self.kind)
        }
    }
}

impl std::error::Error for ValidateError {}

impl From<SchemaError> for ValidateError {
    fn from(err: SchemaError) -> ValidateError {
        ValidateError::new(ValidateErrorKind::Schema(err))
    }
}

/// The ways a value can fail validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidateErrorKind {
    #[error("expected type `{expected}`, actual `{actual}`")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("`{value}` is not a valid `{scalar}`")]
    InvalidScalar {
        scalar: &'static str,
        value: String,
    },

    #[error("expected `{expected}`, actual `{actual}`")]
    LiteralMismatch { expected: String, actual: String },

    #[error("missing required property `{0}`")]
    MissingProperty(String),

    #[error("excess property `{0}`")]
    ExcessProperty(String),

    #[error("`{0}` is not a valid key for a numeric index signature")]
    InvalidNumberKey(String),

    #[error("value has {len} elements but the tuple allows at most {max}")]
    TupleOverLength { len: usize, max: usize },

    #[error("`{0}` is not a member of the enum")]
    InvalidEnumValue(String),

    #[error("value does not match any union member:{0}")]
    UnionMismatch(String),

    #[error("{0}")]
    Custom(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Per-branch validation context.
#[derive(Clone, Copy, Default)]
struct Cx<'a> {
    /// Build a pruned copy instead of reporting excess properties.
    prune: bool,
    /// Property names admitted by an enclosing union/intersection, so a
    /// field of a sibling branch is never "excess" here.
    union_props: Option<&'a BTreeSet<String>>,
}

impl<'a> Cx<'a> {
    /// Context for child values: sibling admissions do not travel into
    /// nested objects.
    fn child(&self) -> Cx<'static> {
        Cx {
            prune: self.prune,
            union_props: None,
        }
    }
}

pub(crate) struct Validator<'p> {
    resolver: Resolver<'p>,
    options: ValidateOptions,
}

impl<'p> Validator<'p> {
    pub fn new(resolver: Resolver<'p>, options: ValidateOptions) -> Validator<'p> {
        Validator { resolver, options }
    }

    /// Checks `value` against `schema`. `in_proto` states whether the
    /// schema reference is owned by the engine's proto.
    pub fn validate(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<(), ValidateError> {
        self.check(value, schema, in_proto, Cx::default())
            .map(|_| ())
    }

    /// Builds a copy of `value` with all fields absent from the schema
    /// removed.
    pub fn prune(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Value, ValidateError> {
        let pruned = self.check(
            value,
            schema,
            in_proto,
            Cx {
                prune: true,
                union_props: None,
            },
        )?;
        Ok(pruned.unwrap_or_else(|| value.clone()))
    }

    /// The members of a union/intersection that `value` conforms to,
    /// with sibling-branch fields admitted. Used by the encoder.
    pub fn matching_members<'m>(
        &self,
        value: &Value,
        schema: &Schema,
        members: &'m [UnionMember],
        in_proto: bool,
    ) -> Result<Vec<&'m UnionMember>, SchemaError> {
        let props = if value.as_object().is_some() {
            Some(self.resolver.union_properties(schema, in_proto)?)
        } else {
            None
        };
        let cx = Cx {
            prune: false,
            union_props: props.as_deref(),
        };
        let mut matching = Vec::new();
        for m in members {
            match self.check(value, &m.ty, in_proto, cx) {
                Ok(_) => matching.push(m),
                Err(err) => {
                    if let ValidateErrorKind::Schema(schema_err) = err.kind() {
                        return Err(schema_err.clone());
                    }
                }
            }
        }
        Ok(matching)
    }

    /// Core traversal. Returns the pruned copy in prune mode, `None`
    /// otherwise.
    fn check(
        &self,
        value: &Value,
        schema: &Schema,
        in_proto: bool,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        let resolved = self.resolver.resolve(schema, in_proto)?;
        let (target, child_in_proto) = resolved.parts();

        // Under non-strict null checks, a nullish value may stand for the
        // other nullish kind when only that one is admitted.
        if !self.options.strict_null_checks && value.is_nullish() {
            let fits = match value {
                Value::Null => self.resolver.can_be_null(target)?,
                _ => self.resolver.can_be_undefined(target)?,
            };
            if !fits {
                let swapped = match value {
                    Value::Null => Value::Undefined,
                    _ => Value::Null,
                };
                let swapped_fits = match swapped {
                    Value::Null => self.resolver.can_be_null(target)?,
                    _ => self.resolver.can_be_undefined(target)?,
                };
                if swapped_fits {
                    return self.check_concrete(&swapped, target, child_in_proto, cx);
                }
            }
        }

        self.check_concrete(value, target, child_in_proto, cx)
    }

    fn check_concrete(
        &self,
        value: &Value,
        target: &Schema,
        child_in_proto: bool,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        match target {
            Schema::Boolean => match value {
                Value::Bool(_) => pass(value, cx),
                other => Err(mismatch("boolean", other)),
            },
            Schema::Number { scalar_type } => {
                self.check_number(value, scalar_type.unwrap_or(ScalarType::Double), cx)
            }
            Schema::String => match value {
                Value::String(_) => pass(value, cx),
                other => Err(mismatch("string", other)),
            },
            Schema::Any => pass(value, cx),
            Schema::Object => match value {
                Value::Object(_) | Value::Array(_) | Value::Date(_) | Value::Bytes(_) => {
                    pass(value, cx)
                }
                other => Err(mismatch("object", other)),
            },
            Schema::Date => match value {
                Value::Date(_) => pass(value, cx),
                other => Err(mismatch("Date", other)),
            },
            Schema::Buffer { .. } => match value {
                Value::Bytes(_) => pass(value, cx),
                other => Err(mismatch("buffer", other)),
            },
            Schema::Literal { literal } => {
                let expected = literal
                    .as_ref()
                    .map(Value::from_json)
                    .unwrap_or(Value::Undefined);
                let equal = *value == expected
                    || (!self.options.strict_null_checks
                        && expected.is_nullish()
                        && value.is_nullish());
                if equal {
                    pass(value, cx)
                } else {
                    Err(ValidateError::new(ValidateErrorKind::LiteralMismatch {
                        expected: display_value(&expected),
                        actual: display_value(value),
                    }))
                }
            }
            Schema::Enum { members } => {
                if !matches!(value, Value::Number(_) | Value::String(_)) {
                    return Err(mismatch("string | number", value));
                }
                let known = members
                    .iter()
                    .any(|m| Value::from_json(&m.value) == *value);
                if known {
                    pass(value, cx)
                } else {
                    Err(ValidateError::new(ValidateErrorKind::InvalidEnumValue(
                        display_value(value),
                    )))
                }
            }
            Schema::Array { element_type } => {
                let Value::Array(items) = value else {
                    return Err(mismatch("Array", value));
                };
                let mut pruned = cx.prune.then(Vec::new);
                for (i, item) in items.iter().enumerate() {
                    let out = self
                        .check(item, element_type, child_in_proto, cx.child())
                        .map_err(|e| e.at(i.to_string()))?;
                    if let Some(list) = &mut pruned {
                        list.push(out.unwrap_or_else(|| item.clone()));
                    }
                }
                Ok(pruned.map(Value::Array))
            }
            Schema::Tuple {
                element_types,
                optional_start_index,
            } => self.check_tuple(
                value,
                element_types,
                *optional_start_index,
                child_in_proto,
                cx,
            ),
            Schema::Interface { .. }
            | Schema::Pick { .. }
            | Schema::Omit { .. }
            | Schema::Partial { .. }
            | Schema::Overwrite { .. } => {
                if let Some(distributed) = self.resolver.distribute(target, child_in_proto)? {
                    return self.check_concrete(value, &distributed, false, cx);
                }
                let flat = self.resolver.flatten(target, child_in_proto)?;
                self.check_flat(value, &flat, cx)
            }
            Schema::Union { members } => self.check_union(value, target, members, child_in_proto, cx),
            Schema::Intersection { members } => {
                self.check_intersection(value, target, members, child_in_proto, cx)
            }
            Schema::Custom(custom) => match (custom.validate)(value) {
                Ok(()) => pass(value, cx),
                Err(msg) => Err(ValidateError::new(ValidateErrorKind::Custom(msg))),
            },
            // `resolve` unwraps these before we get here.
            Schema::Reference { .. }
            | Schema::IndexedAccess { .. }
            | Schema::Keyof { .. }
            | Schema::NonNullable { .. } => {
                unreachable!("derived schemas are unwrapped by resolve()")
            }
        }
    }

    fn check_number(
        &self,
        value: &Value,
        scalar: ScalarType,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        let invalid = |name: &'static str, value: &Value| {
            Err(ValidateError::new(ValidateErrorKind::InvalidScalar {
                scalar: name,
                value: display_value(value),
            }))
        };
        match scalar {
            ScalarType::Double => match value {
                Value::Number(_) => pass(value, cx),
                other => Err(mismatch("number", other)),
            },
            ScalarType::Int => match value {
                Value::Number(n) => {
                    if n.fract() == 0.0
                        && *n >= i64::MIN as f64
                        && *n <= i64::MAX as f64
                    {
                        pass(value, cx)
                    } else {
                        invalid("int", value)
                    }
                }
                other => Err(mismatch("number", other)),
            },
            ScalarType::Uint => match value {
                Value::Number(n) => {
                    if n.fract() == 0.0 && *n >= 0.0 && *n <= u64::MAX as f64 {
                        pass(value, cx)
                    } else {
                        invalid("uint", value)
                    }
                }
                other => Err(mismatch("number", other)),
            },
            ScalarType::BigInt => match value {
                Value::BigInt(_) => pass(value, cx),
                other => Err(mismatch("bigint", other)),
            },
            ScalarType::BigInt64 => match value {
                Value::BigInt(b) => {
                    if *b >= i128::from(i64::MIN) && *b <= i128::from(i64::MAX) {
                        pass(value, cx)
                    } else {
                        invalid("bigint64", value)
                    }
                }
                other => Err(mismatch("bigint", other)),
            },
            ScalarType::BigUint64 => match value {
                Value::BigInt(b) => {
                    if *b >= 0 && *b <= i128::from(u64::MAX) {
                        pass(value, cx)
                    } else {
                        invalid("biguint64", value)
                    }
                }
                other => Err(mismatch("bigint", other)),
            },
        }
    }

    fn check_tuple(
        &self,
        value: &Value,
        element_types: &[Schema],
        optional_start_index: Option<usize>,
        child_in_proto: bool,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        let Value::Array(items) = value else {
            return Err(mismatch("Array", value));
        };
        if !cx.prune && items.len() > element_types.len() {
            return Err(ValidateError::new(ValidateErrorKind::TupleOverLength {
                len: items.len(),
                max: element_types.len(),
            }));
        }

        let absent = |item: Option<&Value>, ty: &Schema| -> Result<bool, ValidateError> {
            Ok(match item {
                None => true,
                Some(v) if v.is_undefined() => true,
                Some(v) if v.is_null() && !self.options.strict_null_checks => {
                    !self.resolver.can_be_null(ty)?
                }
                _ => false,
            })
        };

        // Omission by position only works for the trailing run of absent
        // slots: a hole in the middle has no wire representation, so it
        // must be admitted by the slot type itself.
        let mut last_present = 0;
        for (i, ty) in element_types.iter().enumerate().rev() {
            if !absent(items.get(i), ty)? {
                last_present = i + 1;
                break;
            }
        }

        let mut pruned = cx.prune.then(Vec::new);
        for (i, ty) in element_types.iter().enumerate() {
            let item = items.get(i);
            let nullish = absent(item, ty)?;
            if nullish {
                let omittable = (i >= last_present
                    && optional_start_index.map_or(false, |s| i >= s))
                    || self.resolver.can_be_undefined(ty)?
                    || (!self.options.strict_null_checks && self.resolver.can_be_null(ty)?);
                if !omittable {
                    return Err(ValidateError::new(ValidateErrorKind::MissingProperty(
                        i.to_string(),
                    )));
                }
                if let (Some(list), Some(_)) = (&mut pruned, item) {
                    // A present-but-omittable slot keeps its place so later
                    // slots do not shift.
                    list.push(Value::Undefined);
                }
                continue;
            }
            // `nullish` is false only when the item exists.
            let Some(item) = item else { continue };
            let out = self
                .check(item, ty, child_in_proto, cx.child())
                .map_err(|e| e.at(i.to_string()))?;
            if let Some(list) = &mut pruned {
                list.push(out.unwrap_or_else(|| item.clone()));
            }
        }

        if let Some(list) = &mut pruned {
            while matches!(list.last(), Some(Value::Undefined)) {
                list.pop();
            }
        }
        Ok(pruned.map(Value::Array))
    }

    fn check_flat(
        &self,
        value: &Value,
        flat: &FlatInterface,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        let Value::Object(map) = value else {
            return Err(mismatch("object", value));
        };
        let mut pruned = cx.prune.then(BTreeMap::new);

        // Undeclared keys: index signature, sibling-branch admission,
        // excess.
        for (key, v) in map {
            if flat.property(key).is_some() {
                continue;
            }
            if let Some(sig) = &flat.index_signature {
                if sig.key_type == IndexKeyType::Number && !is_number_key(key) {
                    return Err(ValidateError::new(ValidateErrorKind::InvalidNumberKey(
                        key.clone(),
                    )));
                }
                if v.is_undefined() {
                    continue;
                }
                let out = self
                    .check(v, &sig.ty, false, cx.child())
                    .map_err(|e| e.at(key.clone()))?;
                if let Some(out_map) = &mut pruned {
                    out_map.insert(key.clone(), out.unwrap_or_else(|| v.clone()));
                }
                continue;
            }
            let admitted_by_sibling = cx.union_props.map_or(false, |allowed| {
                allowed.contains(key)
                    || allowed.contains(ANY_STRING_KEY)
                    || (allowed.contains(ANY_NUMBER_KEY) && is_number_key(key))
            });
            if admitted_by_sibling || cx.prune || !self.options.excess_property_checks {
                // Sibling fields are checked by their own branch; in prune
                // mode undeclared fields are silently dropped.
                continue;
            }
            return Err(ValidateError::new(ValidateErrorKind::ExcessProperty(
                key.clone(),
            )));
        }

        // Declared properties.
        for p in &flat.properties {
            let v = map.get(&p.name);
            let treat_absent = match v {
                None => true,
                Some(Value::Undefined) => true,
                Some(Value::Null) if !self.options.strict_null_checks => {
                    !self.resolver.can_be_null(&p.ty)?
                        && !self.resolver.can_be_undefined(&p.ty)?
                }
                _ => false,
            };
            if treat_absent {
                let tolerated = p.optional
                    || self.resolver.can_be_undefined(&p.ty)?
                    || (!self.options.strict_null_checks && self.resolver.can_be_null(&p.ty)?);
                if !tolerated {
                    return Err(ValidateError::new(ValidateErrorKind::MissingProperty(
                        p.name.clone(),
                    )));
                }
                continue;
            }
            let Some(v) = v else { continue };
            let out = self
                .check(v, &p.ty, false, cx.child())
                .map_err(|e| e.at(p.name.clone()))?;
            if let Some(out_map) = &mut pruned {
                let kept = out.unwrap_or_else(|| v.clone());
                if !kept.is_undefined() {
                    out_map.insert(p.name.clone(), kept);
                }
            }
        }

        Ok(pruned.map(Value::Object))
    }

    fn check_union(
        &self,
        value: &Value,
        target: &Schema,
        members: &[UnionMember],
        child_in_proto: bool,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        let merged_props = self.branch_properties(value, target, child_in_proto, cx)?;
        let member_cx = Cx {
            prune: cx.prune,
            union_props: merged_props.as_ref(),
        };

        let mut failures: Vec<(&UnionMember, ValidateError)> = Vec::new();
        let mut merged: Option<Value> = None;
        for m in members {
            match self.check(value, &m.ty, child_in_proto, member_cx) {
                Ok(out) => {
                    if !cx.prune {
                        return Ok(None);
                    }
                    let out = out.unwrap_or_else(|| value.clone());
                    merged = Some(match merged.take() {
                        None => out,
                        Some(acc) => merge_branches(acc, out),
                    });
                }
                Err(err) => failures.push((m, err)),
            }
        }

        match merged {
            Some(out) => Ok(Some(out)),
            None => Err(self.union_failure(failures)),
        }
    }

    fn check_intersection(
        &self,
        value: &Value,
        target: &Schema,
        members: &[UnionMember],
        child_in_proto: bool,
        cx: Cx<'_>,
    ) -> Result<Option<Value>, ValidateError> {
        let merged_props = self.branch_properties(value, target, child_in_proto, cx)?;
        let member_cx = Cx {
            prune: cx.prune,
            union_props: merged_props.as_ref(),
        };

        let mut merged: Option<Value> = None;
        for m in members {
            let out = self.check(value, &m.ty, child_in_proto, member_cx)?;
            if cx.prune {
                let out = out.unwrap_or_else(|| value.clone());
                merged = Some(match merged.take() {
                    None => out,
                    Some(acc) => merge_branches(acc, out),
                });
            }
        }
        Ok(merged)
    }

    /// Property names admitted across every branch of a union or
    /// intersection, merged with whatever an enclosing one admitted.
    fn branch_properties(
        &self,
        value: &Value,
        target: &Schema,
        in_proto: bool,
        cx: Cx<'_>,
    ) -> Result<Option<BTreeSet<String>>, SchemaError> {
        if value.as_object().is_none() {
            return Ok(None);
        }
        if !self.options.excess_property_checks && !cx.prune {
            return Ok(None);
        }
        let own = self.resolver.union_properties(target, in_proto)?;
        let mut merged = (*own).clone();
        if let Some(outer) = cx.union_props {
            merged.extend(outer.iter().cloned());
        }
        Ok(Some(merged))
    }

    fn union_failure(&self, failures: Vec<(&UnionMember, ValidateError)>) -> ValidateError {
        if failures.is_empty() {
            return ValidateError::new(ValidateErrorKind::UnionMismatch(String::new()));
        }

        let first = failures[0].1.clone();
        if failures.iter().all(|(_, e)| *e == first) {
            return first;
        }

        // Literal members fail on almost everything; a single failure
        // from a non-literal member is the interesting one.
        let mut non_literal = failures.iter().filter(|(m, _)| {
            !matches!(
                self.resolver
                    .resolve(&m.ty, false)
                    .map(|r| matches!(r.schema.as_ref(), Schema::Literal { .. })),
                Ok(true)
            )
        });
        if let (Some((_, culprit)), None) = (non_literal.next(), non_literal.next()) {
            return culprit.clone();
        }

        let mut details = String::new();
        for (m, err) in &failures {
            details.push_str(&format!("\n  - member {}: {err}", m.id));
        }
        ValidateError::new(ValidateErrorKind::UnionMismatch(details))
    }
}

#[inline]
fn pass(value: &Value, cx: Cx<'_>) -> Result<Option<Value>, ValidateError> {
    Ok(cx.prune.then(|| value.clone()))
}

fn mismatch(expected: &'static str, actual: &Value) -> ValidateError {
    ValidateError::new(ValidateErrorKind::TypeMismatch {
        expected,
        actual: actual.type_name(),
    })
}

/// Merges the pruned outputs of two matching branches: object outputs
/// union their fields, anything else keeps the earlier output.
fn merge_branches(acc: Value, next: Value) -> Value {
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

/// A canonical non-negative integer string: `0`, or digits without a
/// leading zero.
fn is_number_key(key: &str) -> bool {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    key == "0" || !key.starts_with('0')
}

/// Value rendering for diagnostics.
fn display_value(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_owned(),
        Value::Date(ms) => format!("Date({ms})"),
        Value::Bytes(bytes) => format!("buffer[{}]", bytes.len()),
        Value::BigInt(i) => format!("{i}n"),
        other => other.to_json().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolve::ResolveCaches,
        schema::{IndexSignature, Property, Proto},
    };

    fn prop(id: u32, name: &str, optional: bool, ty: Schema) -> Property {
        Property {
            id,
            name: name.to_owned(),
            optional,
            ty,
            comment: None,
        }
    }

    struct Fixture {
        proto: Proto,
        caches: ResolveCaches,
    }

    impl Fixture {
        fn new(proto: Proto) -> Fixture {
            Fixture {
                proto,
                caches: ResolveCaches::default(),
            }
        }

        fn validator(&self, options: ValidateOptions) -> Validator<'_> {
            Validator::new(Resolver::new(&self.proto, &self.caches), options)
        }

        fn validate(&self, value: &Value, id: &str) -> Result<(), ValidateError> {
            self.validator(ValidateOptions::default()).validate(
                value,
                self.proto.get(id).expect("schema exists"),
                true,
            )
        }

        fn prune(&self, value: &Value, id: &str) -> Result<Value, ValidateError> {
            self.validator(ValidateOptions::default()).prune(
                value,
                self.proto.get(id).expect("schema exists"),
                true,
            )
        }
    }

    fn message_fixture() -> Fixture {
        let mut proto = Proto::new();
        proto.insert(
            "demo/Msg",
            Schema::Interface {
                extends: None,
                properties: Some(vec![
                    prop(0, "a", false, Schema::String),
                    prop(1, "b", true, Schema::double()),
                ]),
                index_signature: None,
            },
        );
        Fixture::new(proto)
    }

    #[test]
    fn required_and_optional_properties() {
        let fx = message_fixture();

        assert!(fx.validate(&Value::object([("a", Value::from("x"))]), "demo/Msg").is_ok());
        assert!(fx
            .validate(
                &Value::object([("a", Value::from("x")), ("b", Value::from(1.0))]),
                "demo/Msg"
            )
            .is_ok());

        let err = fx
            .validate(&Value::object([("a", Value::from(1))]), "demo/Msg")
            .expect_err("type mismatch");
        assert_eq!(err.path(), "a");
        assert_eq!(
            err.kind(),
            &ValidateErrorKind::TypeMismatch {
                expected: "string",
                actual: "number"
            }
        );

        let err = fx
            .validate(&Value::object([("b", Value::from(1.0))]), "demo/Msg")
            .expect_err("missing property");
        assert_eq!(
            err.kind(),
            &ValidateErrorKind::MissingProperty("a".to_owned())
        );
    }

    #[test]
    fn excess_properties_are_rejected_and_pruned() {
        let fx = message_fixture();
        let value = Value::object([("a", Value::from("x")), ("z", Value::from(1))]);

        let err = fx.validate(&value, "demo/Msg").expect_err("excess");
        assert_eq!(err.kind(), &ValidateErrorKind::ExcessProperty("z".to_owned()));

        let pruned = fx.prune(&value, "demo/Msg").expect("prunes");
        assert_eq!(pruned, Value::object([("a", Value::from("x"))]));
    }

    #[test]
    fn nested_paths_accumulate() {
        let mut proto = Proto::new();
        proto.insert(
            "demo/Inner",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "deep", false, Schema::Boolean)]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/Outer",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "inner", false, Schema::reference("demo/Inner"))]),
                index_signature: None,
            },
        );
        let fx = Fixture::new(proto);

        let err = fx
            .validate(
                &Value::object([("inner", Value::object([("deep", Value::from(1))]))]),
                "demo/Outer",
            )
            .expect_err("nested mismatch");
        assert_eq!(err.path(), "inner.deep");
        assert!(err.to_string().starts_with("Property `inner.deep`:"));
    }

    #[test]
    fn scalar_constraints() {
        let fx = Fixture::new(Proto::new());
        let v = fx.validator(ValidateOptions::default());

        assert!(v
            .validate(&Value::from(1.5), &Schema::double(), false)
            .is_ok());
        assert!(v
            .validate(&Value::from(-3), &Schema::number(ScalarType::Int), false)
            .is_ok());
        assert!(v
            .validate(&Value::from(1.5), &Schema::number(ScalarType::Int), false)
            .is_err());
        assert!(v
            .validate(&Value::from(-1), &Schema::number(ScalarType::Uint), false)
            .is_err());
        assert!(v
            .validate(
                &Value::BigInt(42),
                &Schema::number(ScalarType::BigInt),
                false
            )
            .is_ok());
        assert!(v
            .validate(&Value::from(42), &Schema::number(ScalarType::BigInt), false)
            .is_err());
        assert!(v
            .validate(
                &Value::BigInt(i128::from(u64::MAX)),
                &Schema::number(ScalarType::BigInt64),
                false
            )
            .is_err());
    }

    #[test]
    fn nullish_interchange_under_default_options() {
        let fx = Fixture::new(Proto::new());
        let v = fx.validator(ValidateOptions::default());

        let nullable = Schema::Union {
            members: vec![
                UnionMember {
                    id: 0,
                    ty: Schema::String,
                },
                UnionMember {
                    id: 1,
                    ty: Schema::literal(serde_json::Value::Null),
                },
            ],
        };
        assert!(v.validate(&Value::Null, &nullable, false).is_ok());
        // `undefined` stands in for `null` by default.
        assert!(v.validate(&Value::Undefined, &nullable, false).is_ok());

        let strict = fx.validator(ValidateOptions {
            strict_null_checks: true,
            ..ValidateOptions::default()
        });
        assert!(strict.validate(&Value::Undefined, &nullable, false).is_err());
    }

    #[test]
    fn union_sibling_fields_are_not_excess() {
        let mut proto = Proto::new();
        proto.insert(
            "demo/A",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "a", false, Schema::String)]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/B",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "b", false, Schema::double())]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/AB",
            Schema::Union {
                members: vec![
                    UnionMember {
                        id: 0,
                        ty: Schema::reference("demo/A"),
                    },
                    UnionMember {
                        id: 1,
                        ty: Schema::reference("demo/B"),
                    },
                ],
            },
        );
        let fx = Fixture::new(proto);

        let value = Value::object([("a", Value::from("x")), ("b", Value::from(1.0))]);
        assert!(fx.validate(&value, "demo/AB").is_ok());

        let err = fx
            .validate(
                &Value::object([("a", Value::from("x")), ("zzz", Value::from(1.0))]),
                "demo/AB",
            )
            .expect_err("zzz belongs to no branch");
        assert!(matches!(err.kind(), ValidateErrorKind::UnionMismatch(_)));
    }

    #[test]
    fn union_prune_merges_matching_branches() {
        let mut proto = Proto::new();
        proto.insert(
            "demo/A",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "a", false, Schema::String)]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/B",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "b", false, Schema::double())]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/AB",
            Schema::Union {
                members: vec![
                    UnionMember {
                        id: 0,
                        ty: Schema::reference("demo/A"),
                    },
                    UnionMember {
                        id: 1,
                        ty: Schema::reference("demo/B"),
                    },
                ],
            },
        );
        let fx = Fixture::new(proto);

        let value = Value::object([
            ("a", Value::from("x")),
            ("b", Value::from(1.0)),
            ("junk", Value::from(true)),
        ]);
        let pruned = fx.prune(&value, "demo/AB").expect("prunes");
        assert_eq!(
            pruned,
            Value::object([("a", Value::from("x")), ("b", Value::from(1.0))])
        );
    }

    #[test]
    fn union_failure_surfaces_the_non_literal_culprit() {
        let union = Schema::Union {
            members: vec![
                UnionMember {
                    id: 0,
                    ty: Schema::literal(serde_json::json!("a")),
                },
                UnionMember {
                    id: 1,
                    ty: Schema::double(),
                },
            ],
        };
        let fx = Fixture::new(Proto::new());
        let v = fx.validator(ValidateOptions::default());

        let err = v
            .validate(&Value::from(true), &union, false)
            .expect_err("no member matches");
        assert_eq!(
            err.kind(),
            &ValidateErrorKind::TypeMismatch {
                expected: "number",
                actual: "boolean"
            }
        );
    }

    #[test]
    fn intersection_requires_every_member() {
        let mut proto = Proto::new();
        proto.insert(
            "demo/A",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "a", false, Schema::String)]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/B",
            Schema::Interface {
                extends: None,
                properties: Some(vec![prop(0, "b", false, Schema::double())]),
                index_signature: None,
            },
        );
        proto.insert(
            "demo/AB",
            Schema::Intersection {
                members: vec![
                    UnionMember {
                        id: 0,
                        ty: Schema::reference("demo/A"),
                    },
                    UnionMember {
                        id: 1,
                        ty: Schema::reference("demo/B"),
                    },
                ],
            },
        );
        let fx = Fixture::new(proto);

        assert!(fx
            .validate(
                &Value::object([("a", Value::from("x")), ("b", Value::from(1.0))]),
                "demo/AB"
            )
            .is_ok());
        assert!(fx
            .validate(&Value::object([("a", Value::from("x"))]), "demo/AB")
            .is_err());
    }

    #[test]
    fn numeric_index_signature_checks_keys() {
        let mut proto = Proto::new();
        proto.insert(
            "demo/Sparse",
            Schema::Interface {
                extends: None,
                properties: None,
                index_signature: Some(Box::new(IndexSignature {
                    key_type: IndexKeyType::Number,
                    ty: Box::new(Schema::String),
                })),
            },
        );
        let fx = Fixture::new(proto);

        assert!(fx
            .validate(&Value::object([("0", Value::from("x"))]), "demo/Sparse")
            .is_ok());
        let err = fx
            .validate(&Value::object([("01", Value::from("x"))]), "demo/Sparse")
            .expect_err("non-canonical key");
        assert_eq!(
            err.kind(),
            &ValidateErrorKind::InvalidNumberKey("01".to_owned())
        );
    }

    #[test]
    fn tuple_rules() {
        let tuple = Schema::Tuple {
            element_types: vec![Schema::String, Schema::double(), Schema::Boolean],
            optional_start_index: Some(1),
        };
        let fx = Fixture::new(Proto::new());
        let v = fx.validator(ValidateOptions::default());

        assert!(v
            .validate(&Value::array([Value::from("x")]), &tuple, false)
            .is_ok());
        assert!(v
            .validate(
                &Value::array([Value::from("x"), Value::from(1.0), Value::from(true)]),
                &tuple,
                false
            )
            .is_ok());
        assert!(v.validate(&Value::array([]), &tuple, false).is_err());
        // A hole in the middle has no wire form and the slot type does not
        // admit `undefined`.
        assert!(v
            .validate(
                &Value::array([Value::from("x"), Value::Undefined, Value::from(true)]),
                &tuple,
                false
            )
            .is_err());
        let over = Value::array([
            Value::from("x"),
            Value::from(1.0),
            Value::from(true),
            Value::from(0),
        ]);
        assert!(matches!(
            v.validate(&over, &tuple, false).expect_err("too long").kind(),
            ValidateErrorKind::TupleOverLength { len: 4, max: 3 }
        ));

        // Pruning truncates to the schema-permitted prefix.
        let pruned = v.prune(&over, &tuple, false).expect("prunes");
        assert_eq!(
            pruned,
            Value::array([Value::from("x"), Value::from(1.0), Value::from(true)])
        );
    }

    #[test]
    fn custom_schemas_delegate() {
        let even = Schema::Custom(crate::schema::CustomSchema::new(|v| match v {
            Value::Number(n) if *n % 2.0 == 0.0 => Ok(()),
            _ => Err("expected an even number".to_owned()),
        }));
        let fx = Fixture::new(Proto::new());
        let v = fx.validator(ValidateOptions::default());

        assert!(v.validate(&Value::from(4.0), &even, false).is_ok());
        let err = v.validate(&Value::from(3.0), &even, false).expect_err("odd");
        assert_eq!(
            err.kind(),
            &ValidateErrorKind::Custom("expected an even number".to_owned())
        );
    }
}
