//! Deterministic, backward-compatible encode-id assignment.
//!
//! Field and member names never travel on the wire; small stable integers
//! do. Ids are assigned once, at proto generation time, and a previously
//! generated proto can be supplied as a compatibility baseline so that
//! unchanged keys keep their ids and new keys can never collide with
//! retained ones.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::schema::{Proto, Schema};

/// A key with its assigned wire id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeId {
    pub key: String,
    pub id: u32,
}

impl EncodeId {
    pub fn new(key: impl Into<String>, id: u32) -> EncodeId {
        EncodeId {
            key: key.into(),
            id,
        }
    }
}

/// Result of one id-assignment pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAssignment {
    /// One entry per input key, in input order.
    pub ids: Vec<EncodeId>,
    /// The key set fits a smaller wire class (≤32 or ≤4096 keys) but id
    /// churn pushed the highest id past the class boundary: a fresh
    /// (non-compatible) regeneration would shrink encoded output.
    pub upgrade_hint: bool,
}

/// Assigns wire ids to `keys`, preserving input order.
///
/// With a `compatible` baseline, keys present in the baseline keep their
/// ids and new keys start above the highest baseline id. Even ids of
/// since-removed keys are never reused, which is what keeps old and new
/// binaries interoperable.
pub fn gen_encode_ids(keys: &[String], compatible: Option<&[EncodeId]>) -> IdAssignment {
    let mut next_id = compatible
        .iter()
        .flat_map(|ids| ids.iter())
        .map(|e| e.id + 1)
        .max()
        .unwrap_or(0);

    let mut ids = Vec::with_capacity(keys.len());
    for key in keys {
        let retained = compatible
            .iter()
            .flat_map(|ids| ids.iter())
            .find(|e| &e.key == key);
        let id = match retained {
            Some(e) => e.id,
            None => {
                let id = next_id;
                next_id += 1;
                id
            }
        };
        ids.push(EncodeId::new(key.clone(), id));
    }

    let max_id = ids.iter().map(|e| e.id).max().unwrap_or(0);
    let upgrade_hint = (keys.len() <= 32 && max_id > 32) || (keys.len() <= 4096 && max_id > 4096);

    IdAssignment { ids, upgrade_hint }
}

/// Content-addressed key of a schema: SHA-256 hex of its canonical JSON
/// with all `id` fields zeroed, so the key is stable across regenerations
/// that only renumber.
pub fn schema_key(schema: &Schema) -> String {
    match serde_json::to_value(schema) {
        Ok(mut json) => {
            strip_ids(&mut json);
            let canonical = json.to_string();
            let digest = Sha256::digest(canonical.as_bytes());
            hex(&digest)
        }
        // `Custom` schemas have no canonical JSON; key by kind.
        Err(_) => format!("!{}", schema.kind()),
    }
}

/// Key of an enum member value: its canonical JSON text.
pub fn literal_key(value: &serde_json::Value) -> String {
    value.to_string()
}

fn strip_ids(json: &mut serde_json::Value) {
    match json {
        serde_json::Value::Object(map) => {
            if let Some(id) = map.get_mut("id") {
                if id.is_number() {
                    *id = serde_json::Value::from(0);
                }
            }
            for v in map.values_mut() {
                strip_ids(v);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                strip_ids(v);
            }
        }
        _ => {}
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Stamps stable wire ids across a whole proto.
///
/// With a `compatible` baseline proto, every list (interface extends,
/// interface properties, enum members, union/intersection members) is
/// matched against its same-id counterpart and keys present in both keep
/// their ids. Returns the paths of lists whose id churn warrants a fresh
/// regeneration (see [`IdAssignment::upgrade_hint`]).
pub fn assign_proto_ids(proto: &mut Proto, compatible: Option<&Proto>) -> Vec<String> {
    let mut hints = Vec::new();
    for (id, schema) in proto.iter_mut() {
        let baseline = compatible.and_then(|c| c.get(id));
        assign_schema(schema, baseline, id, &mut hints);
    }
    if !hints.is_empty() {
        debug!(lists = hints.len(), "id churn crossed a wire-size boundary");
    }
    hints
}

fn assign_schema(
    schema: &mut Schema,
    compatible: Option<&Schema>,
    path: &str,
    hints: &mut Vec<String>,
) {
    match schema {
        Schema::Interface {
            extends,
            properties,
            index_signature,
        } => {
            if let Some(extends) = extends {
                let keys: Vec<String> = extends.iter().map(|e| extend_key(&e.ty)).collect();
                let baseline = match compatible {
                    Some(Schema::Interface {
                        extends: Some(prev),
                        ..
                    }) => Some(
                        prev.iter()
                            .map(|e| EncodeId::new(extend_key(&e.ty), e.id))
                            .collect::<Vec<_>>(),
                    ),
                    _ => None,
                };
                let assignment = gen_encode_ids(&keys, baseline.as_deref());
                if assignment.upgrade_hint {
                    hints.push(format!("{path}/extends"));
                }
                for (ext, assigned) in extends.iter_mut().zip(&assignment.ids) {
                    ext.id = assigned.id;
                }
            }

            if let Some(properties) = properties {
                let keys: Vec<String> = properties.iter().map(|p| p.name.clone()).collect();
                let baseline = match compatible {
                    Some(Schema::Interface {
                        properties: Some(prev),
                        ..
                    }) => Some(
                        prev.iter()
                            .map(|p| EncodeId::new(p.name.clone(), p.id))
                            .collect::<Vec<_>>(),
                    ),
                    _ => None,
                };
                let assignment = gen_encode_ids(&keys, baseline.as_deref());
                if assignment.upgrade_hint {
                    hints.push(format!("{path}/properties"));
                }
                for (prop, assigned) in properties.iter_mut().zip(&assignment.ids) {
                    prop.id = assigned.id;
                    let counterpart = match compatible {
                        Some(Schema::Interface {
                            properties: Some(prev),
                            ..
                        }) => prev.iter().find(|p| p.name == prop.name).map(|p| &p.ty),
                        _ => None,
                    };
                    assign_schema(
                        &mut prop.ty,
                        counterpart,
                        &format!("{path}/{}", prop.name),
                        hints,
                    );
                }
            }

            if let Some(sig) = index_signature {
                let counterpart = match compatible {
                    Some(Schema::Interface {
                        index_signature: Some(prev),
                        ..
                    }) => Some(&*prev.ty),
                    _ => None,
                };
                assign_schema(
                    &mut sig.ty,
                    counterpart,
                    &format!("{path}/[index]"),
                    hints,
                );
            }
        }
        Schema::Enum { members } => {
            let keys: Vec<String> = members.iter().map(|m| literal_key(&m.value)).collect();
            let baseline = match compatible {
                Some(Schema::Enum { members: prev }) => Some(
                    prev.iter()
                        .map(|m| EncodeId::new(literal_key(&m.value), m.id))
                        .collect::<Vec<_>>(),
                ),
                _ => None,
            };
            let assignment = gen_encode_ids(&keys, baseline.as_deref());
            if assignment.upgrade_hint {
                hints.push(format!("{path}/members"));
            }
            for (member, assigned) in members.iter_mut().zip(&assignment.ids) {
                member.id = assigned.id;
            }
        }
        Schema::Union { members } | Schema::Intersection { members } => {
            let keys: Vec<String> = members.iter().map(|m| schema_key(&m.ty)).collect();
            let baseline_members = match compatible {
                Some(Schema::Union { members: prev })
                | Some(Schema::Intersection { members: prev }) => Some(prev),
                _ => None,
            };
            let baseline = baseline_members.map(|prev| {
                prev.iter()
                    .map(|m| EncodeId::new(schema_key(&m.ty), m.id))
                    .collect::<Vec<_>>()
            });
            let assignment = gen_encode_ids(&keys, baseline.as_deref());
            if assignment.upgrade_hint {
                hints.push(format!("{path}/members"));
            }
            for ((member, assigned), key) in members.iter_mut().zip(&assignment.ids).zip(&keys) {
                member.id = assigned.id;
                let counterpart = baseline_members
                    .and_then(|prev| prev.iter().find(|m| &schema_key(&m.ty) == key))
                    .map(|m| &m.ty);
                assign_schema(
                    &mut member.ty,
                    counterpart,
                    &format!("{path}/{}", assigned.id),
                    hints,
                );
            }
        }
        Schema::Array { element_type } => {
            let counterpart = match compatible {
                Some(Schema::Array { element_type: prev }) => Some(&**prev),
                _ => None,
            };
            assign_schema(element_type, counterpart, path, hints);
        }
        Schema::Tuple { element_types, .. } => {
            let baseline = match compatible {
                Some(Schema::Tuple {
                    element_types: prev,
                    ..
                }) => Some(prev),
                _ => None,
            };
            for (i, ty) in element_types.iter_mut().enumerate() {
                let counterpart = baseline.and_then(|prev| prev.get(i));
                assign_schema(ty, counterpart, &format!("{path}/{i}"), hints);
            }
        }
        Schema::Pick { target, .. }
        | Schema::Omit { target, .. }
        | Schema::Partial { target }
        | Schema::Keyof { target }
        | Schema::NonNullable { target } => {
            let counterpart = compatible.and_then(mapped_target);
            assign_schema(target, counterpart, path, hints);
        }
        Schema::Overwrite { target, overwrite } => {
            let (prev_target, prev_overwrite) = match compatible {
                Some(Schema::Overwrite {
                    target: pt,
                    overwrite: po,
                }) => (Some(&**pt), Some(&**po)),
                _ => (None, None),
            };
            assign_schema(target, prev_target, path, hints);
            assign_schema(overwrite, prev_overwrite, path, hints);
        }
        Schema::IndexedAccess { object_type, .. } => {
            let counterpart = match compatible {
                Some(Schema::IndexedAccess {
                    object_type: prev, ..
                }) => Some(&**prev),
                _ => None,
            };
            assign_schema(object_type, counterpart, path, hints);
        }
        _ => {}
    }
}

fn extend_key(ty: &Schema) -> String {
    match ty {
        Schema::Reference { target } => target.clone(),
        other => schema_key(other),
    }
}

fn mapped_target(schema: &Schema) -> Option<&Schema> {
    match schema {
        Schema::Pick { target, .. }
        | Schema::Omit { target, .. }
        | Schema::Partial { target }
        | Schema::Keyof { target }
        | Schema::NonNullable { target } => Some(target),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Property;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn fresh_assignment_counts_from_zero() {
        let assignment = gen_encode_ids(&keys(&["a", "b", "c"]), None);
        assert_eq!(
            assignment.ids,
            vec![
                EncodeId::new("a", 0),
                EncodeId::new("b", 1),
                EncodeId::new("c", 2),
            ]
        );
        assert!(!assignment.upgrade_hint);
    }

    #[test]
    fn compatible_assignment_retains_and_extends() {
        let baseline = [EncodeId::new("d", 1), EncodeId::new("a", 4)];
        let assignment = gen_encode_ids(&keys(&["d", "e", "f"]), Some(&baseline));
        assert_eq!(
            assignment.ids,
            vec![
                EncodeId::new("d", 1),
                EncodeId::new("e", 5),
                EncodeId::new("f", 6),
            ]
        );
    }

    #[test]
    fn new_keys_never_collide_with_removed_ones() {
        let baseline = [EncodeId::new("gone", 7)];
        let assignment = gen_encode_ids(&keys(&["fresh"]), Some(&baseline));
        assert_eq!(assignment.ids, vec![EncodeId::new("fresh", 8)]);
    }

    #[test]
    fn upgrade_hint_fires_when_churn_crosses_a_boundary() {
        let baseline = [EncodeId::new("old", 40)];
        let assignment = gen_encode_ids(&keys(&["old", "a"]), Some(&baseline));
        assert!(assignment.upgrade_hint);

        let quiet = gen_encode_ids(&keys(&["a", "b"]), None);
        assert!(!quiet.upgrade_hint);
    }

    #[test]
    fn schema_key_ignores_id_churn() {
        let a = Schema::Interface {
            extends: None,
            properties: Some(vec![Property {
                id: 0,
                name: "x".to_owned(),
                optional: false,
                ty: Schema::String,
                comment: None,
            }]),
            index_signature: None,
        };
        let mut b = a.clone();
        if let Schema::Interface {
            properties: Some(props),
            ..
        } = &mut b
        {
            props[0].id = 17;
        }
        assert_eq!(schema_key(&a), schema_key(&b));
    }

    #[test]
    fn proto_stamping_preserves_ids_across_regeneration() {
        let make = |names: &[&str]| -> Proto {
            let mut proto = Proto::new();
            proto.insert(
                "a/T",
                Schema::Interface {
                    extends: None,
                    properties: Some(
                        names
                            .iter()
                            .map(|n| Property {
                                id: 0,
                                name: (*n).to_owned(),
                                optional: false,
                                ty: Schema::String,
                                comment: None,
                            })
                            .collect(),
                    ),
                    index_signature: None,
                },
            );
            proto
        };

        let mut v1 = make(&["a", "b", "c"]);
        assign_proto_ids(&mut v1, None);

        // `b` removed, `d` added.
        let mut v2 = make(&["a", "c", "d"]);
        assign_proto_ids(&mut v2, Some(&v1));

        let prop_ids = |proto: &Proto| -> Vec<(String, u32)> {
            match proto.get("a/T") {
                Some(Schema::Interface {
                    properties: Some(props),
                    ..
                }) => props.iter().map(|p| (p.name.clone(), p.id)).collect(),
                _ => panic!("missing interface"),
            }
        };

        assert_eq!(
            prop_ids(&v1),
            vec![
                ("a".to_owned(), 0),
                ("b".to_owned(), 1),
                ("c".to_owned(), 2)
            ]
        );
        assert_eq!(
            prop_ids(&v2),
            vec![
                ("a".to_owned(), 0),
                ("c".to_owned(), 2),
                ("d".to_owned(), 3)
            ]
        );
    }
}
