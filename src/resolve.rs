//! Reference resolution and interface flattening.
//!
//! The resolver turns the declarative schema graph into shapes the
//! validator and wire codec can consume directly: it follows references,
//! computes derived types (`keyof`, indexed access, `NonNullable`) and
//! flattens interface inheritance and mapped-type constructors into one
//! concrete property list.
//!
//! Flattening is memoized per engine in caches keyed by schema object
//! identity. Only schemas owned by the proto are cached; synthesized
//! intermediate schemas are flattened on the fly. Cache population is
//! compute-then-overwrite: racing computations produce identical results,
//! so the last write winning is harmless.

use std::{borrow::Cow, collections::BTreeSet, sync::Arc};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::schema::{IndexKeyType, IndexSignature, Proto, Schema, UnionMember};

/// Largest allowed `extends` entry id. Extends entries occupy wire ids
/// `1..=9` of an interface id block.
pub(crate) const MAX_EXTEND_ID: u32 = 8;

/// Bound on one resolve/flatten cascade. Reference cycles and extends
/// cycles are caught by visited sets; this bounds the remaining
/// degenerate shapes (a derived type deriving from itself through
/// another constructor).
const MAX_RESOLVE_DEPTH: usize = 128;

/// Union-property sentinel admitting any string key (an interface in the
/// union carries a string index signature).
pub(crate) const ANY_STRING_KEY: &str = "[[String]]";
/// Union-property sentinel admitting any numeric key.
pub(crate) const ANY_NUMBER_KEY: &str = "[[Number]]";

/// Malformed or unresolvable schema. These are generator errors: they are
/// raised immediately and never recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("proto has no schema `{0}`")]
    MissingSchema(String),

    #[error("reference target `{0}` cannot be resolved")]
    UnresolvedReference(String),

    #[error("`{index}` is neither a property nor covered by an index signature")]
    InvalidIndex { index: String },

    #[error("interface extends a non-interface schema (`{0}`)")]
    ExtendsNonInterface(&'static str),

    #[error("extends id {0} is out of wire range (at most 9 direct extends)")]
    ExtendsIdOutOfRange(u32),

    #[error("`{0}` schema cannot be flattened into an interface")]
    InvalidMappedTarget(&'static str),

    #[error("schema graph forms a cycle")]
    CyclicSchema,
}

/// Where a flattened property was declared. Drives wire routing: own
/// properties encode in the interface's own id block, inherited ones in
/// the nested block of the supplying extends entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Own,
    /// Supplied by the direct extends entry with this id.
    Extend(u32),
}

/// One property of a flattened interface.
#[derive(Debug, Clone)]
pub struct FlatProperty {
    pub id: u32,
    pub name: String,
    pub optional: bool,
    pub origin: Origin,
    pub ty: Schema,
}

/// Canonical flat shape of an interface-like schema: at most one property
/// per name, own declarations winning over inherited ones.
#[derive(Debug, Clone, Default)]
pub struct FlatInterface {
    pub properties: Vec<FlatProperty>,
    pub index_signature: Option<IndexSignature>,
}

impl FlatInterface {
    pub fn property(&self, name: &str) -> Option<&FlatProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    fn property_mut(&mut self, name: &str) -> Option<&mut FlatProperty> {
        self.properties.iter_mut().find(|p| p.name == name)
    }
}

/// Memoized flatten / union-property results, keyed by schema identity.
/// Shared state is race-tolerant: see the module docs.
#[derive(Default)]
pub(crate) struct ResolveCaches {
    flat: RwLock<HashMap<usize, Arc<FlatInterface>, RandomState>>,
    union_props: RwLock<HashMap<usize, Arc<BTreeSet<String>>, RandomState>>,
}

/// Outcome of [`Resolver::resolve`]: the concrete schema plus whether it
/// is owned by the proto (and therefore safe to memoize by identity).
#[derive(Debug)]
pub(crate) struct Resolved<'s> {
    pub schema: Cow<'s, Schema>,
    pub in_proto: bool,
}

impl<'s> Resolved<'s> {
    /// Borrowed view plus cacheability of that view.
    pub(crate) fn parts(&self) -> (&Schema, bool) {
        match &self.schema {
            Cow::Borrowed(s) => (s, self.in_proto),
            Cow::Owned(s) => (s, false),
        }
    }
}

/// Read-only view over a proto plus its caches.
#[derive(Clone, Copy)]
pub(crate) struct Resolver<'p> {
    proto: &'p Proto,
    caches: &'p ResolveCaches,
}

impl<'p> Resolver<'p> {
    pub fn new(proto: &'p Proto, caches: &'p ResolveCaches) -> Resolver<'p> {
        Resolver { proto, caches }
    }

    /// Looks a schema up by id.
    pub fn schema(&self, id: &str) -> Result<&'p Schema, SchemaError> {
        self.proto
            .get(id)
            .ok_or_else(|| SchemaError::MissingSchema(id.to_owned()))
    }

    /// Follows references and derived-type constructors until a concrete
    /// schema remains. `in_proto` states whether `schema` is owned by the
    /// proto; the result records the same for itself.
    ///
    /// Opaque (`?`-prefixed) reference targets are not followed and
    /// resolve to `Any`.
    pub fn resolve<'s>(
        &self,
        schema: &'s Schema,
        in_proto: bool,
    ) -> Result<Resolved<'s>, SchemaError>
    where
        'p: 's,
    {
        self.resolve_impl(schema, in_proto, 0)
    }

    fn resolve_impl<'s>(
        &self,
        schema: &'s Schema,
        in_proto: bool,
        depth: usize,
    ) -> Result<Resolved<'s>, SchemaError>
    where
        'p: 's,
    {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(SchemaError::CyclicSchema);
        }
        let mut current = Resolved {
            schema: Cow::Borrowed(schema),
            in_proto,
        };
        let mut followed: Vec<String> = Vec::new();

        loop {
            let next = match current.schema.as_ref() {
                Schema::Reference { target } => {
                    if target.starts_with('?') {
                        Resolved {
                            schema: Cow::Owned(Schema::Any),
                            in_proto: false,
                        }
                    } else {
                        if followed.iter().any(|t| t == target) {
                            return Err(SchemaError::CyclicSchema);
                        }
                        followed.push(target.clone());
                        let resolved = self
                            .proto
                            .get(target)
                            .ok_or_else(|| SchemaError::UnresolvedReference(target.clone()))?;
                        Resolved {
                            schema: Cow::Borrowed(resolved),
                            in_proto: true,
                        }
                    }
                }
                Schema::IndexedAccess { object_type, index } => {
                    let flat =
                        self.flatten_impl(object_type, current.in_proto, &mut Vec::new(), depth + 1)?;
                    let ty = match flat.property(index) {
                        Some(p) => {
                            let ty = p.ty.clone();
                            if p.optional && !self.can_be_undefined(&ty)? {
                                // Optional property access composes with
                                // derived types as `T | undefined`.
                                Schema::Union {
                                    members: vec![
                                        UnionMember { id: 0, ty },
                                        UnionMember {
                                            id: 1,
                                            ty: Schema::literal_undefined(),
                                        },
                                    ],
                                }
                            } else {
                                ty
                            }
                        }
                        None => match &flat.index_signature {
                            Some(sig) => (*sig.ty).clone(),
                            None => {
                                return Err(SchemaError::InvalidIndex {
                                    index: index.clone(),
                                })
                            }
                        },
                    };
                    Resolved {
                        schema: Cow::Owned(ty),
                        in_proto: false,
                    }
                }
                Schema::Keyof { target } => {
                    let flat =
                        self.flatten_impl(target, current.in_proto, &mut Vec::new(), depth + 1)?;
                    let members = flat
                        .properties
                        .iter()
                        .enumerate()
                        .map(|(i, p)| UnionMember {
                            id: i as u32,
                            ty: Schema::literal(serde_json::Value::String(p.name.clone())),
                        })
                        .collect();
                    Resolved {
                        schema: Cow::Owned(Schema::Union { members }),
                        in_proto: false,
                    }
                }
                Schema::NonNullable { target } => {
                    let inner = self.resolve_impl(target, current.in_proto, depth + 1)?;
                    let stripped = self.strip_nullable(inner.schema.as_ref(), depth + 1)?;
                    let in_proto = stripped.is_none() && inner.in_proto;
                    Resolved {
                        schema: Cow::Owned(
                            stripped.unwrap_or_else(|| inner.schema.into_owned()),
                        ),
                        in_proto,
                    }
                }
                _ => return Ok(current),
            };
            current = next;
        }
    }

    /// Removes `null`/`undefined` branches from a resolved schema.
    /// `None` when nothing had to change.
    fn strip_nullable(
        &self,
        schema: &Schema,
        depth: usize,
    ) -> Result<Option<Schema>, SchemaError> {
        let Schema::Union { members } = schema else {
            return Ok(None);
        };
        let mut kept = Vec::with_capacity(members.len());
        for m in members {
            let resolved = self.resolve_impl(&m.ty, false, depth)?;
            let nullish = matches!(
                resolved.schema.as_ref(),
                Schema::Literal { literal: None }
                    | Schema::Literal {
                        literal: Some(serde_json::Value::Null)
                    }
            );
            if !nullish {
                kept.push(m.clone());
            }
        }
        if kept.len() == members.len() {
            return Ok(None);
        }
        Ok(Some(Schema::Union { members: kept }))
    }

    /// Flattens an interface-like schema into its canonical shape,
    /// memoizing proto-owned inputs.
    pub fn flatten(&self, schema: &Schema, in_proto: bool) -> Result<Arc<FlatInterface>, SchemaError> {
        self.flatten_impl(schema, in_proto, &mut Vec::new(), 0)
    }

    fn flatten_impl(
        &self,
        schema: &Schema,
        in_proto: bool,
        visiting: &mut Vec<usize>,
        depth: usize,
    ) -> Result<Arc<FlatInterface>, SchemaError> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(SchemaError::CyclicSchema);
        }
        let resolved = self.resolve_impl(schema, in_proto, depth)?;
        let (target, cacheable) = resolved.parts();

        let key = target as *const Schema as usize;
        if cacheable {
            if let Some(flat) = self.caches.flat.read().get(&key) {
                return Ok(flat.clone());
            }
        }

        if visiting.contains(&key) {
            return Err(SchemaError::CyclicSchema);
        }
        visiting.push(key);
        let result = self.flatten_resolved(target, cacheable, visiting, depth);
        visiting.pop();

        let flat = Arc::new(result?);
        if cacheable {
            self.caches.flat.write().insert(key, flat.clone());
        }
        Ok(flat)
    }

    fn flatten_resolved(
        &self,
        schema: &Schema,
        in_proto: bool,
        visiting: &mut Vec<usize>,
        depth: usize,
    ) -> Result<FlatInterface, SchemaError> {
        match schema {
            Schema::Interface {
                extends,
                properties,
                index_signature,
            } => {
                let mut flat = FlatInterface {
                    properties: Vec::new(),
                    index_signature: index_signature.as_deref().cloned(),
                };
                if let Some(props) = properties {
                    for p in props {
                        flat.properties.push(FlatProperty {
                            id: p.id,
                            name: p.name.clone(),
                            optional: p.optional,
                            origin: Origin::Own,
                            ty: p.ty.clone(),
                        });
                    }
                }
                for ext in extends.iter().flatten() {
                    if ext.id > MAX_EXTEND_ID {
                        return Err(SchemaError::ExtendsIdOutOfRange(ext.id));
                    }
                    let parent =
                        self.flatten_impl(&ext.ty, in_proto, visiting, depth + 1)
                            .map_err(|err| match err {
                                SchemaError::InvalidMappedTarget(kind) => {
                                    SchemaError::ExtendsNonInterface(kind)
                                }
                                other => other,
                            })?;
                    for p in &parent.properties {
                        if flat.property(&p.name).is_none() {
                            flat.properties.push(FlatProperty {
                                origin: Origin::Extend(ext.id),
                                ..p.clone()
                            });
                        }
                    }
                    if flat.index_signature.is_none() {
                        flat.index_signature = parent.index_signature.clone();
                    }
                }
                Ok(flat)
            }
            Schema::Intersection { members } => {
                let mut flat = FlatInterface::default();
                for m in members {
                    let part = self.flatten_impl(&m.ty, in_proto, visiting, depth + 1)?;
                    for p in &part.properties {
                        match flat.property_mut(&p.name) {
                            Some(existing) => *existing = p.clone(),
                            None => flat.properties.push(p.clone()),
                        }
                    }
                    if part.index_signature.is_some() {
                        flat.index_signature = part.index_signature.clone();
                    }
                }
                Ok(flat)
            }
            Schema::Pick { target, keys } => {
                let base = self.flatten_impl(target, in_proto, visiting, depth + 1)?;
                let mut flat = FlatInterface::default();
                let mut next_id = base.properties.iter().map(|p| p.id + 1).max().unwrap_or(0);
                for key in keys {
                    if flat.property(key).is_some() {
                        continue;
                    }
                    if let Some(p) = base.property(key) {
                        flat.properties.push(p.clone());
                    } else if let Some(sig) = &base.index_signature {
                        flat.properties.push(FlatProperty {
                            id: next_id,
                            name: key.clone(),
                            optional: false,
                            origin: Origin::Own,
                            ty: (*sig.ty).clone(),
                        });
                        next_id += 1;
                    } else {
                        return Err(SchemaError::InvalidIndex { index: key.clone() });
                    }
                }
                Ok(flat)
            }
            Schema::Omit { target, keys } => {
                let base = self.flatten_impl(target, in_proto, visiting, depth + 1)?;
                let mut flat = base.as_ref().clone();
                flat.properties.retain(|p| !keys.contains(&p.name));
                Ok(flat)
            }
            Schema::Partial { target } => {
                let base = self.flatten_impl(target, in_proto, visiting, depth + 1)?;
                let mut flat = base.as_ref().clone();
                for p in &mut flat.properties {
                    p.optional = true;
                }
                Ok(flat)
            }
            Schema::Overwrite { target, overwrite } => {
                let base = self.flatten_impl(target, in_proto, visiting, depth + 1)?;
                let over = self.flatten_impl(overwrite, in_proto, visiting, depth + 1)?;
                let mut flat = base.as_ref().clone();
                for p in &over.properties {
                    match flat.property_mut(&p.name) {
                        Some(existing) => *existing = p.clone(),
                        None => flat.properties.push(p.clone()),
                    }
                }
                if over.index_signature.is_some() {
                    flat.index_signature = over.index_signature.clone();
                }
                Ok(flat)
            }
            other => Err(SchemaError::InvalidMappedTarget(other.kind())),
        }
    }

    /// Distributes a mapped-type constructor over a union target:
    /// `Pick<A|B, K>` becomes `Pick<A,K> | Pick<B,K>` with member ids
    /// preserved. `None` when the schema is not a mapped type or its
    /// target is not a union.
    pub fn distribute(&self, schema: &Schema, in_proto: bool) -> Result<Option<Schema>, SchemaError> {
        let target = match schema {
            Schema::Pick { target, .. }
            | Schema::Omit { target, .. }
            | Schema::Partial { target }
            | Schema::Overwrite { target, .. } => target,
            _ => return Ok(None),
        };
        let resolved = self.resolve(target, in_proto)?;
        let Schema::Union { members } = resolved.schema.as_ref() else {
            return Ok(None);
        };
        let members = members
            .iter()
            .map(|m| UnionMember {
                id: m.id,
                ty: rewrap(schema, m.ty.clone()),
            })
            .collect();
        Ok(Some(Schema::Union { members }))
    }

    /// Every property name appearing in any member of a union or
    /// intersection, plus index-signature sentinels. Memoized for
    /// proto-owned schemas.
    pub fn union_properties(
        &self,
        schema: &Schema,
        in_proto: bool,
    ) -> Result<Arc<BTreeSet<String>>, SchemaError> {
        let resolved = self.resolve(schema, in_proto)?;
        let (target, cacheable) = resolved.parts();

        let key = target as *const Schema as usize;
        if cacheable {
            if let Some(names) = self.caches.union_props.read().get(&key) {
                return Ok(names.clone());
            }
        }

        let mut names = BTreeSet::new();
        self.collect_union_properties(target, cacheable, &mut names, &mut Vec::new())?;
        let names = Arc::new(names);
        if cacheable {
            self.caches
                .union_props
                .write()
                .insert(key, names.clone());
        }
        Ok(names)
    }

    fn collect_union_properties(
        &self,
        schema: &Schema,
        in_proto: bool,
        out: &mut BTreeSet<String>,
        visiting: &mut Vec<usize>,
    ) -> Result<(), SchemaError> {
        let resolved = self.resolve(schema, in_proto)?;
        let (target, child_in_proto) = resolved.parts();

        let key = target as *const Schema as usize;
        if visiting.contains(&key) {
            return Ok(());
        }
        visiting.push(key);

        let result = (|| match target {
            Schema::Union { members } | Schema::Intersection { members } => {
                for m in members {
                    self.collect_union_properties(&m.ty, child_in_proto, out, visiting)?;
                }
                Ok(())
            }
            Schema::Interface { .. }
            | Schema::Pick { .. }
            | Schema::Omit { .. }
            | Schema::Partial { .. }
            | Schema::Overwrite { .. } => {
                let flat = self.flatten(target, child_in_proto)?;
                for p in &flat.properties {
                    out.insert(p.name.clone());
                }
                if let Some(sig) = &flat.index_signature {
                    out.insert(
                        match sig.key_type {
                            IndexKeyType::String => ANY_STRING_KEY,
                            IndexKeyType::Number => ANY_NUMBER_KEY,
                        }
                        .to_owned(),
                    );
                }
                Ok(())
            }
            _ => Ok(()),
        })();

        visiting.pop();
        result
    }

    /// Whether the schema admits `undefined`.
    pub fn can_be_undefined(&self, schema: &Schema) -> Result<bool, SchemaError> {
        self.can_be_nullish(schema, false, &mut Vec::new())
    }

    /// Whether the schema admits `null`.
    pub fn can_be_null(&self, schema: &Schema) -> Result<bool, SchemaError> {
        self.can_be_nullish(schema, true, &mut Vec::new())
    }

    fn can_be_nullish(
        &self,
        schema: &Schema,
        null: bool,
        visiting: &mut Vec<usize>,
    ) -> Result<bool, SchemaError> {
        let resolved = self.resolve(schema, false)?;
        let target = resolved.schema.as_ref();

        let key = target as *const Schema as usize;
        if visiting.contains(&key) {
            return Ok(false);
        }
        visiting.push(key);

        let admits = match target {
            Schema::Any => Ok(true),
            Schema::Literal { literal: None } => Ok(!null),
            Schema::Literal { literal: Some(v) } => Ok(null && v.is_null()),
            Schema::Union { members } => {
                let mut any = false;
                for m in members {
                    if self.can_be_nullish(&m.ty, null, visiting)? {
                        any = true;
                        break;
                    }
                }
                Ok(any)
            }
            Schema::Intersection { members } => {
                let mut all = true;
                for m in members {
                    if !self.can_be_nullish(&m.ty, null, visiting)? {
                        all = false;
                        break;
                    }
                }
                Ok(all)
            }
            _ => Ok(false),
        };

        visiting.pop();
        admits
    }
}

fn rewrap(ctor: &Schema, target: Schema) -> Schema {
    let target = Box::new(target);
    match ctor {
        Schema::Pick { keys, .. } => Schema::Pick {
            target,
            keys: keys.clone(),
        },
        Schema::Omit { keys, .. } => Schema::Omit {
            target,
            keys: keys.clone(),
        },
        Schema::Partial { .. } => Schema::Partial { target },
        Schema::Overwrite { overwrite, .. } => Schema::Overwrite {
            target,
            overwrite: overwrite.clone(),
        },
        // `distribute` only hands mapped types to this function.
        _ => Schema::Partial { target },
    }
}
