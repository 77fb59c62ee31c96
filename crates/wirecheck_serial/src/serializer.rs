//! Value <-> wire conversion.

use crate::env::{DeserializeEnv, SerializeEnv};
use crate::wire::{Atomic, Encoded, HydrationRecord, Serialized, WireInvocation};
use indexmap::IndexMap;
use std::cell::Cell;
use tracing::debug;
use wirecheck_core::{
    CoreError, CoreResult, Entity, EntityKey, EntityRef, EntitySchema, Invocation, TypeRegistry,
    Value,
};

thread_local! {
    static PASS_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks a top-level pass as running on this thread
///
/// A second top-level pass while one is active would need its own
/// environment, and identities would silently split between the two.
pub(crate) struct PassGuard;

impl PassGuard {
    pub(crate) fn enter(operation: &str) -> CoreResult<Self> {
        if PASS_ACTIVE.with(|active| active.replace(true)) {
            return Err(CoreError::state(format!(
                "{} started inside an active serialization pass",
                operation
            )));
        }
        Ok(Self)
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        PASS_ACTIVE.with(|active| active.set(false));
    }
}

/// Structural serializer bound to a type registry
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    registry: TypeRegistry,
}

impl Serializer {
    /// Create a serializer resolving types through `registry`
    #[must_use]
    pub fn new(registry: TypeRegistry) -> Self {
        Self { registry }
    }

    /// The registry used for type lookups
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Serialize a value in a fresh environment
    ///
    /// # Errors
    ///
    /// Returns a lookup error for unregistered entity types or relations,
    /// a format error for a relation slot holding the wrong shape, and a
    /// state error if called from inside another pass on this thread
    pub fn serialize(&self, value: &Value) -> CoreResult<Encoded> {
        let _pass = PassGuard::enter("serialize")?;
        let mut env = SerializeEnv::new();
        let value = self.serialize_in(value, &mut env)?;
        Ok(Encoded {
            value,
            entities: env.into_records()?,
        })
    }

    /// Serialize a value into an existing environment
    ///
    /// # Errors
    ///
    /// Same as [`Serializer::serialize`], minus the nesting check
    pub fn serialize_in(&self, value: &Value, env: &mut SerializeEnv) -> CoreResult<Serialized> {
        Ok(match value {
            Value::Null => Serialized::Atomic(Atomic::Null),
            Value::Bool(b) => Serialized::Atomic(Atomic::Bool(*b)),
            Value::Int(i) => Serialized::Atomic(Atomic::Int(*i)),
            Value::Float(x) => Serialized::Atomic(Atomic::Float(*x)),
            Value::String(s) => Serialized::Atomic(Atomic::String(s.clone())),
            Value::Symbol(s) => Serialized::Atomic(Atomic::Symbol(s.clone())),
            Value::Range(r) => Serialized::Atomic(Atomic::Range(*r)),
            Value::ObjectId(id) => Serialized::Atomic(Atomic::ObjectId(*id)),
            Value::Class(name) => Serialized::Atomic(Atomic::Class(name.clone())),
            Value::Array(items) => Serialized::Sequence(
                items
                    .iter()
                    .map(|item| self.serialize_in(item, env))
                    .collect::<CoreResult<_>>()?,
            ),
            Value::Map(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    out.insert(key.clone(), self.serialize_in(item, env)?);
                }
                Serialized::Mapping(out)
            }
            Value::Entity(entity) => self.serialize_entity(entity, env)?,
            Value::Deferred(inv) => Serialized::Invocation(Box::new(WireInvocation {
                receiver: self.serialize_in(&inv.receiver, env)?,
                message: inv.message.clone(),
                args: inv
                    .args
                    .iter()
                    .map(|arg| self.serialize_in(arg, env))
                    .collect::<CoreResult<_>>()?,
            })),
        })
    }

    fn serialize_entity(&self, entity: &EntityRef, env: &mut SerializeEnv) -> CoreResult<Serialized> {
        let key = entity.entity_key();
        if !env.reserve(key.clone()) {
            return Ok(Serialized::Entity(key));
        }

        let schema = self.registry.resolve(entity.type_name())?;
        let mut attributes = IndexMap::new();
        for (name, value) in entity.attributes() {
            if schema.is_relation(&name) {
                continue;
            }
            attributes.insert(name, self.serialize_in(&value, env)?);
        }

        let mut relations = IndexMap::new();
        for (name, value) in entity.relations() {
            check_relation(&schema, &name, &value)?;
            relations.insert(name, self.serialize_in(&value, env)?);
        }

        env.fill(HydrationRecord {
            type_name: key.type_name.clone(),
            key: key.key.clone(),
            attributes,
            flags: entity.flags(),
            relations,
        })?;
        Ok(Serialized::Entity(key))
    }

    /// Rebuild a value from its encoded form
    ///
    /// # Errors
    ///
    /// Returns a lookup error for unresolvable type names or entity
    /// references, a format error for malformed records, and a state
    /// error if called from inside another pass on this thread
    pub fn deserialize(&self, encoded: &Encoded) -> CoreResult<Value> {
        let _pass = PassGuard::enter("deserialize")?;
        let mut env = DeserializeEnv::from_records(encoded.entities.iter().cloned())?;
        self.deserialize_in(&encoded.value, &mut env)
    }

    /// Rebuild a value using an existing environment
    ///
    /// # Errors
    ///
    /// Same as [`Serializer::deserialize`], minus the nesting check
    pub fn deserialize_in(&self, data: &Serialized, env: &mut DeserializeEnv) -> CoreResult<Value> {
        Ok(match data {
            Serialized::Atomic(atomic) => self.atomic(atomic)?,
            Serialized::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.deserialize_in(item, env))
                    .collect::<CoreResult<_>>()?,
            ),
            Serialized::Mapping(entries) => {
                let mut out = IndexMap::with_capacity(entries.len());
                for (key, item) in entries {
                    out.insert(key.clone(), self.deserialize_in(item, env)?);
                }
                Value::Map(out)
            }
            Serialized::Entity(key) => Value::Entity(self.hydrate(key, env)?),
            Serialized::Invocation(inv) => {
                let receiver = self.deserialize_in(&inv.receiver, env)?;
                let args = inv
                    .args
                    .iter()
                    .map(|arg| self.deserialize_in(arg, env))
                    .collect::<CoreResult<_>>()?;
                Value::Deferred(Box::new(Invocation::new(receiver, &inv.message).with_args(args)))
            }
        })
    }

    fn atomic(&self, atomic: &Atomic) -> CoreResult<Value> {
        Ok(match atomic {
            Atomic::Null => Value::Null,
            Atomic::Bool(b) => Value::Bool(*b),
            Atomic::Int(i) => Value::Int(*i),
            Atomic::Float(x) => Value::Float(*x),
            Atomic::String(s) => Value::String(s.clone()),
            Atomic::Symbol(s) => Value::Symbol(s.clone()),
            Atomic::Range(r) => Value::Range(*r),
            Atomic::ObjectId(id) => Value::ObjectId(*id),
            Atomic::Class(name) => {
                self.registry.resolve(name)?;
                Value::Class(name.clone())
            }
        })
    }

    fn hydrate(&self, key: &EntityKey, env: &mut DeserializeEnv) -> CoreResult<EntityRef> {
        if let Some(live) = env.live(key) {
            return Ok(live);
        }

        let schema = self.registry.resolve(&key.type_name)?;
        let Some((record, entity)) = env.claim(key, |r| Entity::new(&r.type_name, &r.key))? else {
            return env
                .live(key)
                .ok_or_else(|| CoreError::lookup("Entity", key.to_string()));
        };

        entity.set_flags(record.flags);
        let mut attributes = IndexMap::with_capacity(record.attributes.len());
        for (name, value) in &record.attributes {
            attributes.insert(name.clone(), self.deserialize_in(value, env)?);
        }
        entity.replace_attributes(attributes);

        for (name, value) in &record.relations {
            let value = self.deserialize_in(value, env)?;
            check_relation(&schema, name, &value)?;
            entity.set_relation(name.clone(), value);
        }

        debug!(entity = %key, "hydrated entity");
        Ok(entity)
    }
}

fn check_relation(schema: &EntitySchema, name: &str, value: &Value) -> CoreResult<()> {
    let def = schema
        .relation(name)
        .ok_or_else(|| CoreError::lookup("Relation", format!("{}.{}", schema.name, name)))?;
    let is_target = |v: &Value| matches!(v, Value::Entity(e) if e.type_name() == def.target);

    let fits = match value {
        Value::Null | Value::Deferred(_) => true,
        Value::Entity(_) => !def.kind.is_collection() && is_target(value),
        Value::Array(items) => def.kind.is_collection() && items.iter().all(is_target),
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(CoreError::format(format!(
            "relation {}.{} ({:?} of {}) cannot hold {}",
            schema.name,
            name,
            def.kind,
            def.target,
            value.describe()
        )))
    }
}
