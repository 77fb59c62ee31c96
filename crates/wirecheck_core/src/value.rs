//! Live value model for receivers, arguments, and results of watched calls.
//!
//! Entities are shared handles: two references to the same document are the
//! same `Arc`, and relation slots may point back at their owner. Equality on
//! entities is by identity key, never by walking the graph.

use crate::error::{CoreError, CoreResult};
use crate::id::ObjectId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared handle to a live entity
pub type EntityRef = Arc<Entity>;

/// Identity of an entity: its domain type plus its key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Registered domain type name
    pub type_name: String,
    /// Identity key within that type
    pub key: String,
}

impl EntityKey {
    /// Create a new entity key
    pub fn new(type_name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.type_name, self.key)
    }
}

/// Lifecycle flags carried alongside an entity's attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFlags {
    /// Not yet persisted
    #[serde(default)]
    pub new_record: bool,
    /// Removed from the store
    #[serde(default)]
    pub destroyed: bool,
}

#[derive(Default)]
struct EntityState {
    attributes: IndexMap<String, Value>,
    flags: EntityFlags,
    relations: IndexMap<String, Value>,
}

/// A live domain object
pub struct Entity {
    type_name: String,
    key: String,
    state: RwLock<EntityState>,
}

impl Entity {
    /// Create an empty entity with the given identity
    pub fn new(type_name: impl Into<String>, key: impl Into<String>) -> EntityRef {
        Arc::new(Self {
            type_name: type_name.into(),
            key: key.into(),
            state: RwLock::new(EntityState::default()),
        })
    }

    /// Create an entity keyed by a document id, with `_id` set
    pub fn with_id(type_name: impl Into<String>, id: ObjectId) -> EntityRef {
        let entity = Self::new(type_name, id.to_hex());
        entity.set_attribute("_id", Value::ObjectId(id));
        entity
    }

    /// Domain type name
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Identity key within the type
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Full identity
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(&self.type_name, &self.key)
    }

    /// Document id, when the `_id` attribute holds one
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        match self.attribute("_id") {
            Some(Value::ObjectId(id)) => Some(id),
            _ => None,
        }
    }

    /// Snapshot of all attributes
    #[must_use]
    pub fn attributes(&self) -> IndexMap<String, Value> {
        self.read(|s| s.attributes.clone())
    }

    /// A single attribute
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.read(|s| s.attributes.get(name).cloned())
    }

    /// Set a single attribute
    pub fn set_attribute(&self, name: impl Into<String>, value: Value) {
        self.write(|s| {
            s.attributes.insert(name.into(), value);
        });
    }

    /// Replace all attributes
    pub fn replace_attributes(&self, attributes: IndexMap<String, Value>) {
        self.write(|s| s.attributes = attributes);
    }

    /// Current flags
    #[must_use]
    pub fn flags(&self) -> EntityFlags {
        self.read(|s| s.flags)
    }

    /// Replace flags
    pub fn set_flags(&self, flags: EntityFlags) {
        self.write(|s| s.flags = flags);
    }

    /// Snapshot of all loaded relation slots
    #[must_use]
    pub fn relations(&self) -> IndexMap<String, Value> {
        self.read(|s| s.relations.clone())
    }

    /// A single relation slot
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<Value> {
        self.read(|s| s.relations.get(name).cloned())
    }

    /// Fill a relation slot
    pub fn set_relation(&self, name: impl Into<String>, value: Value) {
        self.write(|s| {
            s.relations.insert(name.into(), value);
        });
    }

    /// Drop every relation slot, breaking reference cycles
    pub fn clear_relations(&self) {
        drop(self.take_relations());
    }

    fn take_relations(&self) -> IndexMap<String, Value> {
        self.write(|s| std::mem::take(&mut s.relations))
    }

    fn read<T>(&self, f: impl FnOnce(&EntityState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<T>(&self, f: impl FnOnce(&mut EntityState) -> T) -> T {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

// Relations may form cycles, so Debug never descends into them.
impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("type_name", &self.type_name)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeValue {
    /// Lower bound (inclusive)
    pub start: i64,
    /// Upper bound
    pub end: i64,
    /// Whether `end` is excluded
    #[serde(default)]
    pub exclusive: bool,
}

/// A method call that has not happened yet
///
/// Queries and unloaded relation collections are values of this kind: they
/// can only be reconstructed by calling `message` on `receiver`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Object the message is sent to
    pub receiver: Value,
    /// Operation name
    pub message: String,
    /// Positional arguments
    pub args: Vec<Value>,
}

impl Invocation {
    /// Create an invocation without arguments
    pub fn new(receiver: Value, message: impl Into<String>) -> Self {
        Self {
            receiver,
            message: message.into(),
            args: Vec::new(),
        }
    }

    /// Set positional arguments
    #[must_use]
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// The value at the bottom of a chain of invocations
    #[must_use]
    pub fn root(&self) -> &Value {
        let mut current = &self.receiver;
        while let Value::Deferred(inner) = current {
            current = &inner.receiver;
        }
        current
    }

    /// Messages and arguments from the root outwards
    #[must_use]
    pub fn chain(&self) -> Vec<(&str, &[Value])> {
        let mut links = vec![(self.message.as_str(), self.args.as_slice())];
        let mut current = &self.receiver;
        while let Value::Deferred(inner) = current {
            links.push((inner.message.as_str(), inner.args.as_slice()));
            current = &inner.receiver;
        }
        links.reverse();
        links
    }
}

/// A live value
#[derive(Debug, Clone)]
pub enum Value {
    /// Absence of a value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Interned name
    Symbol(String),
    /// Integer range
    Range(RangeValue),
    /// Generated document identifier
    ObjectId(ObjectId),
    /// Reference to a registered domain type
    Class(String),
    /// Ordered sequence
    Array(Vec<Value>),
    /// Ordered mapping with string keys
    Map(IndexMap<String, Value>),
    /// Shared domain object
    Entity(EntityRef),
    /// Deferred method call
    Deferred(Box<Invocation>),
}

impl Value {
    /// Build a deferred invocation value
    pub fn deferred(receiver: Value, message: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Deferred(Box::new(Invocation::new(receiver, message).with_args(args)))
    }

    /// Build a string value
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Build a map from key/value pairs
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether this is `Null`
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// String or symbol contents
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Integer contents
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Entity handle
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Map contents
    #[must_use]
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Array contents
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Whether both values are the same live entity instance
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Entity(a), Self::Entity(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short description used in error messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Null => "nil".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(x) => x.to_string(),
            Self::String(s) => format!("{:?}", s),
            Self::Symbol(s) => format!(":{}", s),
            Self::Range(r) => format!("{}{}{}", r.start, if r.exclusive { "..." } else { ".." }, r.end),
            Self::ObjectId(id) => format!("ObjectId({})", id),
            Self::Class(name) => name.clone(),
            Self::Array(a) => format!("Array[{}]", a.len()),
            Self::Map(m) => format!("Map[{}]", m.len()),
            Self::Entity(e) => e.entity_key().to_string(),
            Self::Deferred(inv) => format!("{}.{}", inv.receiver.describe(), inv.message),
        }
    }

    /// Clear the relation slots of every entity reachable from this value
    ///
    /// Relation slots hold strong handles, so a graph whose relations point
    /// back at their owner is only freed once its slots are cleared. The
    /// walk follows relations, attributes, collections and deferred calls.
    pub fn release_relations(&self) {
        let mut seen: HashSet<*const Entity> = HashSet::new();
        let mut pending = vec![self.clone()];
        while let Some(value) = pending.pop() {
            match value {
                Self::Array(items) => pending.extend(items),
                Self::Map(entries) => pending.extend(entries.into_values()),
                Self::Deferred(inv) => {
                    let Invocation { receiver, args, .. } = *inv;
                    pending.push(receiver);
                    pending.extend(args);
                }
                Self::Entity(entity) => {
                    if seen.insert(Arc::as_ptr(&entity)) {
                        pending.extend(entity.take_relations().into_values());
                        pending.extend(entity.attributes().into_values());
                    }
                }
                _ => {}
            }
        }
    }

    /// Render as a JSON document fragment for embedding in commands
    ///
    /// # Errors
    ///
    /// Returns a format error for deferred values, which have no document form
    pub fn to_json(&self) -> CoreResult<serde_json::Value> {
        use serde_json::Value as J;
        Ok(match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::Int(i) => J::from(*i),
            Self::Float(x) => J::from(*x),
            Self::String(s) | Self::Symbol(s) | Self::Class(s) => J::String(s.clone()),
            Self::Range(r) => {
                let upper = if r.exclusive { "$lt" } else { "$lte" };
                let mut bounds = serde_json::Map::new();
                bounds.insert("$gte".to_string(), J::from(r.start));
                bounds.insert(upper.to_string(), J::from(r.end));
                J::Object(bounds)
            }
            Self::ObjectId(id) => id.to_extended_json(),
            Self::Array(items) => J::Array(items.iter().map(Self::to_json).collect::<CoreResult<_>>()?),
            Self::Map(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    map.insert(k.clone(), v.to_json()?);
                }
                J::Object(map)
            }
            Self::Entity(e) => match e.id() {
                Some(id) => id.to_extended_json(),
                None => J::String(e.key().to_string()),
            },
            Self::Deferred(inv) => {
                return Err(CoreError::format(format!(
                    "deferred {} cannot be embedded in a document",
                    inv.message
                )));
            }
        })
    }

    /// Read a JSON document fragment back into a value
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(*b),
            J::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .unwrap_or_else(|| Self::Float(n.as_f64().unwrap_or_default())),
            J::String(s) => Self::String(s.clone()),
            J::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            J::Object(map) => match ObjectId::from_extended_json(json) {
                Some(id) if map.len() == 1 => Self::ObjectId(id),
                _ => Self::Map(map.iter().map(|(k, v)| (k.clone(), Self::from_json(v))).collect()),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::ObjectId(a), Self::ObjectId(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => {
                Arc::ptr_eq(a, b) || (a.type_name == b.type_name && a.key == b.key)
            }
            (Self::Deferred(a), Self::Deferred(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::ObjectId(id)
    }
}

impl From<EntityRef> for Value {
    fn from(e: EntityRef) -> Self {
        Self::Entity(e)
    }
}
