//! Wire form of serialized values.
//!
//! A closed set of kinds, adjacently tagged so every node names its kind:
//!
//! ```json
//! {"kind":"mapping","data":{"name":{"kind":"atomic","data":{"type":"string","value":"Ada"}}}}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use wirecheck_core::{CoreResult, EntityFlags, EntityKey, ObjectId, RangeValue};

/// Self-describing literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Atomic {
    /// nil
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
    /// Registered type name
    Class(String),
    /// Generated document identifier
    ObjectId(ObjectId),
}

/// Deferred call in wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireInvocation {
    /// Receiver of the call
    pub receiver: Serialized,
    /// Operation name
    pub message: String,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Serialized>,
}

/// A serialized value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Serialized {
    /// Literal
    Atomic(Atomic),
    /// Ordered list
    Sequence(Vec<Serialized>),
    /// Ordered string-keyed mapping
    Mapping(IndexMap<String, Serialized>),
    /// Reference into the environment
    Entity(EntityKey),
    /// Value that must be rebuilt by calling something
    Invocation(Box<WireInvocation>),
}

impl Serialized {
    /// Null literal
    #[must_use]
    pub const fn null() -> Self {
        Self::Atomic(Atomic::Null)
    }

    /// Wire kind name
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Atomic(_) => "atomic",
            Self::Sequence(_) => "sequence",
            Self::Mapping(_) => "mapping",
            Self::Entity(_) => "entity",
            Self::Invocation(_) => "invocation",
        }
    }

    /// Entity keys referenced anywhere in this value
    #[must_use]
    pub fn entity_refs(&self) -> Vec<&EntityKey> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a EntityKey>) {
        match self {
            Self::Atomic(_) => {}
            Self::Sequence(items) => items.iter().for_each(|i| i.collect_refs(out)),
            Self::Mapping(entries) => entries.values().for_each(|v| v.collect_refs(out)),
            Self::Entity(key) => out.push(key),
            Self::Invocation(inv) => {
                inv.receiver.collect_refs(out);
                inv.args.iter().for_each(|a| a.collect_refs(out));
            }
        }
    }
}

/// Everything needed to rebuild one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationRecord {
    /// Registered type name
    pub type_name: String,
    /// Identity key
    pub key: String,
    /// Non-relation attributes
    #[serde(default)]
    pub attributes: IndexMap<String, Serialized>,
    /// Lifecycle flags
    #[serde(default)]
    pub flags: EntityFlags,
    /// Loaded relation slots, holding references or deferred loads
    #[serde(default)]
    pub relations: IndexMap<String, Serialized>,
}

impl HydrationRecord {
    /// Identity of the recorded entity
    #[must_use]
    pub fn entity_key(&self) -> EntityKey {
        EntityKey::new(&self.type_name, &self.key)
    }
}

/// A serialized value together with its environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoded {
    /// The value
    pub value: Serialized,
    /// Hydration records for every entity the value reaches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<HydrationRecord>,
}

impl Encoded {
    /// Single-line JSON text
    ///
    /// # Errors
    ///
    /// Returns a format error if encoding fails
    pub fn to_json_string(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse JSON text
    ///
    /// # Errors
    ///
    /// Returns a format error for malformed text
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_atomic_wire_shape() {
        let value = Serialized::Atomic(Atomic::String("Ada".into()));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"kind": "atomic", "data": {"type": "string", "value": "Ada"}})
        );
        let null = serde_json::to_value(Serialized::null()).unwrap();
        assert_eq!(null, json!({"kind": "atomic", "data": {"type": "null"}}));
        assert_eq!(serde_json::from_value::<Serialized>(null).unwrap(), Serialized::null());
    }

    #[test]
    fn test_mapping_keeps_order() {
        let mut entries = IndexMap::new();
        entries.insert("z".to_string(), Serialized::Atomic(Atomic::Int(1)));
        entries.insert("a".to_string(), Serialized::Atomic(Atomic::Int(2)));
        let text = serde_json::to_string(&Serialized::Mapping(entries)).unwrap();
        assert!(text.find("\"z\"").unwrap() < text.find("\"a\"").unwrap());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = serde_json::from_value::<Serialized>(json!({"kind": "closure", "data": "x"}));
        assert!(err.is_err());
        assert!(Encoded::from_json_str("{\"value\":").unwrap_err().is_format());
    }

    #[test]
    fn test_entity_refs() {
        let key = EntityKey::new("Person", "p1");
        let value = Serialized::Invocation(Box::new(WireInvocation {
            receiver: Serialized::Entity(key.clone()),
            message: "reload".into(),
            args: vec![Serialized::Sequence(vec![Serialized::Entity(EntityKey::new("Team", "t1"))])],
        }));
        let refs = value.entity_refs();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], &key);
        assert_eq!(value.kind(), "invocation");
    }

    #[test]
    fn test_envelope_omits_empty_environment() {
        let encoded = Encoded {
            value: Serialized::Atomic(Atomic::Bool(true)),
            entities: Vec::new(),
        };
        let text = encoded.to_json_string().unwrap();
        assert!(!text.contains("entities"));
        assert_eq!(Encoded::from_json_str(&text).unwrap(), encoded);
    }
}
