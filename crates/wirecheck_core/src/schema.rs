//! Domain type registry.
//!
//! Every entity type that can appear in a watched call is registered here
//! with its collection and relations. The serializer uses the relation
//! table to split an entity into attributes and related references; class
//! references resolve through it by name.

use crate::error::{CoreError, CoreResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Shape of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Single referenced document (`belongs_to`, `has_one`)
    One,
    /// Referenced collection (`has_many`)
    Many,
    /// Single embedded document
    EmbedsOne,
    /// Embedded collection
    EmbedsMany,
}

impl RelationKind {
    /// Whether the relation holds a collection
    #[must_use]
    pub const fn is_collection(self) -> bool {
        matches!(self, Self::Many | Self::EmbedsMany)
    }

    /// Whether related documents live inside the owner
    #[must_use]
    pub const fn is_embedded(self) -> bool {
        matches!(self, Self::EmbedsOne | Self::EmbedsMany)
    }
}

/// A relation from one entity type to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation shape
    pub kind: RelationKind,
    /// Target type name
    pub target: String,
    /// Field holding the referenced id (on the owner for `One`, on the
    /// target for `Many`)
    pub foreign_key: Option<String>,
}

impl RelationDef {
    /// Create a relation definition
    pub fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            foreign_key: None,
        }
    }

    /// Set the foreign key field
    #[must_use]
    pub fn with_foreign_key(mut self, field: impl Into<String>) -> Self {
        self.foreign_key = Some(field.into());
        self
    }
}

/// Registration record for one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Type name
    pub name: String,
    /// Backing collection
    pub collection: String,
    /// Relations by accessor name
    pub relations: IndexMap<String, RelationDef>,
}

impl EntitySchema {
    /// Create a schema with no relations
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: collection.into(),
            relations: IndexMap::new(),
        }
    }

    /// Add a relation
    #[must_use]
    pub fn with_relation(mut self, accessor: impl Into<String>, relation: RelationDef) -> Self {
        self.relations.insert(accessor.into(), relation);
        self
    }

    /// Look up a relation by accessor name
    #[must_use]
    pub fn relation(&self, accessor: &str) -> Option<&RelationDef> {
        self.relations.get(accessor)
    }

    /// Whether `field` names a relation rather than an attribute
    #[must_use]
    pub fn is_relation(&self, field: &str) -> bool {
        self.relations.contains_key(field)
    }
}

#[derive(Debug, Default)]
struct Types {
    by_name: IndexMap<String, EntitySchema>,
}

/// Thread-safe registry of entity types
///
/// Cloning shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    inner: Arc<RwLock<Types>>,
}

impl TypeRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type
    ///
    /// # Errors
    ///
    /// Returns a state error if the name is already registered
    pub fn register(&self, schema: EntitySchema) -> CoreResult<()> {
        let mut types = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if types.by_name.contains_key(&schema.name) {
            return Err(CoreError::state(format!(
                "type already registered: {}",
                schema.name
            )));
        }
        types.by_name.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Register a batch of types, builder style
    ///
    /// # Errors
    ///
    /// Returns a state error on the first duplicate name
    pub fn with_types(self, schemas: impl IntoIterator<Item = EntitySchema>) -> CoreResult<Self> {
        for schema in schemas {
            self.register(schema)?;
        }
        Ok(self)
    }

    /// Resolve a type by name
    ///
    /// # Errors
    ///
    /// Returns a lookup error if the name is not registered
    pub fn resolve(&self, name: &str) -> CoreResult<EntitySchema> {
        let types = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        types
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::lookup("Type", name))
    }

    /// Whether a type is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let types = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        types.by_name.contains_key(name)
    }

    /// Registered type names, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let types = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        types.by_name.keys().cloned().collect()
    }

    /// Find the type stored in a collection
    #[must_use]
    pub fn by_collection(&self, collection: &str) -> Option<EntitySchema> {
        let types = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        types
            .by_name
            .values()
            .find(|s| s.collection == collection)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> EntitySchema {
        EntitySchema::new("Person", "people")
            .with_relation(
                "team",
                RelationDef::new(RelationKind::One, "Team").with_foreign_key("team_id"),
            )
            .with_relation("name", RelationDef::new(RelationKind::EmbedsOne, "Name"))
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = TypeRegistry::new();
        registry.register(person()).unwrap();

        let schema = registry.resolve("Person").unwrap();
        assert_eq!(schema.collection, "people");
        assert!(schema.is_relation("team"));
        assert!(!schema.is_relation("pronouns"));
        assert_eq!(
            schema.relation("team").unwrap().foreign_key.as_deref(),
            Some("team_id")
        );
    }

    #[test]
    fn test_register_duplicate() {
        let registry = TypeRegistry::new();
        registry.register(person()).unwrap();
        assert!(registry.register(person()).unwrap_err().is_state());
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = TypeRegistry::new();
        let err = registry.resolve("Ghost").unwrap_err();
        assert!(err.is_lookup());
        assert_eq!(err.to_string(), "Type not found: Ghost");
    }

    #[test]
    fn test_clone_shares_table() {
        let registry = TypeRegistry::new();
        let shared = registry.clone();
        registry.register(person()).unwrap();
        assert!(shared.contains("Person"));
        assert_eq!(shared.by_collection("people").unwrap().name, "Person");
    }

    #[test]
    fn test_relation_kind() {
        assert!(RelationKind::Many.is_collection());
        assert!(RelationKind::EmbedsMany.is_collection());
        assert!(!RelationKind::One.is_collection());
        assert!(RelationKind::EmbedsOne.is_embedded());
    }
}
