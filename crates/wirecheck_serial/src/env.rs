//! Per-pass environments.
//!
//! Both sides reserve an entity's slot before recursing into it, so a
//! back-reference reached during the walk finds the slot already taken.

use crate::wire::HydrationRecord;
use indexmap::IndexMap;
use indexmap::map::Entry;
use std::sync::Arc;
use wirecheck_core::{CoreError, CoreResult, EntityKey, EntityRef};

/// Environment for one serialization pass
#[derive(Debug, Default)]
pub struct SerializeEnv {
    slots: IndexMap<EntityKey, Option<HydrationRecord>>,
}

impl SerializeEnv {
    /// Create an empty environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`; false if the entity was already visited
    pub fn reserve(&mut self, key: EntityKey) -> bool {
        match self.slots.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(None);
                true
            }
        }
    }

    /// Fill a reserved slot
    ///
    /// # Errors
    ///
    /// Returns a state error if the slot was never reserved or is already filled
    pub fn fill(&mut self, record: HydrationRecord) -> CoreResult<()> {
        let key = record.entity_key();
        match self.slots.get_mut(&key) {
            Some(slot @ None) => {
                *slot = Some(record);
                Ok(())
            }
            Some(Some(_)) => Err(CoreError::state(format!("{} recorded twice", key))),
            None => Err(CoreError::state(format!("{} was never reserved", key))),
        }
    }

    /// Whether an entity has been visited in this pass
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of distinct entities visited
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no entity has been visited
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Finish the pass, yielding records in first-visit order
    ///
    /// # Errors
    ///
    /// Returns a state error if any reserved slot was left unfilled
    pub fn into_records(self) -> CoreResult<Vec<HydrationRecord>> {
        self.slots
            .into_iter()
            .map(|(key, record)| {
                record.ok_or_else(|| CoreError::state(format!("{} left half-recorded", key)))
            })
            .collect()
    }
}

#[derive(Debug)]
enum Slot {
    Pending(HydrationRecord),
    Live(EntityRef),
}

/// Environment for one deserialization pass
///
/// Starts out holding recorded hydration records and accumulates live
/// instances as they are rebuilt. Pre-seeded live entities are returned
/// as-is instead of being hydrated again.
#[derive(Debug, Default)]
pub struct DeserializeEnv {
    slots: IndexMap<EntityKey, Slot>,
}

impl DeserializeEnv {
    /// Create an empty environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an environment from recorded hydration records
    ///
    /// # Errors
    ///
    /// Returns a format error if two records share an identity
    pub fn from_records(records: impl IntoIterator<Item = HydrationRecord>) -> CoreResult<Self> {
        let mut env = Self::new();
        for record in records {
            let key = record.entity_key();
            if env.slots.contains_key(&key) {
                return Err(CoreError::format(format!("duplicate hydration record for {}", key)));
            }
            env.slots.insert(key, Slot::Pending(record));
        }
        Ok(env)
    }

    /// Add records from another pass; entities already present are kept
    pub fn extend_records(&mut self, records: impl IntoIterator<Item = HydrationRecord>) {
        for record in records {
            self.slots
                .entry(record.entity_key())
                .or_insert(Slot::Pending(record));
        }
    }

    /// Seed a live instance, replacing any record for the same identity
    pub fn insert_live(&mut self, entity: EntityRef) {
        self.slots.insert(entity.entity_key(), Slot::Live(entity));
    }

    /// The live instance for `key`, if already hydrated
    #[must_use]
    pub fn live(&self, key: &EntityKey) -> Option<EntityRef> {
        match self.slots.get(key) {
            Some(Slot::Live(entity)) => Some(Arc::clone(entity)),
            _ => None,
        }
    }

    /// Take the pending record for `key` and mark `entity` as its live
    /// instance in one step
    ///
    /// Returns `None` if the slot already holds a live instance.
    ///
    /// # Errors
    ///
    /// Returns a lookup error if nothing was recorded for `key`
    pub(crate) fn claim(
        &mut self,
        key: &EntityKey,
        make: impl FnOnce(&HydrationRecord) -> EntityRef,
    ) -> CoreResult<Option<(HydrationRecord, EntityRef)>> {
        let slot = self
            .slots
            .get_mut(key)
            .ok_or_else(|| CoreError::lookup("Entity", key.to_string()))?;
        let entity = match &*slot {
            Slot::Live(_) => return Ok(None),
            Slot::Pending(record) => make(record),
        };
        match std::mem::replace(slot, Slot::Live(Arc::clone(&entity))) {
            Slot::Pending(record) => Ok(Some((record, entity))),
            Slot::Live(_) => Err(CoreError::state(format!("{} changed while claiming", key))),
        }
    }

    /// Number of known identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the environment is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of identities still waiting to be hydrated
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Pending(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecheck_core::{Entity, EntityFlags};

    fn record(type_name: &str, key: &str) -> HydrationRecord {
        HydrationRecord {
            type_name: type_name.into(),
            key: key.into(),
            attributes: IndexMap::new(),
            flags: EntityFlags::default(),
            relations: IndexMap::new(),
        }
    }

    #[test]
    fn test_reserve_then_fill() {
        let mut env = SerializeEnv::new();
        let key = EntityKey::new("Person", "p1");
        assert!(env.reserve(key.clone()));
        assert!(!env.reserve(key.clone()));
        assert!(env.contains(&key));
        env.fill(record("Person", "p1")).unwrap();
        assert!(env.fill(record("Person", "p1")).unwrap_err().is_state());
        assert!(env.fill(record("Person", "p2")).unwrap_err().is_state());
        assert_eq!(env.into_records().unwrap().len(), 1);
    }

    #[test]
    fn test_unfilled_slot_is_state_error() {
        let mut env = SerializeEnv::new();
        env.reserve(EntityKey::new("Person", "p1"));
        assert!(env.into_records().unwrap_err().is_state());
    }

    #[test]
    fn test_duplicate_records_rejected() {
        let err = DeserializeEnv::from_records(vec![record("Team", "t"), record("Team", "t")]);
        assert!(err.unwrap_err().is_format());
    }

    #[test]
    fn test_claim_once() {
        let mut env = DeserializeEnv::from_records(vec![record("Team", "t")]).unwrap();
        let key = EntityKey::new("Team", "t");
        assert_eq!(env.pending(), 1);

        let (claimed, entity) = env
            .claim(&key, |r| Entity::new(&r.type_name, &r.key))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.key, "t");
        assert!(Arc::ptr_eq(&env.live(&key).unwrap(), &entity));
        assert!(env.claim(&key, |_| unreachable!()).unwrap().is_none());
        assert_eq!(env.pending(), 0);

        let missing = env.claim(&EntityKey::new("Team", "x"), |_| unreachable!());
        assert!(missing.unwrap_err().is_lookup());
    }

    #[test]
    fn test_seeded_live_instance_wins() {
        let seeded = Entity::new("Team", "t");
        let mut env = DeserializeEnv::new();
        env.insert_live(Arc::clone(&seeded));
        env.extend_records(vec![record("Team", "t")]);
        assert!(Arc::ptr_eq(&env.live(&EntityKey::new("Team", "t")).unwrap(), &seeded));
        assert_eq!(env.len(), 1);
    }
}
