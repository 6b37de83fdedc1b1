//! EntityStore - Bounded in-memory entity/state model
//!
//! ## Responsibilities
//!
//! - Entity table (declared or synthesized from states)
//! - Latest state per entity
//! - Revision counter for cheap change polling
//!
//! ## Design
//!
//! - Fixed capacities; a full table is a reported error, never a silent drop
//! - One mutex, one critical section per call
//! - Insertion order is the listing order
//! - Revision moves only when the tables observably change (and on reset)

mod import;
mod types;

pub use import::{entity_from_state_object, import_state_object, state_from_object};
pub use types::*;

use crate::error::{Error, Result};
use std::collections::{HashMap, TryReserveError};
use std::sync::{Mutex, MutexGuard};

/// Entity and state tables, guarded together
#[derive(Default)]
struct StoreTables {
    entities: Vec<Entity>,
    entity_index: HashMap<String, usize>,
    states: Vec<EntityState>,
    state_index: HashMap<String, usize>,
    revision: u64,
}

impl StoreTables {
    fn with_limits(limits: &StoreLimits) -> Result<Self> {
        let unreservable = |table: &str, capacity: usize, err: TryReserveError| {
            Error::Unavailable(format!("cannot reserve {} {}: {}", capacity, table, err))
        };

        let mut tables = Self::default();
        tables
            .entities
            .try_reserve_exact(limits.max_entities)
            .map_err(|e| unreservable("entities", limits.max_entities, e))?;
        tables
            .entity_index
            .try_reserve(limits.max_entities)
            .map_err(|e| unreservable("entity index entries", limits.max_entities, e))?;
        tables
            .states
            .try_reserve_exact(limits.max_states)
            .map_err(|e| unreservable("states", limits.max_states, e))?;
        tables
            .state_index
            .try_reserve(limits.max_states)
            .map_err(|e| unreservable("state index entries", limits.max_states, e))?;
        Ok(tables)
    }

    fn put_entity(&mut self, mut entity: Entity, limits: &StoreLimits) -> Result<StateChange> {
        if entity.domain.is_empty() {
            entity.domain = domain_of(&entity.id).to_string();
        }

        if let Some(&idx) = self.entity_index.get(&entity.id) {
            if self.entities[idx] == entity {
                return Ok(StateChange::Unchanged);
            }
            self.entities[idx] = entity;
            return Ok(StateChange::Updated);
        }

        if self.entities.len() >= limits.max_entities {
            return Err(Error::ResourceExhausted(format!(
                "entity table full ({} entries), cannot add {}",
                limits.max_entities, entity.id
            )));
        }

        self.entity_index.insert(entity.id.clone(), self.entities.len());
        self.entities.push(entity);
        Ok(StateChange::Inserted)
    }

    fn put_state(&mut self, state: EntityState, limits: &StoreLimits) -> Result<StateChange> {
        if let Some(&idx) = self.state_index.get(&state.entity_id) {
            if self.states[idx] == state {
                return Ok(StateChange::Unchanged);
            }
            self.states[idx] = state;
            return Ok(StateChange::Updated);
        }

        if self.states.len() >= limits.max_states {
            return Err(Error::ResourceExhausted(format!(
                "state table full ({} entries), cannot add {}",
                limits.max_states, state.entity_id
            )));
        }

        self.state_index.insert(state.entity_id.clone(), self.states.len());
        self.states.push(state);
        Ok(StateChange::Inserted)
    }

    /// Add a minimal entity for `entity_id` if it has none and there is room
    fn ensure_entity(&mut self, entity_id: &str, limits: &StoreLimits) {
        if self.entity_index.contains_key(entity_id) {
            return;
        }
        if self.entities.len() >= limits.max_entities {
            tracing::warn!(
                entity_id = %entity_id,
                max_entities = limits.max_entities,
                "Entity table full, state stored without entity"
            );
            return;
        }
        self.entity_index
            .insert(entity_id.to_string(), self.entities.len());
        self.entities.push(Entity::minimal(entity_id));
    }

    fn clear(&mut self) {
        self.entities.clear();
        self.entity_index.clear();
        self.states.clear();
        self.state_index.clear();
    }
}

/// EntityStore instance
pub struct EntityStore {
    limits: StoreLimits,
    tables: Mutex<StoreTables>,
}

impl EntityStore {
    /// Create new EntityStore
    ///
    /// Fails with `Error::Unavailable` on unusable limits or when the
    /// tables cannot be allocated.
    pub fn new(limits: StoreLimits) -> Result<Self> {
        limits.validate()?;
        let tables = StoreTables::with_limits(&limits)?;

        tracing::info!(
            max_entities = limits.max_entities,
            max_states = limits.max_states,
            "EntityStore initialized"
        );

        Ok(Self {
            tables: Mutex::new(tables),
            limits,
        })
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreTables>> {
        self.tables.lock().map_err(|_| {
            tracing::error!("EntityStore lock poisoned, failing closed");
            Error::Unavailable("entity store lock poisoned".to_string())
        })
    }

    /// Insert or overwrite an entity by id
    ///
    /// Fields over their byte limits are rejected, never truncated.
    pub fn upsert_entity(&self, entity: Entity) -> Result<StateChange> {
        if entity.id.is_empty() {
            return Err(Error::InvalidArgument("entity id is empty".to_string()));
        }
        self.limits.check_entity(&entity)?;

        let mut tables = self.lock()?;
        let change = tables.put_entity(entity, &self.limits)?;
        if change.is_change() {
            tables.revision += 1;
        }
        Ok(change)
    }

    /// Insert or overwrite the state of an entity
    ///
    /// Identical re-writes (timestamp included) are a no-op. An applied
    /// change synthesizes a minimal entity when none exists and bumps the
    /// revision exactly once.
    pub fn upsert_state(&self, state: EntityState) -> Result<StateChange> {
        if state.entity_id.is_empty() {
            return Err(Error::InvalidArgument("entity_id is empty".to_string()));
        }
        self.limits.check_state(&state)?;

        let entity_id = state.entity_id.clone();
        let mut tables = self.lock()?;
        let change = tables.put_state(state, &self.limits)?;
        if change.is_change() {
            tables.ensure_entity(&entity_id, &self.limits);
            tables.revision += 1;
            tracing::debug!(
                entity_id = %entity_id,
                change = ?change,
                revision = tables.revision,
                "State applied"
            );
        }
        Ok(change)
    }

    /// Apply a state and its full entity description in one critical section
    ///
    /// The state must fit; the entity is best effort when its table is full.
    /// The revision moves at most once.
    pub fn upsert_state_with_entity(
        &self,
        state: EntityState,
        entity: Entity,
    ) -> Result<StateChange> {
        if state.entity_id.is_empty() {
            return Err(Error::InvalidArgument("entity_id is empty".to_string()));
        }
        if entity.id != state.entity_id {
            return Err(Error::InvalidArgument(format!(
                "entity id {} does not match state entity_id {}",
                entity.id, state.entity_id
            )));
        }
        self.limits.check_state(&state)?;
        self.limits.check_entity(&entity)?;

        let mut tables = self.lock()?;
        let state_change = tables.put_state(state, &self.limits)?;
        let entity_change = match tables.put_entity(entity, &self.limits) {
            Ok(change) => change,
            Err(Error::ResourceExhausted(message)) => {
                tracing::warn!(message = %message, "Entity not stored");
                StateChange::Unchanged
            }
            Err(e) => return Err(e),
        };

        let change = match (state_change, entity_change) {
            (StateChange::Inserted, _) => StateChange::Inserted,
            (StateChange::Unchanged, StateChange::Unchanged) => StateChange::Unchanged,
            _ => StateChange::Updated,
        };
        if change.is_change() {
            tables.revision += 1;
        }
        Ok(change)
    }

    /// Exact lookup by entity id
    pub fn get_state(&self, entity_id: &str) -> Result<Option<EntityState>> {
        let tables = self.lock()?;
        Ok(tables
            .state_index
            .get(entity_id)
            .map(|&idx| tables.states[idx].clone()))
    }

    /// Entity lookup by id
    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let tables = self.lock()?;
        Ok(tables
            .entity_index
            .get(entity_id)
            .map(|&idx| tables.entities[idx].clone()))
    }

    /// Filtered entities in insertion order, at most `max_out`
    pub fn list_entities(&self, query: &EntityQuery, max_out: usize) -> Result<Vec<Entity>> {
        let domain = query.domain.as_deref().filter(|d| !d.is_empty());
        let search = query
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let tables = self.lock()?;
        Ok(tables
            .entities
            .iter()
            .filter(|e| domain.map_or(true, |d| e.domain == d))
            .filter(|e| search.as_deref().map_or(true, |s| e.matches_search(s)))
            .take(max_out)
            .cloned()
            .collect())
    }

    /// States in insertion order, at most `max_out`
    pub fn list_states(&self, max_out: usize) -> Result<Vec<EntityState>> {
        let tables = self.lock()?;
        Ok(tables.states.iter().take(max_out).cloned().collect())
    }

    /// Current revision
    pub fn state_revision(&self) -> Result<u64> {
        Ok(self.lock()?.revision)
    }

    /// Clear both tables; always bumps the revision, even if already empty
    pub fn reset(&self) -> Result<()> {
        let mut tables = self.lock()?;
        let (entities, states) = (tables.entities.len(), tables.states.len());
        tables.clear();
        tables.revision += 1;

        tracing::info!(
            cleared_entities = entities,
            cleared_states = states,
            revision = tables.revision,
            "EntityStore reset"
        );
        Ok(())
    }

    /// Table sizes and revision
    pub fn counts(&self) -> Result<StoreCounts> {
        let tables = self.lock()?;
        Ok(StoreCounts {
            entities: tables.entities.len(),
            states: tables.states.len(),
            max_entities: self.limits.max_entities,
            max_states: self.limits.max_states,
            revision: tables.revision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::thread;

    fn at(ms: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn state(id: &str, value: &str, ms: i64) -> EntityState {
        EntityState::new(id, value, "{}", at(ms))
    }

    fn store(max_entities: usize, max_states: usize) -> EntityStore {
        EntityStore::new(StoreLimits {
            max_entities,
            max_states,
            ..StoreLimits::default()
        })
        .unwrap()
    }

    fn tight_store() -> EntityStore {
        EntityStore::new(StoreLimits {
            max_entity_id_len: 12,
            max_name_len: 16,
            max_state_len: 8,
            max_attributes_len: 16,
            ..StoreLimits::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_rejects_zero_capacity() {
        let result = EntityStore::new(StoreLimits {
            max_entities: 0,
            max_states: 4,
            ..StoreLimits::default()
        });
        assert!(matches!(result, Err(Error::Unavailable(_))));
    }

    #[test]
    fn test_new_fails_closed_when_tables_cannot_be_allocated() {
        for (max_entities, max_states) in [(usize::MAX, 4), (4, usize::MAX)] {
            let result = EntityStore::new(StoreLimits {
                max_entities,
                max_states,
                ..StoreLimits::default()
            });
            assert!(matches!(result, Err(Error::Unavailable(_))));
        }
    }

    #[test]
    fn test_entity_id_at_limit_accepted_one_over_rejected() {
        let store = tight_store();
        let at_limit = "sensor.abcde";
        assert_eq!(at_limit.len(), 12);
        assert_eq!(
            store.upsert_entity(Entity::minimal(at_limit)).unwrap(),
            StateChange::Inserted
        );
        assert_eq!(
            store.upsert_state(state(at_limit, "on", 0)).unwrap(),
            StateChange::Inserted
        );
        let rev = store.state_revision().unwrap();

        let over = "sensor.abcdef";
        assert!(matches!(
            store.upsert_entity(Entity::minimal(over)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.upsert_state(state(over, "on", 0)),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.state_revision().unwrap(), rev);
        assert!(store.get_entity(over).unwrap().is_none());
    }

    #[test]
    fn test_state_value_and_attributes_limits() {
        let store = tight_store();
        store.upsert_state(state("light.a", "12345678", 0)).unwrap();
        assert!(matches!(
            store.upsert_state(state("light.a", "123456789", 1)),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.get_state("light.a").unwrap().unwrap().state, "12345678");

        let attrs = r#"{"brightness":9}"#;
        assert_eq!(attrs.len(), 16);
        store
            .upsert_state(EntityState::new("light.a", "on", attrs, at(2)))
            .unwrap();
        let over = r#"{"brightness":99}"#;
        assert!(matches!(
            store.upsert_state(EntityState::new("light.a", "on", over, at(3))),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_name_limit_on_entity_upsert() {
        let store = tight_store();
        let mut lamp = Entity::minimal("light.a");
        lamp.name = "Lamp by the door".to_string();
        assert_eq!(lamp.name.len(), 16);
        store.upsert_entity(lamp.clone()).unwrap();

        lamp.name.push('s');
        assert!(matches!(
            store.upsert_entity(lamp),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(
            store.get_entity("light.a").unwrap().unwrap().name,
            "Lamp by the door"
        );
    }

    #[test]
    fn test_combined_upsert_rejects_oversized_entity_without_storing_state() {
        let store = tight_store();
        let mut entity = Entity::minimal("sensor.t");
        entity.name = "Outdoor Temperature".to_string();
        let err = store
            .upsert_state_with_entity(state("sensor.t", "21", 0), entity)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(store.get_state("sensor.t").unwrap().is_none());
        assert_eq!(store.state_revision().unwrap(), 0);
    }

    #[test]
    fn test_empty_ids_are_invalid() {
        let store = store(4, 4);
        assert!(matches!(
            store.upsert_entity(Entity::minimal("")),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.upsert_state(state("", "on", 0)),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(store.state_revision().unwrap(), 0);
    }

    #[test]
    fn test_identical_state_does_not_bump_revision() {
        let store = store(4, 4);
        assert_eq!(
            store.upsert_state(state("light.kitchen", "on", 1)).unwrap(),
            StateChange::Inserted
        );
        let rev = store.state_revision().unwrap();

        assert_eq!(
            store.upsert_state(state("light.kitchen", "on", 1)).unwrap(),
            StateChange::Unchanged
        );
        assert_eq!(store.state_revision().unwrap(), rev);
    }

    #[test]
    fn test_any_differing_field_bumps_once() {
        let store = store(4, 4);
        store.upsert_state(state("light.kitchen", "on", 1)).unwrap();

        let variants = [
            EntityState::new("light.kitchen", "off", "{}", at(1)),
            EntityState::new("light.kitchen", "off", "{\"brightness\":10}", at(1)),
            EntityState::new("light.kitchen", "off", "{\"brightness\":10}", at(2)),
        ];
        for variant in variants {
            let before = store.state_revision().unwrap();
            assert_eq!(store.upsert_state(variant).unwrap(), StateChange::Updated);
            assert_eq!(store.state_revision().unwrap(), before + 1);
        }
    }

    #[test]
    fn test_state_synthesizes_entity() {
        let store = store(4, 4);
        store.upsert_state(state("light.kitchen", "on", 1)).unwrap();
        store.upsert_state(state("doorbell", "idle", 1)).unwrap();

        let light = store.get_entity("light.kitchen").unwrap().unwrap();
        assert_eq!(light.domain, "light");
        assert_eq!(light.name, "light.kitchen");

        let bell = store.get_entity("doorbell").unwrap().unwrap();
        assert_eq!(bell.domain, UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_state_does_not_overwrite_declared_entity() {
        let store = store(4, 4);
        let mut fan = Entity::minimal("switch.fan");
        fan.name = "Ceiling Fan".to_string();
        store.upsert_entity(fan).unwrap();

        store.upsert_state(state("switch.fan", "on", 1)).unwrap();
        let entity = store.get_entity("switch.fan").unwrap().unwrap();
        assert_eq!(entity.name, "Ceiling Fan");
    }

    #[test]
    fn test_state_table_full_is_resource_exhausted() {
        let store = store(8, 2);
        store.upsert_state(state("sensor.a", "1", 0)).unwrap();
        store.upsert_state(state("sensor.b", "1", 0)).unwrap();
        let rev = store.state_revision().unwrap();

        let err = store.upsert_state(state("sensor.c", "1", 0)).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(store.state_revision().unwrap(), rev);
        assert!(store.get_state("sensor.c").unwrap().is_none());

        // Existing ids still update in place
        assert_eq!(
            store.upsert_state(state("sensor.a", "2", 1)).unwrap(),
            StateChange::Updated
        );
    }

    #[test]
    fn test_entity_table_full_is_resource_exhausted() {
        let store = store(1, 4);
        store.upsert_entity(Entity::minimal("light.a")).unwrap();
        let err = store.upsert_entity(Entity::minimal("light.b")).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));

        // Overwrite of the existing id still works
        let mut renamed = Entity::minimal("light.a");
        renamed.name = "Lamp".to_string();
        assert_eq!(store.upsert_entity(renamed).unwrap(), StateChange::Updated);
    }

    #[test]
    fn test_state_stored_when_entity_table_full() {
        let store = store(1, 4);
        store.upsert_entity(Entity::minimal("light.a")).unwrap();
        store.upsert_state(state("light.b", "on", 0)).unwrap();

        assert!(store.get_state("light.b").unwrap().is_some());
        assert!(store.get_entity("light.b").unwrap().is_none());
    }

    #[test]
    fn test_upsert_entity_revision() {
        let store = store(4, 4);
        store.upsert_entity(Entity::minimal("switch.fan")).unwrap();
        assert_eq!(store.state_revision().unwrap(), 1);
        assert_eq!(
            store.upsert_entity(Entity::minimal("switch.fan")).unwrap(),
            StateChange::Unchanged
        );
        assert_eq!(store.state_revision().unwrap(), 1);
    }

    #[test]
    fn test_upsert_entity_fills_empty_domain() {
        let store = store(4, 4);
        let mut entity = Entity::minimal("climate.hall");
        entity.domain.clear();
        store.upsert_entity(entity).unwrap();
        assert_eq!(
            store.get_entity("climate.hall").unwrap().unwrap().domain,
            "climate"
        );
    }

    #[test]
    fn test_list_entities_filters() {
        let store = store(16, 16);
        let mut t1 = Entity::minimal("sensor.t1");
        t1.name = "Outdoor Temperature".to_string();
        store.upsert_entity(t1).unwrap();
        store.upsert_entity(Entity::minimal("sensor.humidity")).unwrap();
        store.upsert_entity(Entity::minimal("sensor.TEMP_attic")).unwrap();
        store.upsert_entity(Entity::minimal("climate.temp_hall")).unwrap();
        for n in 0..6 {
            store
                .upsert_entity(Entity::minimal(&format!("sensor.temp_{}", n)))
                .unwrap();
        }

        let query = EntityQuery::default().domain("sensor").search("temp");
        let items = store.list_entities(&query, 5).unwrap();
        assert_eq!(items.len(), 5);
        for item in &items {
            assert_eq!(item.domain, "sensor");
            assert!(
                item.id.to_lowercase().contains("temp")
                    || item.name.to_lowercase().contains("temp")
            );
        }
        // Insertion order: name match first, then case-insensitive id match
        assert_eq!(items[0].id, "sensor.t1");
        assert_eq!(items[1].id, "sensor.TEMP_attic");
    }

    #[test]
    fn test_list_entities_empty_filters_match_all() {
        let store = store(4, 4);
        store.upsert_entity(Entity::minimal("light.a")).unwrap();
        store.upsert_entity(Entity::minimal("switch.b")).unwrap();

        let query = EntityQuery::default().domain("").search("");
        let items = store.list_entities(&query, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert!(store.list_entities(&query, 0).unwrap().is_empty());
    }

    #[test]
    fn test_list_states_order_and_cap() {
        let store = store(8, 8);
        for id in ["a.1", "b.2", "c.3"] {
            store.upsert_state(state(id, "x", 0)).unwrap();
        }
        store.upsert_state(state("a.1", "y", 1)).unwrap();

        let ids: Vec<_> = store
            .list_states(10)
            .unwrap()
            .into_iter()
            .map(|s| s.entity_id)
            .collect();
        assert_eq!(ids, vec!["a.1", "b.2", "c.3"]);
        assert_eq!(store.list_states(2).unwrap().len(), 2);
    }

    #[test]
    fn test_reset_clears_and_always_bumps() {
        let store = store(4, 4);
        store.upsert_state(state("light.a", "on", 0)).unwrap();
        let rev = store.state_revision().unwrap();

        store.reset().unwrap();
        assert_eq!(store.state_revision().unwrap(), rev + 1);
        assert!(store.get_state("light.a").unwrap().is_none());
        assert!(store.list_entities(&EntityQuery::default(), 10).unwrap().is_empty());
        assert!(store.list_states(10).unwrap().is_empty());

        // Already empty: still bumps
        store.reset().unwrap();
        assert_eq!(store.state_revision().unwrap(), rev + 2);
    }

    #[test]
    fn test_combined_upsert_bumps_once() {
        let store = store(4, 4);
        let mut entity = Entity::minimal("sensor.t");
        entity.unit = "°C".to_string();

        let change = store
            .upsert_state_with_entity(state("sensor.t", "21", 0), entity.clone())
            .unwrap();
        assert_eq!(change, StateChange::Inserted);
        assert_eq!(store.state_revision().unwrap(), 1);

        let change = store
            .upsert_state_with_entity(state("sensor.t", "21", 0), entity)
            .unwrap();
        assert_eq!(change, StateChange::Unchanged);
        assert_eq!(store.state_revision().unwrap(), 1);
    }

    #[test]
    fn test_combined_upsert_rejects_mismatched_ids() {
        let store = store(4, 4);
        let err = store
            .upsert_state_with_entity(state("sensor.t", "21", 0), Entity::minimal("sensor.u"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_concurrent_writers_count_every_change() {
        let store = Arc::new(store(64, 64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("sensor.t{}", t);
                        store.upsert_state(state(&id, &i.to_string(), i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.state_revision().unwrap(), 8 * 50);
        assert_eq!(store.list_states(64).unwrap().len(), 8);
    }
}
