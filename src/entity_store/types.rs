//! EntityStore types

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between an entity id's domain and object id
pub const NAMESPACE_SEPARATOR: char = '.';

/// Domain given to ids without a namespace separator
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Domain of an entity id: the part before the first separator
pub fn domain_of(entity_id: &str) -> &str {
    match entity_id.split_once(NAMESPACE_SEPARATOR) {
        Some((domain, _)) => domain,
        None => UNKNOWN_DOMAIN,
    }
}

/// An addressable device or sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Derived from the id when left empty
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub device_class: String,
    #[serde(default)]
    pub supported_features: u32,
    #[serde(default)]
    pub icon: String,
}

impl Entity {
    /// Minimal entity for an id: name = id, domain from the id prefix
    pub fn minimal(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            domain: domain_of(id).to_string(),
            unit: String::new(),
            device_class: String::new(),
            supported_features: 0,
            icon: String::new(),
        }
    }

    /// Case-insensitive substring match on id or name
    pub(crate) fn matches_search(&self, needle_lower: &str) -> bool {
        self.id.to_lowercase().contains(needle_lower)
            || self.name.to_lowercase().contains(needle_lower)
    }
}

/// Latest observed value of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    /// Serialized attribute blob, stored opaquely
    #[serde(default)]
    pub attributes_json: String,
    pub last_changed: DateTime<Utc>,
}

impl EntityState {
    pub fn new(
        entity_id: impl Into<String>,
        state: impl Into<String>,
        attributes_json: impl Into<String>,
        last_changed: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes_json: attributes_json.into(),
            last_changed,
        }
    }
}

/// Effect of an upsert on the tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateChange {
    Inserted,
    Updated,
    Unchanged,
}

impl StateChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Entity list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityQuery {
    /// Exact domain match when non-empty
    pub domain: Option<String>,
    /// Case-insensitive substring of id or name when non-empty
    pub search: Option<String>,
}

impl EntityQuery {
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

/// Fixed table capacities and per-field byte limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreLimits {
    pub max_entities: usize,
    pub max_states: usize,
    pub max_entity_id_len: usize,
    /// Applies to name, domain and device_class
    pub max_name_len: usize,
    pub max_unit_len: usize,
    pub max_icon_len: usize,
    pub max_state_len: usize,
    pub max_attributes_len: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_entities: 256,
            max_states: 256,
            max_entity_id_len: 128,
            max_name_len: 128,
            max_unit_len: 32,
            max_icon_len: 64,
            max_state_len: 256,
            max_attributes_len: 4096,
        }
    }
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.len() > max {
        return Err(Error::InvalidArgument(format!(
            "{} is {} bytes, limit is {}",
            field,
            value.len(),
            max
        )));
    }
    Ok(())
}

impl StoreLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_entities == 0 || self.max_states == 0 {
            return Err(Error::Unavailable(
                "store capacities must be at least 1".to_string(),
            ));
        }
        if self.max_entity_id_len == 0 || self.max_state_len == 0 {
            return Err(Error::Unavailable(
                "entity id and state length limits must be at least 1".to_string(),
            ));
        }
        // Synthesized entities carry the id as their name
        if self.max_name_len < self.max_entity_id_len {
            return Err(Error::Unavailable(format!(
                "max_name_len ({}) must be at least max_entity_id_len ({})",
                self.max_name_len, self.max_entity_id_len
            )));
        }
        Ok(())
    }

    /// Reject an entity with any field over its byte limit
    pub fn check_entity(&self, entity: &Entity) -> Result<()> {
        check_len("entity id", &entity.id, self.max_entity_id_len)?;
        check_len("name", &entity.name, self.max_name_len)?;
        check_len("domain", &entity.domain, self.max_name_len)?;
        check_len("device_class", &entity.device_class, self.max_name_len)?;
        check_len("unit", &entity.unit, self.max_unit_len)?;
        check_len("icon", &entity.icon, self.max_icon_len)
    }

    /// Reject a state with any field over its byte limit
    pub fn check_state(&self, state: &EntityState) -> Result<()> {
        check_len("entity_id", &state.entity_id, self.max_entity_id_len)?;
        check_len("state", &state.state, self.max_state_len)?;
        check_len("attributes", &state.attributes_json, self.max_attributes_len)
    }
}

/// Table sizes and revision
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreCounts {
    pub entities: usize,
    pub states: usize,
    pub max_entities: usize,
    pub max_states: usize,
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("light.kitchen"), "light");
        assert_eq!(domain_of("sensor.outdoor.temp"), "sensor");
        assert_eq!(domain_of("kitchen"), UNKNOWN_DOMAIN);
        assert_eq!(domain_of(".odd"), "");
    }

    #[test]
    fn test_minimal_entity() {
        let entity = Entity::minimal("light.kitchen");
        assert_eq!(entity.name, "light.kitchen");
        assert_eq!(entity.domain, "light");
        assert!(entity.unit.is_empty());
    }

    #[test]
    fn test_search_matches_either_field() {
        let mut entity = Entity::minimal("sensor.t1");
        entity.name = "Living Room Temperature".to_string();
        assert!(entity.matches_search("temp"));
        assert!(entity.matches_search("t1"));
        assert!(!entity.matches_search("humidity"));
    }

    #[test]
    fn test_default_limits_are_valid() {
        assert!(StoreLimits::default().validate().is_ok());
    }

    #[test]
    fn test_name_limit_below_id_limit_is_unavailable() {
        let limits = StoreLimits {
            max_entity_id_len: 64,
            max_name_len: 32,
            ..StoreLimits::default()
        };
        assert!(matches!(limits.validate(), Err(Error::Unavailable(_))));
    }

    #[test]
    fn test_field_limits_are_inclusive() {
        let limits = StoreLimits {
            max_unit_len: 4,
            max_icon_len: 8,
            ..StoreLimits::default()
        };
        let mut entity = Entity::minimal("sensor.t");
        entity.unit = "kWh ".to_string();
        entity.icon = "mdi:bolt".to_string();
        assert!(limits.check_entity(&entity).is_ok());

        entity.unit.push('x');
        assert!(matches!(
            limits.check_entity(&entity),
            Err(Error::InvalidArgument(_))
        ));

        entity.unit = "°C".to_string();
        entity.icon.push('!');
        assert!(matches!(
            limits.check_entity(&entity),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_limits_count_bytes_not_chars() {
        let limits = StoreLimits {
            max_state_len: 3,
            ..StoreLimits::default()
        };
        let at = Utc.timestamp_millis_opt(0).unwrap();
        assert!(limits.check_state(&EntityState::new("a.b", "°C", "{}", at)).is_ok());
        assert!(limits.check_state(&EntityState::new("a.b", "°CC", "{}", at)).is_err());
    }
}
