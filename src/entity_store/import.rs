//! Import of upstream state objects
//!
//! Upstream hubs report states as JSON objects:
//! `{"entity_id", "state", "attributes": {...}, "last_changed"}`.
//! The attributes carry the descriptive entity fields.

use super::{Entity, EntityState, EntityStore, StateChange};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

fn required_str<'a>(object: &'a Value, field: &str) -> Result<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgument(format!("{} must be a string", field)))
}

fn attr_str(attributes: Option<&Value>, field: &str) -> Option<String> {
    attributes?.get(field)?.as_str().map(str::to_string)
}

/// Build the EntityState part of a state object
pub fn state_from_object(object: &Value) -> Result<EntityState> {
    let entity_id = required_str(object, "entity_id")?;
    let state = required_str(object, "state")?;
    if entity_id.is_empty() {
        return Err(Error::InvalidArgument("entity_id is empty".to_string()));
    }

    let attributes_json = match object.get("attributes") {
        Some(attrs @ Value::Object(_)) => serde_json::to_string(attrs)?,
        _ => "{}".to_string(),
    };

    let last_changed = object
        .get("last_changed")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(EntityState::new(entity_id, state, attributes_json, last_changed))
}

/// Build the Entity described by a state object's attributes
pub fn entity_from_state_object(object: &Value) -> Result<Entity> {
    let entity_id = required_str(object, "entity_id")?;
    let attributes = object.get("attributes").filter(|a| a.is_object());

    let mut entity = Entity::minimal(entity_id);
    if let Some(name) = attr_str(attributes, "friendly_name").filter(|n| !n.is_empty()) {
        entity.name = name;
    }
    entity.unit = attr_str(attributes, "unit_of_measurement").unwrap_or_default();
    entity.device_class = attr_str(attributes, "device_class").unwrap_or_default();
    entity.icon = attr_str(attributes, "icon").unwrap_or_default();
    entity.supported_features = attributes
        .and_then(|a| a.get("supported_features"))
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);

    Ok(entity)
}

/// Apply one upstream state object to the store
pub fn import_state_object(store: &EntityStore, object: &Value) -> Result<StateChange> {
    if !object.is_object() {
        return Err(Error::InvalidArgument(
            "state object must be a JSON object".to_string(),
        ));
    }

    let state = state_from_object(object)?;
    let entity = entity_from_state_object(object)?;
    store.upsert_state_with_entity(state, entity)
}
