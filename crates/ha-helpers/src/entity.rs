//! Entity model
//!
//! An entity is a read-only view over integration data; writing it copies
//! those properties into the state machine.

use std::collections::HashMap;

use ha_core::{attrs, Context, EntityId, State, STATE_UNAVAILABLE, STATE_UNKNOWN};
use ha_state_machine::StateMachine;
use serde_json::{json, Value};

/// Properties the host reads from an entity
pub trait Entity: Send + Sync {
    fn entity_id(&self) -> &EntityId;

    /// Display name, written as `friendly_name`
    fn name(&self) -> Option<String> {
        None
    }

    /// Stable id used by the entity registry
    fn unique_id(&self) -> Option<String> {
        None
    }

    fn icon(&self) -> Option<&str> {
        None
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        None
    }

    /// Current state; `None` is written as `unknown`
    fn state(&self) -> Option<String>;

    fn device_state_attributes(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    fn available(&self) -> bool {
        true
    }

    /// Write the state even when nothing changed
    fn force_update(&self) -> bool {
        false
    }
}

/// Write `entity` into the state machine
pub fn write_state(entity: &dyn Entity, states: &StateMachine, context: Context) -> State {
    let state = if !entity.available() {
        STATE_UNAVAILABLE.to_string()
    } else {
        entity.state().unwrap_or_else(|| STATE_UNKNOWN.to_string())
    };

    let mut attributes = if entity.available() {
        entity.device_state_attributes()
    } else {
        HashMap::new()
    };
    if let Some(unit) = entity.unit_of_measurement() {
        attributes.insert(attrs::UNIT_OF_MEASUREMENT.to_string(), json!(unit));
    }
    if let Some(name) = entity.name() {
        attributes.insert(attrs::FRIENDLY_NAME.to_string(), json!(name));
    }
    if let Some(icon) = entity.icon() {
        attributes.insert(attrs::ICON.to_string(), json!(icon));
    }

    states.set(
        entity.entity_id().clone(),
        state,
        attributes,
        entity.force_update(),
        context,
    )
}
