//! State machine with domain indexing
//!
//! This crate provides the StateMachine, which tracks the current state of
//! every entity written by the components. It keeps an index by domain and
//! fires `state_changed` / `state_reported` events on the event bus.

mod bus;

pub use bus::{EventBus, SharedEventBus, TypedEventReceiver};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, EntityId, State, MAX_STATE_LENGTH, STATE_UNKNOWN};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

/// The state machine tracks all entity states
///
/// Writes follow the Home Assistant rules:
/// - a new entity, a different state value or different attributes store a
///   new state and fire STATE_CHANGED
/// - an identical write only moves `last_reported` and fires STATE_REPORTED,
///   unless the writer asks for `force_update`
pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    /// Event bus for firing state change events
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    /// Create a new state machine with the given event bus
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// The bus this state machine fires on
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Write the state of an entity
    ///
    /// Returns the stored state.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        force_update: bool,
        context: Context,
    ) -> State {
        let mut state = state.into();
        if state.len() > MAX_STATE_LENGTH {
            warn!(
                "State of {} is longer than {} characters, storing '{}' instead",
                entity_id, MAX_STATE_LENGTH, STATE_UNKNOWN
            );
            state = STATE_UNKNOWN.to_string();
        }

        let entity_id_str = entity_id.to_string();
        let old_state = self.states.get(&entity_id_str).map(|s| s.clone());

        if let Some(existing) = &old_state {
            if !force_update && existing.same_content(&state, &attributes) {
                let reported = existing.reported();
                trace!("State unchanged, reporting only");
                self.states.insert(entity_id_str, reported.clone());
                self.event_bus.fire_typed(
                    StateReportedData {
                        entity_id,
                        new_state: reported.clone(),
                        old_last_reported: existing.last_reported,
                        last_reported: reported.last_reported.unwrap_or_else(Utc::now),
                    },
                    context,
                );
                return reported;
            }
        }

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(entity_id_str.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(entity_id_str);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// When the state value of an entity last changed
    pub fn last_changed(&self, entity_id: &str) -> Option<DateTime<Utc>> {
        self.states.get(entity_id).map(|s| s.last_changed)
    }

    /// Whether an entity currently has a state
    pub fn contains(&self, entity_id: &str) -> bool {
        self.states.contains_key(entity_id)
    }

    /// Get all entity IDs for a domain
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Get all entity IDs
    pub fn all_entity_ids(&self) -> Vec<String> {
        self.states.iter().map(|r| r.key().clone()).collect()
    }

    /// Remove an entity's state
    ///
    /// Fires STATE_CHANGED with the old state and no new state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let entity_id_str = entity_id.to_string();
        let old_state = self.states.remove(&entity_id_str).map(|(_, s)| s);

        if let Some(state) = &old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &entity_id_str);
            }

            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    /// Get the total number of entities
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateMachine
pub type SharedStateMachine = Arc<StateMachine>;
