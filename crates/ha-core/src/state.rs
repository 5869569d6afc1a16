//! State type representing an entity's current state

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// Represents the state of an entity at a point in time
///
/// State includes the entity's current value (as a string), any associated
/// attributes, and timestamps for when the state was last changed, updated
/// and reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// The entity this state belongs to
    pub entity_id: EntityId,

    /// The state value (e.g., "1_click", "0.11516", "unavailable")
    pub state: String,

    /// Additional attributes associated with the state
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed
    pub last_changed: DateTime<Utc>,

    /// When the state value or attributes were last written with a change
    pub last_updated: DateTime<Utc>,

    /// When the integration last wrote this state, changed or not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<DateTime<Utc>>,

    /// Context of the change that created this state
    pub context: Context,
}

impl State {
    /// Create a new state with current timestamp
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    /// Create the successor of this state
    ///
    /// `last_changed` is carried over when the state value is the same.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = new_state.into();
        let last_changed = if self.state == new_state {
            self.last_changed
        } else {
            now
        };

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed,
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    /// Copy of this state with only `last_reported` moved forward
    pub fn reported(&self) -> Self {
        Self {
            last_reported: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Whether writing `state` and `attributes` would change nothing
    pub fn same_content(
        &self,
        state: &str,
        attributes: &HashMap<String, serde_json::Value>,
    ) -> bool {
        self.state == state && &self.attributes == attributes
    }

    /// Check if the state value represents an unavailable entity
    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    /// Check if the state value represents an unknown state
    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// Get an attribute value by key
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps and context are not compared
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn price_state(value: &str) -> State {
        State::new(
            EntityId::new("sensor", "pvpc").unwrap(),
            value,
            HashMap::from([("tariff".to_string(), json!("normal"))]),
            Context::new(),
        )
    }

    #[test]
    fn test_update_keeps_last_changed_for_same_value() {
        let first = price_state("0.11516");
        std::thread::sleep(std::time::Duration::from_millis(5));

        let same = first.with_update("0.11516", HashMap::new(), Context::new());
        assert_eq!(same.last_changed, first.last_changed);
        assert!(same.last_updated > first.last_updated);

        let changed = first.with_update("0.12000", HashMap::new(), Context::new());
        assert!(changed.last_changed > first.last_changed);
    }

    #[test]
    fn test_reported_only_moves_last_reported() {
        let first = price_state("0.11516");
        std::thread::sleep(std::time::Duration::from_millis(5));

        let reported = first.reported();
        assert_eq!(reported.last_changed, first.last_changed);
        assert_eq!(reported.last_updated, first.last_updated);
        assert!(reported.last_reported > first.last_reported);
    }

    #[test]
    fn test_same_content() {
        let state = price_state("0.11516");
        let attrs = HashMap::from([("tariff".to_string(), json!("normal"))]);
        assert!(state.same_content("0.11516", &attrs));
        assert!(!state.same_content("0.2", &attrs));
        assert!(!state.same_content("0.11516", &HashMap::new()));
    }

    #[test]
    fn test_special_values_and_attribute_access() {
        assert!(price_state(STATE_UNAVAILABLE).is_unavailable());
        assert!(price_state(STATE_UNKNOWN).is_unknown());

        let state = price_state("0.1");
        assert_eq!(state.attribute::<String>("tariff").as_deref(), Some("normal"));
        assert_eq!(state.attribute::<u32>("tariff"), None);
    }
}
