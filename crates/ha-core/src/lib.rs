//! Core types for Home Assistant
//!
//! This crate provides the fundamental types the components are written
//! against: EntityId, State, Event and Context, plus the entity id
//! generation rules used when an integration adds a new entity.

mod context;
mod entity_id;
mod event;
mod state;

pub use context::Context;
pub use entity_id::{generate_entity_id, slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use state::State;

/// Maximum length for a state value (matches Python HA)
pub const MAX_STATE_LENGTH: usize = 255;

/// State value used when the entity has no state, or its state is too long
pub const STATE_UNKNOWN: &str = "unknown";

/// State value used when the entity (or its data source) is not available
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// Well-known state attribute names
pub mod attrs {
    pub const FRIENDLY_NAME: &str = "friendly_name";
    pub const ICON: &str = "icon";
    pub const UNIT_OF_MEASUREMENT: &str = "unit_of_measurement";
}

/// Standard event types fired by the state machine
pub mod events {
    use super::*;
    use chrono::{DateTime, Utc};

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for state reported (unchanged state was written)
    pub const STATE_REPORTED: &str = "state_reported";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for STATE_REPORTED events (when state is unchanged but reported)
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub old_last_reported: Option<DateTime<Utc>>,
        pub last_reported: DateTime<Utc>,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }
}
