//! The running instance components are set up against

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ha_config_entries::ConfigEntries;
use ha_helpers::{Clock, RestoreStateStore, Storage, StorageResult, SystemClock, TimeTracker};
use ha_state_machine::{EventBus, StateMachine};
use tracing::info;

/// The central Home Assistant instance
pub struct HomeAssistant {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// State machine for entity states
    pub states: Arc<StateMachine>,
    pub config_entries: Arc<ConfigEntries>,
    /// Last known entity states, restored on entity add
    pub restore_state: Arc<RestoreStateStore>,
    /// Time-based callbacks
    pub tracker: TimeTracker,
    /// Name of the installation, used when registering with devices
    pub location_name: String,
}

impl HomeAssistant {
    pub fn new(config_dir: impl AsRef<Path>, clock: Arc<dyn Clock>, time_zone: Tz) -> Self {
        let storage = Storage::new(config_dir);
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));

        Self {
            bus,
            states,
            config_entries: Arc::new(ConfigEntries::new(Arc::new(storage.clone()))),
            restore_state: Arc::new(RestoreStateStore::new(storage)),
            tracker: TimeTracker::new(clock, time_zone),
            location_name: "Home".to_string(),
        }
    }

    /// An instance on the system clock
    pub fn with_system_clock(config_dir: impl AsRef<Path>, time_zone: Tz) -> Self {
        Self::new(config_dir, Arc::new(SystemClock), time_zone)
    }

    pub fn with_location_name(mut self, name: impl Into<String>) -> Self {
        self.location_name = name.into();
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.tracker.now()
    }

    /// Load persisted config entries and entity states
    pub async fn start(&self) -> StorageResult<()> {
        self.config_entries.load().await?;
        self.restore_state.load().await?;
        info!("Home Assistant started in {}", self.tracker.time_zone());
        Ok(())
    }

    /// Cancel all trackers and persist entity states
    pub async fn stop(&self) -> StorageResult<()> {
        info!("Shutting down...");
        self.tracker.shutdown();
        for entity_id in self.states.all_entity_ids() {
            if let Some(state) = self.states.get(&entity_id) {
                self.restore_state.remember(state);
            }
        }
        self.restore_state.dump().await
    }
}
