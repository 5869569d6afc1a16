//! Polling of bridge sensors shared by the sensor-backed platforms

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use ha_core::{generate_entity_id, Context};
use ha_helpers::{write_state, DataUpdateCoordinator, Entity, UpdateFailed};
use tracing::{debug, info, warn};

use super::api::HueSensor;
use super::bridge::HueBridge;
use super::errors::HueApiError;
use super::remote::{HueRemote, RemoteKind, PLATFORM as REMOTE_PLATFORM};
use crate::HomeAssistant;

/// Default polling interval of bridge sensors
pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Time allowed for one sensor poll, retries included
pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(4);

pub type SensorCoordinator = DataUpdateCoordinator<HashMap<String, HueSensor>>;

/// Called with the entities a platform gained in one poll
pub type AddEntities = Arc<dyn Fn(&[Arc<HueRemote>]) + Send + Sync>;

/// Keeps the sensor-backed entities of one bridge in sync with the bridge
pub struct SensorManager {
    bridge: Weak<HueBridge>,
    hass: Arc<HomeAssistant>,
    allow_unreachable: bool,
    coordinator: Arc<SensorCoordinator>,
    component_add_entities: DashMap<String, AddEntities>,
    /// Known remotes by bridge `uniqueid`
    current: DashMap<String, Arc<HueRemote>>,
}

impl SensorManager {
    pub fn new(bridge: &Arc<HueBridge>) -> Arc<Self> {
        let weak_bridge = Arc::downgrade(bridge);
        let coordinator = Arc::new(DataUpdateCoordinator::new("sensor", SCAN_INTERVAL, move || {
            let bridge = weak_bridge.upgrade();
            async move {
                match bridge {
                    Some(bridge) => update_data(bridge).await,
                    None => Err(UpdateFailed::new("Hue bridge was removed")),
                }
            }
        }));

        Arc::new(Self {
            bridge: Arc::downgrade(bridge),
            hass: bridge.hass().clone(),
            allow_unreachable: bridge.allow_unreachable(),
            coordinator,
            component_add_entities: DashMap::new(),
            current: DashMap::new(),
        })
    }

    pub fn coordinator(&self) -> &Arc<SensorCoordinator> {
        &self.coordinator
    }

    /// All remotes created so far
    pub fn remotes(&self) -> Vec<Arc<HueRemote>> {
        let mut remotes: Vec<_> = self.current.iter().map(|r| r.value().clone()).collect();
        remotes.sort_by(|a, b| a.entity_id().cmp(b.entity_id()));
        remotes
    }

    /// The remote for a bridge sensor `uniqueid`
    pub fn remote(&self, uniqueid: &str) -> Option<Arc<HueRemote>> {
        self.current.get(uniqueid).map(|r| r.value().clone())
    }

    /// Register a platform and start polling the bridge
    pub async fn register_component(self: &Arc<Self>, platform: &str, add_entities: AddEntities) {
        self.component_add_entities
            .insert(platform.to_string(), add_entities);

        let weak = Arc::downgrade(self);
        let listener = self.coordinator.add_listener(move || {
            if let Some(manager) = weak.upgrade() {
                manager.update_items();
            }
        });

        self.coordinator.refresh().await;
        let polling = self.coordinator.start();

        let coordinator = self.coordinator.clone();
        if let Some(bridge) = self.bridge.upgrade() {
            bridge.add_reset_job(Box::new(move || {
                polling.cancel();
                coordinator.remove_listener(listener);
            }));
        } else {
            polling.cancel();
        }
        debug!("Registered Hue {} platform", platform);
    }

    /// Add entities for new remotes and write the state of all of them
    fn update_items(&self) {
        if let Some(sensors) = self.coordinator.data() {
            let new_remotes = self.discover_remotes(&sensors);
            if !new_remotes.is_empty() {
                info!("Adding {} Hue remotes", new_remotes.len());
                let add_entities = self
                    .component_add_entities
                    .get(REMOTE_PLATFORM)
                    .map(|add| add.clone());
                if let Some(add_entities) = add_entities {
                    add_entities(&new_remotes);
                }
            }
        }

        // One poll, one context
        let context = Context::new();
        for remote in self.remotes() {
            write_state(remote.as_ref(), &self.hass.states, context.clone());
        }
    }

    fn discover_remotes(&self, sensors: &HashMap<String, HueSensor>) -> Vec<Arc<HueRemote>> {
        let mut ids: Vec<&String> = sensors.keys().collect();
        ids.sort();

        let mut new_remotes: Vec<Arc<HueRemote>> = Vec::new();
        for id in ids {
            let sensor = &sensors[id];
            let Some(kind) = RemoteKind::from_sensor_type(&sensor.sensor_type) else {
                continue;
            };
            let Some(uniqueid) = sensor.uniqueid.clone() else {
                debug!("Skipping Hue {} sensor {} without uniqueid", sensor.sensor_type, id);
                continue;
            };

            if let Some(existing) = self.current.get(&uniqueid) {
                existing.update_sensor(sensor.clone());
                continue;
            }

            let taken = |entity_id: &str| {
                self.hass.states.contains(entity_id)
                    || self
                        .current
                        .iter()
                        .any(|r| r.value().entity_id().to_string() == entity_id)
                    || new_remotes
                        .iter()
                        .any(|r| r.entity_id().to_string() == entity_id)
            };
            let entity_id = match generate_entity_id(REMOTE_PLATFORM, &sensor.name, taken) {
                Ok(entity_id) => entity_id,
                Err(err) => {
                    warn!("Cannot add Hue remote '{}': {}", sensor.name, err);
                    continue;
                }
            };

            let remote = Arc::new(HueRemote::new(
                entity_id,
                kind,
                sensor.clone(),
                self.coordinator.clone(),
                self.allow_unreachable,
            ));
            self.current.insert(uniqueid, remote.clone());
            new_remotes.push(remote);
        }
        new_remotes
    }

    /// Remove every entity of this bridge from the state machine
    pub fn remove_entities(&self) {
        for remote in self.remotes() {
            self.hass.states.remove(remote.entity_id(), Context::new());
        }
        self.current.clear();
    }
}

async fn update_data(bridge: Arc<HueBridge>) -> Result<HashMap<String, HueSensor>, UpdateFailed> {
    let api = bridge.api().clone();
    let request = bridge.request_call(|| {
        let api = api.clone();
        async move { api.sensors().await }
    });

    match tokio::time::timeout(UPDATE_TIMEOUT, request).await {
        Ok(Ok(sensors)) => Ok(sensors),
        Ok(Err(HueApiError::Unauthorized)) => {
            bridge.handle_unauthorized_error();
            Err(UpdateFailed::new("Unauthorized"))
        }
        Ok(Err(err)) => Err(UpdateFailed::new(format!("Hue error: {}", err))),
        Err(_) => Err(UpdateFailed::new("Timeout fetching sensor data")),
    }
}
