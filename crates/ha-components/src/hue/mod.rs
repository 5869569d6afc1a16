//! Philips Hue
//!
//! One [`HueBridge`] per config entry. The bridge's sensors are polled by a
//! [`SensorManager`]; dimmer switches, taps, smart buttons and dials among
//! them become [`HueRemote`] entities when the `add_hue_remotes` option is
//! set.

pub mod api;
pub mod bridge;
pub mod consts;
pub mod errors;
pub mod remote;
pub mod sensor_base;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ha_config_entries::{ConfigEntry, ConfigEntryUpdate, SetupError};
use serde_json::{json, Value};
use tracing::{debug, warn};

pub use api::{BridgeConfig, HueBridgeApi, HueSensor};
pub use bridge::HueBridge;
pub use consts::DOMAIN;
pub use errors::{HueApiError, HueSetupError};
pub use remote::{HueRemote, RemoteKind};
pub use sensor_base::{SensorCoordinator, SensorManager};

use consts::{
    CONF_ALLOW_HUE_GROUPS, CONF_ALLOW_UNREACHABLE, CONF_INCLUDE_HUE_REMOTES,
    CONF_INCLUDE_HUE_SENSORS, DEFAULT_ALLOW_HUE_GROUPS, DEFAULT_ALLOW_UNREACHABLE,
    DEFAULT_INCLUDE_HUE_REMOTES, DEFAULT_INCLUDE_HUE_SENSORS,
};
use crate::HomeAssistant;

/// Builds the bridge client for a config entry
pub type HueApiFactory = Arc<dyn Fn(&ConfigEntry) -> Arc<dyn HueBridgeApi> + Send + Sync>;

/// The Hue integration and its set up bridges
pub struct HueIntegration {
    hass: Arc<HomeAssistant>,
    api_factory: HueApiFactory,
    bridges: DashMap<String, Arc<HueBridge>>,
}

impl HueIntegration {
    pub fn new(
        hass: Arc<HomeAssistant>,
        api_factory: impl Fn(&ConfigEntry) -> Arc<dyn HueBridgeApi> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            hass,
            api_factory: Arc::new(api_factory),
            bridges: DashMap::new(),
        })
    }

    /// Register setup and unload handlers for `hue` config entries
    pub fn register(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.hass
            .config_entries
            .register_setup_handler(DOMAIN, move |entry| {
                let integration = weak.upgrade();
                async move {
                    match integration {
                        Some(integration) => integration.setup_entry(entry).await,
                        None => Err(SetupError::Failed("Hue integration stopped".to_string())),
                    }
                }
            });

        let weak = Arc::downgrade(self);
        self.hass
            .config_entries
            .register_unload_handler(DOMAIN, move |entry| {
                let integration = weak.upgrade();
                async move {
                    match integration {
                        Some(integration) => integration.unload_entry(&entry),
                        None => true,
                    }
                }
            });
    }

    /// The bridge set up for a config entry
    pub fn bridge(&self, entry_id: &str) -> Option<Arc<HueBridge>> {
        self.bridges.get(entry_id).map(|b| b.value().clone())
    }

    async fn setup_entry(&self, entry: ConfigEntry) -> Result<(), SetupError> {
        let entry = self.apply_default_options(entry).await;

        let api = (self.api_factory)(&entry);
        let bridge = HueBridge::new(self.hass.clone(), entry.clone(), api);
        bridge.setup().await?;

        self.bridges.insert(entry.entry_id.clone(), bridge);
        Ok(())
    }

    fn unload_entry(&self, entry: &ConfigEntry) -> bool {
        match self.bridges.remove(&entry.entry_id) {
            Some((_, bridge)) => bridge.reset(),
            None => true,
        }
    }

    /// Fill unset options from the entry data, falling back to defaults
    async fn apply_default_options(&self, entry: ConfigEntry) -> ConfigEntry {
        let defaults = [
            (CONF_ALLOW_UNREACHABLE, DEFAULT_ALLOW_UNREACHABLE),
            (CONF_ALLOW_HUE_GROUPS, DEFAULT_ALLOW_HUE_GROUPS),
            (CONF_INCLUDE_HUE_SENSORS, DEFAULT_INCLUDE_HUE_SENSORS),
            (CONF_INCLUDE_HUE_REMOTES, DEFAULT_INCLUDE_HUE_REMOTES),
        ];

        let mut options: HashMap<String, Value> = entry.options.clone();
        for (key, default) in defaults {
            if !options.contains_key(key) {
                let value = entry.data.get(key).cloned().unwrap_or(json!(default));
                options.insert(key.to_string(), value);
            }
        }
        if options == entry.options {
            return entry;
        }

        debug!("Applying default options to Hue entry {}", entry.title);
        match self
            .hass
            .config_entries
            .update(&entry.entry_id, ConfigEntryUpdate::new().options(options.clone()))
            .await
        {
            Ok(updated) => updated,
            Err(err) => {
                warn!("Could not store options of Hue entry {}: {}", entry.title, err);
                ConfigEntry { options, ..entry }
            }
        }
    }
}
