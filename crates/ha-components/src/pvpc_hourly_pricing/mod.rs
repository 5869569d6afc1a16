//! Spanish regulated electricity prices (PVPC)
//!
//! Exposes the price of the current hour for a tariff as a `sensor`.
//! Sensors are configured through config entries; YAML platform config
//! is imported into one:
//!
//! ```yaml
//! sensor:
//!   - platform: pvpc_hourly_pricing
//!     name: pvpc_manual_sensor
//!     tariff: discrimination
//!     timeout: 8
//! ```

pub mod consts;
pub mod data;
pub mod sensor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ha_config_entries::{
    ConfigEntries, ConfigEntriesError, ConfigEntry, ConfigEntrySource, ConfigEntryUpdate,
    SetupError,
};
use ha_core::generate_entity_id;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use consts::DOMAIN;
pub use data::{PriceSource, PriceSourceError, Prices, PvpcData, Tariff};
pub use sensor::{ElecPriceSensor, SourceStatus};

use consts::{ATTR_TARIFF, CONF_NAME, CONF_TIMEOUT, DEFAULT_NAME, DEFAULT_TIMEOUT, PLATFORM};
use crate::HomeAssistant;

#[derive(Debug, Error)]
pub enum PvpcError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// One `pvpc_hourly_pricing` entry of the `sensor` platform config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvpcPlatformConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub tariff: Tariff,
    /// Seconds allowed for one price download
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

impl PvpcPlatformConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, PvpcError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    fn entry_data(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            (CONF_NAME.to_string(), json!(self.name)),
            (ATTR_TARIFF.to_string(), json!(self.tariff)),
            (CONF_TIMEOUT.to_string(), json!(self.timeout)),
        ])
    }
}

/// The PVPC integration and its sensors
pub struct PvpcIntegration {
    hass: Arc<HomeAssistant>,
    source: Arc<dyn PriceSource>,
    /// entry_id -> sensor
    sensors: DashMap<String, Arc<ElecPriceSensor>>,
    /// Fixed download minute; random per sensor when unset
    price_minute: Option<u32>,
}

impl PvpcIntegration {
    pub fn new(hass: Arc<HomeAssistant>, source: Arc<dyn PriceSource>) -> Arc<Self> {
        Arc::new(Self {
            hass,
            source,
            sensors: DashMap::new(),
            price_minute: None,
        })
    }

    /// Download prices at `minute` and `minute + 30` instead of a random minute
    pub fn with_price_minute(
        hass: Arc<HomeAssistant>,
        source: Arc<dyn PriceSource>,
        minute: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            hass,
            source,
            sensors: DashMap::new(),
            price_minute: Some(minute.clamp(1, 29)),
        })
    }

    /// Register setup and unload handlers for `pvpc_hourly_pricing` entries
    pub fn register(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.hass
            .config_entries
            .register_setup_handler(DOMAIN, move |entry| {
                let integration = weak.upgrade();
                async move {
                    match integration {
                        Some(integration) => integration.setup_entry(entry).await,
                        None => Err(SetupError::Failed("PVPC integration stopped".to_string())),
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
                        Some(integration) => integration.unload_entry(&entry).await,
                        None => true,
                    }
                }
            });
    }

    /// The sensor of a config entry
    pub fn sensor(&self, entry_id: &str) -> Option<Arc<ElecPriceSensor>> {
        self.sensors.get(entry_id).map(|s| s.value().clone())
    }

    /// Import a YAML platform config as a config entry and set it up
    ///
    /// Returns the entry id; a tariff that already has an entry is skipped.
    pub async fn setup_platform(&self, config: PvpcPlatformConfig) -> Result<String, PvpcError> {
        let entries = &self.hass.config_entries;
        if let Some(existing) = entries.get_by_unique_id(DOMAIN, config.tariff.as_str()) {
            debug!(
                "Tariff '{}' already configured as '{}'",
                config.tariff, existing.title
            );
            return Ok(existing.entry_id);
        }

        let entry = ConfigEntry::new(DOMAIN, config.name.clone())
            .with_source(ConfigEntrySource::Import)
            .with_unique_id(config.tariff.as_str())
            .with_data(config.entry_data());
        let entry = entries.add(entry).await?;
        info!("Imported PVPC sensor '{}' ({})", config.name, config.tariff);

        entries.setup(&entry.entry_id).await?;
        Ok(entry.entry_id)
    }

    async fn setup_entry(&self, entry: ConfigEntry) -> Result<(), SetupError> {
        let tariff: Tariff = entry
            .data_str(ATTR_TARIFF)
            .unwrap_or_default()
            .parse()
            .map_err(|err| SetupError::Failed(format!("{}", err)))?;
        let name = entry.data_str(CONF_NAME).unwrap_or(DEFAULT_NAME).to_string();
        let timeout = entry.data_u64(CONF_TIMEOUT).unwrap_or(DEFAULT_TIMEOUT);

        let entries = Arc::downgrade(&self.hass.config_entries);
        self.hass
            .config_entries
            .add_update_listener(&entry.entry_id, move |entry| {
                let entries = entries.upgrade();
                async move {
                    if let Some(entries) = entries {
                        update_listener(entries, entry).await;
                    }
                }
            });

        let entity_id = generate_entity_id(PLATFORM, &name, |candidate| {
            self.hass.states.contains(candidate)
                || self
                    .sensors
                    .iter()
                    .any(|s| s.value().entity_id().to_string() == candidate)
        })
        .map_err(|err| SetupError::Failed(err.to_string()))?;

        let data = PvpcData::new(
            tariff,
            self.source.clone(),
            self.hass.tracker.time_zone(),
            Duration::from_secs(timeout),
        );
        let price_minute = self.price_minute.unwrap_or_else(random_price_minute);
        let sensor = ElecPriceSensor::new(self.hass.clone(), entity_id, name, data, price_minute);

        self.sensors.insert(entry.entry_id.clone(), sensor.clone());
        sensor.added_to_hass().await;
        Ok(())
    }

    async fn unload_entry(&self, entry: &ConfigEntry) -> bool {
        if let Some((_, sensor)) = self.sensors.remove(&entry.entry_id) {
            sensor.removed_from_hass().await;
        }
        true
    }
}

fn random_price_minute() -> u32 {
    rand::thread_rng().gen_range(1..=29)
}

/// Apply a tariff chosen in the options and reload the entry
async fn update_listener(entries: Arc<ConfigEntries>, entry: ConfigEntry) {
    let Some(tariff) = entry.option_str(ATTR_TARIFF) else {
        return;
    };
    if entry.data_str(ATTR_TARIFF) == Some(tariff) {
        return;
    }

    let mut data = entry.data.clone();
    data.insert(ATTR_TARIFF.to_string(), json!(tariff));
    if let Err(err) = entries
        .update(&entry.entry_id, ConfigEntryUpdate::new().data(data))
        .await
    {
        warn!("Could not change tariff of {}: {}", entry.title, err);
        return;
    }
    if let Err(err) = entries.reload(&entry.entry_id).await {
        warn!("Could not reload {} with tariff {}: {}", entry.title, tariff, err);
    }
}
