//! The electricity price sensor
//!
//! State is refreshed at the top of every hour from prices already
//! downloaded. Prices are downloaded twice an hour, at a random minute so
//! installations do not hit the API together. Failed downloads are retried
//! after three times the timeout; after three failures in a row the source
//! is given up until a regular download succeeds again.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use ha_core::{Context, EntityId};
use ha_helpers::{action, write_state, Action, Entity, TimePattern, Unsubscribe};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::consts::{DOMAIN, ICON, MAX_RETRIES, PLATFORM, UNIT};
use super::data::{PvpcData, Tariff};
use crate::HomeAssistant;

/// Where the sensor stands with its price source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Available,
    /// The last `attempt` downloads came back empty; a retry is pending
    Retrying { attempt: u32 },
    /// Waiting for the next regular download
    GivenUp,
}

struct SensorCore {
    entity_id: EntityId,
    name: String,
    data: PvpcData,
    num_retries: u32,
    init_done: bool,
    removed: bool,
    hourly_tracker: Option<Unsubscribe>,
    price_tracker: Option<Unsubscribe>,
    retry_tracker: Option<Unsubscribe>,
    refresh_tracker: Option<Unsubscribe>,
}

impl SensorCore {
    fn trackers(&self) -> impl Iterator<Item = &Unsubscribe> {
        [
            &self.hourly_tracker,
            &self.price_tracker,
            &self.retry_tracker,
            &self.refresh_tracker,
        ]
        .into_iter()
        .flatten()
    }
}

impl Entity for SensorCore {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn unique_id(&self) -> Option<String> {
        Some(format!("{}_{}_{}", DOMAIN, PLATFORM, self.entity_id))
    }

    fn icon(&self) -> Option<&str> {
        Some(ICON)
    }

    fn unit_of_measurement(&self) -> Option<&str> {
        Some(UNIT)
    }

    fn state(&self) -> Option<String> {
        self.data.state.clone()
    }

    fn device_state_attributes(&self) -> HashMap<String, Value> {
        self.data.attributes.clone()
    }

    fn available(&self) -> bool {
        self.data.state_available
    }
}

/// Price of the current hour for one tariff
pub struct ElecPriceSensor {
    hass: Arc<HomeAssistant>,
    weak: Weak<Self>,
    entity_id: EntityId,
    /// Minute of the first of the two hourly downloads, in 1..=29
    price_minute: u32,
    core: Mutex<SensorCore>,
}

impl ElecPriceSensor {
    pub fn new(
        hass: Arc<HomeAssistant>,
        entity_id: EntityId,
        name: impl Into<String>,
        data: PvpcData,
        price_minute: u32,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            hass,
            weak: weak.clone(),
            entity_id: entity_id.clone(),
            price_minute,
            core: Mutex::new(SensorCore {
                entity_id,
                name: name.into(),
                data,
                num_retries: 0,
                init_done: false,
                removed: false,
                hourly_tracker: None,
                price_tracker: None,
                retry_tracker: None,
                refresh_tracker: None,
            }),
        })
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn price_minutes(&self) -> [u32; 2] {
        [self.price_minute, self.price_minute + 30]
    }

    pub async fn unique_id(&self) -> Option<String> {
        self.core.lock().await.unique_id()
    }

    pub async fn tariff(&self) -> Tariff {
        self.core.lock().await.data.tariff()
    }

    pub async fn state(&self) -> Option<String> {
        self.core.lock().await.data.state.clone()
    }

    pub async fn attributes(&self) -> HashMap<String, Value> {
        self.core.lock().await.data.attributes.clone()
    }

    pub async fn num_retries(&self) -> u32 {
        self.core.lock().await.num_retries
    }

    pub async fn status(&self) -> SourceStatus {
        let core = self.core.lock().await;
        if !core.data.source_available {
            SourceStatus::GivenUp
        } else if core.num_retries > 0 {
            SourceStatus::Retrying {
                attempt: core.num_retries,
            }
        } else {
            SourceStatus::Available
        }
    }

    /// Restore the last state, start the trackers and fetch prices
    pub async fn added_to_hass(&self) {
        let mut core = self.core.lock().await;

        if let Some(last) = self.hass.restore_state.last_state(&self.entity_id.to_string()) {
            core.data.state = Some(last.state);
        }

        let tracker = &self.hass.tracker;
        core.hourly_tracker = Some(tracker.track_time_change(
            TimePattern::new().minutes([0]).seconds([0]),
            self.update_action(),
        ));
        let price_minutes = self.price_minutes();
        core.price_tracker = Some(tracker.track_time_change(
            TimePattern::new().minutes(price_minutes).seconds([0]),
            self.update_prices_action(),
        ));
        debug!(
            "Setup of price sensor {} ({}) with tariff '{}', updating prices each hour at {:?} min",
            core.name,
            self.entity_id,
            core.data.tariff(),
            price_minutes
        );

        self.update_prices_locked(&mut core, self.hass.now()).await;
        core.init_done = true;
        let now = self.hass.now();
        self.update_locked(&mut core, now).await;
    }

    /// Recompute the state for the current hour
    pub async fn update(&self) {
        self.update_at(self.hass.now()).await;
    }

    /// Recompute the state for the hour of `now`
    pub async fn update_at(&self, now: DateTime<Utc>) {
        let mut core = self.core.lock().await;
        self.update_locked(&mut core, now).await;
    }

    async fn update_locked(&self, core: &mut SensorCore, now: DateTime<Utc>) {
        if !core.init_done || core.removed {
            return;
        }

        if core.data.process_state_and_attributes(now) {
            self.write(core);
            return;
        }

        core.data.state_available = false;
        self.write(core);

        if core.data.source_available {
            debug!(
                "[{}]: Downloading prices as there are no valid ones",
                self.entity_id
            );
            let when =
                self.hass.now() + chrono::Duration::seconds(core.data.timeout().as_secs() as i64);
            let refresh = self.hass.tracker.track_point_in_time(when, self.update_action());
            if let Some(previous) = core.refresh_tracker.replace(refresh) {
                previous.cancel();
            }
        }
        self.update_prices_locked(core, now).await;
    }

    /// Download prices, retrying a few times when nothing comes back
    pub async fn update_prices(&self, now: DateTime<Utc>) {
        let mut core = self.core.lock().await;
        if core.removed {
            return;
        }
        self.update_prices_locked(&mut core, now).await;
    }

    async fn update_prices_locked(&self, core: &mut SensorCore, now: DateTime<Utc>) {
        let prices = core.data.update_prices(now).await;

        if prices.is_empty() && core.data.source_available {
            core.num_retries += 1;
            if core.num_retries > MAX_RETRIES {
                warn!("Repeated bad data update, mark component as unavailable source");
                core.data.source_available = false;
                return;
            }

            let retry_delay = core.data.timeout() * 3;
            debug!(
                "Bad update[retry:{}], will try again in {} s",
                core.num_retries,
                retry_delay.as_secs()
            );
            let when = self.hass.now() + chrono::Duration::seconds(retry_delay.as_secs() as i64);
            let retry = self
                .hass
                .tracker
                .track_point_in_time(when, self.update_prices_action());
            if let Some(previous) = core.retry_tracker.replace(retry) {
                previous.cancel();
            }
            return;
        }

        if prices.is_empty() {
            debug!("Data source unavailable since {}", self.last_changed());
            return;
        }

        core.num_retries = 0;
        if !core.data.source_available {
            core.data.source_available = true;
            warn!(
                "Component has recovered data access. Was unavailable since {}",
                self.last_changed()
            );
            self.schedule_update();
        }
    }

    /// Stop the trackers and keep the last state for the next setup
    pub async fn removed_from_hass(&self) {
        let mut core = self.core.lock().await;
        for tracker in core.trackers() {
            tracker.cancel();
        }
        core.removed = true;

        let entity_id = self.entity_id.to_string();
        if let Some(state) = self.hass.states.get(&entity_id) {
            self.hass.restore_state.remember(state);
        }
        self.hass.states.remove(&self.entity_id, Context::new());
        debug!("Removed price sensor {}", entity_id);
    }

    fn write(&self, core: &SensorCore) {
        write_state(core, &self.hass.states, Context::new());
    }

    fn last_changed(&self) -> String {
        self.hass
            .states
            .last_changed(&self.entity_id.to_string())
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    }

    fn update_action(&self) -> Action {
        let weak = self.weak.clone();
        action(move |when| {
            let sensor = weak.upgrade();
            async move {
                if let Some(sensor) = sensor {
                    // Never before the hour the tracker fired for
                    let now = sensor.hass.now().max(when);
                    sensor.update_at(now).await;
                }
            }
        })
    }

    fn update_prices_action(&self) -> Action {
        let weak = self.weak.clone();
        action(move |when| {
            let sensor = weak.upgrade();
            async move {
                if let Some(sensor) = sensor {
                    sensor.update_prices(when).await;
                }
            }
        })
    }

    /// Refresh the state once the current callback has released the sensor
    fn schedule_update(&self) {
        if let Some(sensor) = self.weak.upgrade() {
            tokio::spawn(async move { sensor.update().await });
        }
    }
}
