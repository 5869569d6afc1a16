//! Hue remotes: dimmer switches, smart buttons, taps and dials
//!
//! A remote's state is the label of the last button (or dial) event the
//! bridge reported. Which table translates the vendor event code depends on
//! the sensor type and the first characters of the model id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;

use ha_core::EntityId;
use ha_helpers::Entity;
use serde_json::{json, Value};
use tracing::warn;

use super::api::{HueSensor, TYPE_ZGP_SWITCH, TYPE_ZLL_ROTARY, TYPE_ZLL_SWITCH};
use super::sensor_base::{SensorCoordinator, SensorManager};

/// Entity domain of Hue remotes
pub const PLATFORM: &str = "remote";

/// Scan interval once remotes exist, so every button press is seen
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Shown in attributes when the last event code is unknown
pub const NO_DATA: &str = "No data";

/// Icons by the first three characters of the model id
pub const REMOTE_ICONS: &[(&str, &str)] = &[
    ("RWL", "mdi:remote"),
    ("ROM", "mdi:remote"),
    ("ZGP", "mdi:remote"),
    ("FOH", "mdi:light-switch"),
    ("Z3-", "mdi:light-switch"),
];

// =============================================================================
// Event code tables
// =============================================================================

/// Friends of Hue switches
pub const FOH_BUTTONS: &[(i64, &str)] = &[
    (16, "left_upper_press"),
    (20, "left_upper_release"),
    (17, "left_lower_press"),
    (21, "left_lower_release"),
    (18, "right_lower_press"),
    (22, "right_lower_release"),
    (19, "right_upper_press"),
    (23, "right_upper_release"),
    (100, "double_upper_press"),
    (101, "double_upper_release"),
    (98, "double_lower_press"),
    (99, "double_lower_release"),
];

/// Hue dimmer switch: `<button>00<event>`
pub const RWL_BUTTONS: &[(i64, &str)] = &[
    (1000, "1_click"),
    (2000, "2_click"),
    (3000, "3_click"),
    (4000, "4_click"),
    (1001, "1_hold"),
    (2001, "2_hold"),
    (3001, "3_hold"),
    (4001, "4_hold"),
    (1002, "1_click_up"),
    (2002, "2_click_up"),
    (3002, "3_click_up"),
    (4002, "4_click_up"),
    (1003, "1_hold_up"),
    (2003, "2_hold_up"),
    (3003, "3_hold_up"),
    (4003, "4_hold_up"),
];

/// Hue tap
pub const TAP_BUTTONS: &[(i64, &str)] = &[
    (34, "1_click"),
    (16, "2_click"),
    (17, "3_click"),
    (18, "4_click"),
];

/// Smart button and Lutron Aurora button
pub const Z3_BUTTON: &[(i64, &str)] = &[
    (1000, "initial_press"),
    (1001, "repeat"),
    (1002, "short_release"),
    (1003, "long_release"),
];

/// Lutron Aurora dial
pub const Z3_DIAL: &[(i64, &str)] = &[(1, "begin"), (2, "end")];

/// Label for `code` in `table`
pub fn lookup(table: &[(i64, &'static str)], code: i64) -> Option<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, label)| *label)
}

/// Icon for a remote model
pub fn remote_icon(modelid: &str) -> Option<&'static str> {
    let prefix = modelid.get(..3)?;
    REMOTE_ICONS
        .iter()
        .find(|(model, _)| *model == prefix)
        .map(|(_, icon)| *icon)
}

/// The kinds of Hue sensors exposed as remotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteKind {
    /// RWL021 dimmer switch, ROM001 smart button, Z3-1BRL Aurora button
    ZllSwitch,
    /// ZGPSWITCH tap, FOHSWITCH Friends of Hue switch
    ZgpSwitch,
    /// Z3-1BRL Aurora dial
    ZllRelativeRotary,
}

impl RemoteKind {
    pub fn from_sensor_type(sensor_type: &str) -> Option<Self> {
        match sensor_type {
            TYPE_ZLL_SWITCH => Some(RemoteKind::ZllSwitch),
            TYPE_ZGP_SWITCH => Some(RemoteKind::ZgpSwitch),
            TYPE_ZLL_ROTARY => Some(RemoteKind::ZllRelativeRotary),
            _ => None,
        }
    }

    pub fn sensor_type(&self) -> &'static str {
        match self {
            RemoteKind::ZllSwitch => TYPE_ZLL_SWITCH,
            RemoteKind::ZgpSwitch => TYPE_ZGP_SWITCH,
            RemoteKind::ZllRelativeRotary => TYPE_ZLL_ROTARY,
        }
    }

    /// Event code table for a model of this kind
    pub fn table(&self, modelid: &str) -> &'static [(i64, &'static str)] {
        match self {
            RemoteKind::ZllSwitch if modelid.starts_with("RWL") => RWL_BUTTONS,
            RemoteKind::ZllSwitch => Z3_BUTTON,
            RemoteKind::ZgpSwitch if modelid.starts_with("FOH") => FOH_BUTTONS,
            RemoteKind::ZgpSwitch => TAP_BUTTONS,
            RemoteKind::ZllRelativeRotary => Z3_DIAL,
        }
    }

    /// Label of the sensor's last event, `None` when there is no known event
    pub fn label(&self, sensor: &HueSensor) -> Option<&'static str> {
        let code = match self {
            RemoteKind::ZllRelativeRotary => sensor.rotary_event(),
            _ => sensor.button_event(),
        }?;
        lookup(self.table(&sensor.modelid), code)
    }
}

/// `2020-03-21T10:15:02` as `["2020-03-21", "10:15:02"]`
fn split_timestamp(timestamp: Option<&str>) -> Value {
    match timestamp {
        Some(timestamp) => json!(timestamp.split('T').collect::<Vec<_>>()),
        None => Value::Null,
    }
}

// =============================================================================
// Entity
// =============================================================================

/// A Hue remote entity
pub struct HueRemote {
    entity_id: EntityId,
    kind: RemoteKind,
    sensor: RwLock<HueSensor>,
    coordinator: Arc<SensorCoordinator>,
    allow_unreachable: bool,
}

impl HueRemote {
    pub fn new(
        entity_id: EntityId,
        kind: RemoteKind,
        sensor: HueSensor,
        coordinator: Arc<SensorCoordinator>,
        allow_unreachable: bool,
    ) -> Self {
        Self {
            entity_id,
            kind,
            sensor: RwLock::new(sensor),
            coordinator,
            allow_unreachable,
        }
    }

    pub fn kind(&self) -> RemoteKind {
        self.kind
    }

    /// Latest snapshot of the bridge sensor
    pub fn sensor(&self) -> HueSensor {
        self.read().clone()
    }

    pub(crate) fn update_sensor(&self, sensor: HueSensor) {
        match self.sensor.write() {
            Ok(mut current) => *current = sensor,
            Err(poisoned) => *poisoned.into_inner() = sensor,
        }
    }

    /// Remotes cannot be switched; accepted and ignored
    pub fn turn_on(&self) {}

    /// Remotes cannot be switched; accepted and ignored
    pub fn turn_off(&self) {}

    fn read(&self) -> RwLockReadGuard<'_, HueSensor> {
        match self.sensor.read() {
            Ok(sensor) => sensor,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn switch_attributes(&self, sensor: &HueSensor, label: &str) -> HashMap<String, Value> {
        let mut attributes = HashMap::from([
            ("model".to_string(), json!(sensor.sensor_type)),
            ("last_button_event".to_string(), json!(label)),
            ("last_updated".to_string(), split_timestamp(sensor.last_updated())),
        ]);
        if sensor.has_battery() {
            attributes.insert("on".to_string(), json!(sensor.on()));
            attributes.insert("reachable".to_string(), json!(sensor.reachable()));
            attributes.insert("battery_level".to_string(), json!(sensor.battery()));
        }
        attributes
    }

    fn dial_attributes(&self, sensor: &HueSensor, label: &str) -> HashMap<String, Value> {
        let config = |key: &str| sensor.config.get(key).cloned().unwrap_or(Value::Null);
        HashMap::from([
            ("model".to_string(), json!(sensor.sensor_type)),
            ("dial_state".to_string(), json!(label)),
            ("dial_position".to_string(), sensor.expected_rotation()),
            ("last_button_event".to_string(), json!(label)),
            ("last_updated".to_string(), split_timestamp(sensor.last_updated())),
            ("name".to_string(), json!(sensor.name)),
            ("on".to_string(), config("on")),
            ("reachable".to_string(), config("reachable")),
            ("battery_level".to_string(), config("battery")),
            ("software_update".to_string(), json!(sensor.software_update_state())),
        ])
    }
}

impl Entity for HueRemote {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    fn name(&self) -> Option<String> {
        Some(self.read().name.clone())
    }

    fn unique_id(&self) -> Option<String> {
        self.read().uniqueid.clone()
    }

    fn icon(&self) -> Option<&str> {
        remote_icon(&self.read().modelid)
    }

    fn state(&self) -> Option<String> {
        self.kind.label(&self.read()).map(str::to_string)
    }

    fn device_state_attributes(&self) -> HashMap<String, Value> {
        let sensor = self.read();
        let label = self.kind.label(&sensor).unwrap_or(NO_DATA);
        match self.kind {
            RemoteKind::ZllRelativeRotary => self.dial_attributes(&sensor, label),
            _ => self.switch_attributes(&sensor, label),
        }
    }

    fn available(&self) -> bool {
        self.coordinator.last_update_success()
            && (self.allow_unreachable || self.read().reachable())
    }

    /// Every poll is written so repeated presses of one button show up
    fn force_update(&self) -> bool {
        true
    }
}

// =============================================================================
// Platform
// =============================================================================

/// Set up the remote platform of a bridge
pub async fn setup_entry(manager: &Arc<SensorManager>) {
    let coordinator = manager.coordinator().clone();
    let add_entities = Arc::new(move |new_entities: &[Arc<HueRemote>]| {
        speed_up_polling(&coordinator, new_entities.len());
    });
    manager.register_component(PLATFORM, add_entities).await;
}

/// Poll at 2Hz once remotes are present
fn speed_up_polling(coordinator: &SensorCoordinator, added: usize) {
    if coordinator.update_interval() > Duration::from_secs(1) {
        coordinator.set_update_interval(DEFAULT_SCAN_INTERVAL);
        warn!(
            "Added {} remotes, bridge scan frequency is now of 1Hz",
            added
        );
    }
}
