//! Hue bridge data model and client seam

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::errors::HueApiError;

/// Sensor type of dimmer switches, smart buttons and Lutron Aurora buttons
pub const TYPE_ZLL_SWITCH: &str = "ZLLSwitch";
/// Sensor type of Hue tap and Friends of Hue switches
pub const TYPE_ZGP_SWITCH: &str = "ZGPSwitch";
/// Sensor type of the Lutron Aurora dial
pub const TYPE_ZLL_ROTARY: &str = "ZLLRelativeRotary";

/// Bridge configuration returned on initialization
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub name: String,
    pub modelid: String,
    #[serde(default)]
    pub bridgeid: Option<String>,
    #[serde(default)]
    pub swversion: Option<String>,
}

/// A sensor as reported by the bridge v1 API (`GET /api/<user>/sensors`)
#[derive(Debug, Clone, Deserialize)]
pub struct HueSensor {
    /// Key of the sensor in the bridge's sensor list
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    #[serde(default)]
    pub modelid: String,
    #[serde(default)]
    pub manufacturername: String,
    #[serde(default)]
    pub uniqueid: Option<String>,
    #[serde(default)]
    pub swversion: Option<String>,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// The complete payload
    #[serde(skip)]
    pub raw: Value,
}

impl HueSensor {
    /// Parse one entry of the bridge's sensor list
    pub fn from_raw(id: impl Into<String>, raw: Value) -> Result<Self, serde_json::Error> {
        let mut sensor: HueSensor = serde_json::from_value(raw.clone())?;
        sensor.id = id.into();
        sensor.raw = raw;
        Ok(sensor)
    }

    /// Parse the full `sensors` object keyed by sensor id
    pub fn parse_all(raw: Value) -> Result<HashMap<String, HueSensor>, serde_json::Error> {
        let entries: HashMap<String, Value> = serde_json::from_value(raw)?;
        entries
            .into_iter()
            .map(|(id, value)| HueSensor::from_raw(id.clone(), value).map(|s| (id, s)))
            .collect()
    }

    pub fn button_event(&self) -> Option<i64> {
        self.state.get("buttonevent").and_then(Value::as_i64)
    }

    pub fn rotary_event(&self) -> Option<i64> {
        self.state.get("rotaryevent").and_then(Value::as_i64)
    }

    /// Rotation of the last dial turn, as reported
    pub fn expected_rotation(&self) -> Value {
        self.state
            .get("expectedrotation")
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Vendor timestamp of the last event, e.g. `2020-03-21T10:15:02`
    pub fn last_updated(&self) -> Option<&str> {
        self.state.get("lastupdated").and_then(Value::as_str)
    }

    /// Whether the sensor reports a battery level at all
    pub fn has_battery(&self) -> bool {
        self.config.contains_key("battery")
    }

    pub fn battery(&self) -> Option<u64> {
        self.config.get("battery").and_then(Value::as_u64)
    }

    pub fn on(&self) -> Option<bool> {
        self.config.get("on").and_then(Value::as_bool)
    }

    /// Switches without reachability reporting (Hue tap) count as reachable
    pub fn reachable(&self) -> bool {
        self.config
            .get("reachable")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn software_update_state(&self) -> Option<&str> {
        self.raw
            .get("swupdate")
            .and_then(|swupdate| swupdate.get("state"))
            .and_then(Value::as_str)
    }
}

/// Client for one Hue bridge
#[async_trait]
pub trait HueBridgeApi: Send + Sync {
    fn host(&self) -> &str;

    /// Username the client authenticates with, if one was created
    fn username(&self) -> Option<String>;

    /// Register a new user; the bridge link button must have been pressed
    async fn create_user(&self, device_type: &str) -> Result<String, HueApiError>;

    /// Fetch the bridge configuration, validating the username
    async fn initialize(&self) -> Result<BridgeConfig, HueApiError>;

    /// Fetch all sensors keyed by sensor id
    async fn sensors(&self) -> Result<HashMap<String, HueSensor>, HueApiError>;
}
