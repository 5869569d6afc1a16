//! Constants for the Hue component

use std::time::Duration;

pub const DOMAIN: &str = "hue";

pub const CONF_HOST: &str = "host";
pub const CONF_USERNAME: &str = "username";

pub const CONF_ALLOW_UNREACHABLE: &str = "allow_unreachable";
pub const DEFAULT_ALLOW_UNREACHABLE: bool = false;

pub const CONF_ALLOW_HUE_GROUPS: &str = "allow_hue_groups";
pub const DEFAULT_ALLOW_HUE_GROUPS: bool = true;

pub const CONF_INCLUDE_HUE_SENSORS: &str = "add_hue_sensors";
pub const DEFAULT_INCLUDE_HUE_SENSORS: bool = true;

pub const CONF_INCLUDE_HUE_REMOTES: &str = "add_hue_remotes";
pub const DEFAULT_INCLUDE_HUE_REMOTES: bool = false;

/// Pause between retries when the bridge is busy, multiplied by the attempt
pub const HUB_BUSY_SLEEP: Duration = Duration::from_millis(500);

/// Bridge model that only copes with a few requests at a time
pub const BRIDGE_MODEL_V1: &str = "BSB001";
