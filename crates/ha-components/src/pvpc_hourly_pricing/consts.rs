//! Constants for the PVPC hourly pricing component

pub const DOMAIN: &str = "pvpc_hourly_pricing";
pub const PLATFORM: &str = "sensor";

pub const ATTR_TARIFF: &str = "tariff";
pub const CONF_NAME: &str = "name";
pub const CONF_TIMEOUT: &str = "timeout";

pub const DEFAULT_NAME: &str = "PVPC";
/// Seconds allowed for one price download
pub const DEFAULT_TIMEOUT: u64 = 5;

pub const ICON: &str = "mdi:currency-eur";
pub const UNIT: &str = "€/kWh";
pub const ATTRIBUTION: &str = "Data retrieved from api.esios.ree.es by REE";

/// Local hour from which next day prices are published
pub const NEXT_DAY_PRICES_HOUR: u32 = 20;

/// Retries allowed before the source is given up
pub const MAX_RETRIES: u32 = 2;
