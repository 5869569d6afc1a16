//! Hourly price data of one tariff
//!
//! [`PvpcData`] downloads day price series through a [`PriceSource`], keeps
//! today's (and, in the evening, tomorrow's) prices, and derives the sensor
//! state and attributes for a given hour.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, SubsecRound, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::consts::{ATTRIBUTION, ATTR_TARIFF, NEXT_DAY_PRICES_HOUR};

/// Prices in €/kWh keyed by the UTC start of their hour
pub type Prices = BTreeMap<DateTime<Utc>, f64>;

/// Billing plan the price series is fetched for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tariff {
    /// Single period
    Normal,
    /// Two periods, day and night
    Discrimination,
    /// Three periods with a cheap overnight window
    ElectricCar,
}

impl Tariff {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tariff::Normal => "normal",
            Tariff::Discrimination => "discrimination",
            Tariff::ElectricCar => "electric_car",
        }
    }
}

impl fmt::Display for Tariff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown tariff: {0}")]
pub struct UnknownTariff(pub String);

impl FromStr for Tariff {
    type Err = UnknownTariff;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Tariff::Normal),
            "discrimination" => Ok(Tariff::Discrimination),
            "electric_car" => Ok(Tariff::ElectricCar),
            other => Err(UnknownTariff(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PriceSourceError {
    #[error("Timeout requesting prices")]
    Timeout,

    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Source of the published hourly prices (the ESIOS API)
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Prices of the local day `day`, one per hour (23 to 25 of them)
    async fn fetch_day(&self, tariff: Tariff, day: NaiveDate) -> Result<Prices, PriceSourceError>;
}

/// Price handler of one sensor
pub struct PvpcData {
    tariff: Tariff,
    source: Arc<dyn PriceSource>,
    time_zone: Tz,
    timeout: Duration,
    current_prices: Prices,

    /// Price of the current hour
    pub state: Option<String>,
    /// Whether a price exists for the current hour
    pub state_available: bool,
    /// Whether downloads are still expected to succeed
    pub source_available: bool,
    pub attributes: HashMap<String, Value>,
}

impl PvpcData {
    pub fn new(tariff: Tariff, source: Arc<dyn PriceSource>, time_zone: Tz, timeout: Duration) -> Self {
        Self {
            tariff,
            source,
            time_zone,
            timeout,
            current_prices: Prices::new(),
            state: None,
            state_available: false,
            source_available: true,
            attributes: HashMap::new(),
        }
    }

    pub fn tariff(&self) -> Tariff {
        self.tariff
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Prices downloaded so far
    pub fn prices(&self) -> &Prices {
        &self.current_prices
    }

    /// Download today's prices, and tomorrow's once they are published
    ///
    /// Returns the downloaded prices; an empty map when today's download
    /// failed, in which case the cached prices are kept.
    pub async fn update_prices(&mut self, now: DateTime<Utc>) -> Prices {
        let local_now = now.with_timezone(&self.time_zone);
        let today = local_now.date_naive();

        let mut prices = self.download_day(today).await;
        if prices.is_empty() {
            return prices;
        }

        if local_now.hour() >= NEXT_DAY_PRICES_HOUR {
            if let Some(tomorrow) = today.checked_add_days(Days::new(1)) {
                prices.extend(self.download_day(tomorrow).await);
            }
        }

        self.current_prices
            .extend(prices.iter().map(|(hour, price)| (*hour, *price)));
        if let Some(today_start) = self.local_midnight(today) {
            self.current_prices = self.current_prices.split_off(&today_start);
        }
        debug!(
            "Download done for {} ({}), now with {} prices",
            today,
            self.tariff,
            self.current_prices.len()
        );
        prices
    }

    async fn download_day(&self, day: NaiveDate) -> Prices {
        match tokio::time::timeout(self.timeout, self.source.fetch_day(self.tariff, day)).await {
            Ok(Ok(prices)) => prices,
            Ok(Err(PriceSourceError::BadResponse(message))) => {
                error!("Bad response downloading prices for {}: {}", day, message);
                Prices::new()
            }
            Ok(Err(err)) => {
                warn!("Error downloading prices for {}: {}", day, err);
                Prices::new()
            }
            Err(_) => {
                warn!("Timeout error requesting prices for {}", day);
                Prices::new()
            }
        }
    }

    fn local_midnight(&self, day: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = day.and_hms_opt(0, 0, 0)?;
        self.time_zone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    }

    /// Set state and attributes for the hour containing `now`
    ///
    /// Returns false when there is no price for that hour.
    pub fn process_state_and_attributes(&mut self, now: DateTime<Utc>) -> bool {
        let mut attributes = HashMap::from([
            ("attribution".to_string(), json!(ATTRIBUTION)),
            (ATTR_TARIFF.to_string(), json!(self.tariff.as_str())),
        ]);

        let hour = now
            .trunc_subsecs(0)
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .unwrap_or(now);
        let local_hour = hour.with_timezone(&self.time_zone);

        if self.current_prices.len() > 25 && local_hour.hour() < NEXT_DAY_PRICES_HOUR {
            if let Some(today_start) = self.local_midnight(local_hour.date_naive()) {
                self.current_prices = self.current_prices.split_off(&today_start);
            }
        }

        let Some(price) = self.current_prices.get(&hour).copied() else {
            self.state_available = false;
            self.attributes = attributes;
            return false;
        };

        self.state = Some(format_price(price));
        self.state_available = true;
        attributes.extend(self.price_attributes(hour));
        self.attributes = attributes;
        true
    }

    fn price_attributes(&self, hour: DateTime<Utc>) -> HashMap<String, Value> {
        let tz = self.time_zone;
        let today = hour.with_timezone(&tz).date_naive();
        let mut attributes = HashMap::new();

        let mut by_price: Vec<(&DateTime<Utc>, &f64)> = self.current_prices.iter().collect();
        by_price.sort_by(|a, b| a.1.total_cmp(b.1));

        if let Some((at, price)) = by_price.first() {
            attributes.insert("min_price".to_string(), json!(price));
            attributes.insert(
                "min_price_at".to_string(),
                json!(at.with_timezone(&tz).hour()),
            );
        }
        let next_best: Vec<u32> = by_price
            .iter()
            .filter(|(at, _)| **at >= hour)
            .map(|(at, _)| at.with_timezone(&tz).hour())
            .collect();
        attributes.insert("next_best_at".to_string(), json!(next_best));

        for (at, price) in &self.current_prices {
            let local = at.with_timezone(&tz);
            let mut key = if local.date_naive() > today {
                format!("price_next_day_{:02}h", local.hour())
            } else {
                format!("price_{:02}h", local.hour())
            };
            // The repeated hour when DST ends
            if attributes.contains_key(&key) {
                key.push_str("_d");
            }
            attributes.insert(key, json!(price));
        }
        attributes
    }
}

/// Price as shown in the state, rounded to 5 decimals
fn format_price(price: f64) -> String {
    let rounded = (price * 100_000.0).round() / 100_000.0;
    rounded.to_string()
}
