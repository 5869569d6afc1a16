//! Home Assistant Components
//!
//! Integrations built on the host crates:
//!
//! - [`hue`] - Hue bridge remotes (dimmer switches, taps, dials) as
//!   `remote` entities whose state is the last button event
//! - [`pvpc_hourly_pricing`] - the Spanish regulated electricity price of
//!   the current hour as a `sensor`
//!
//! Both talk to their devices or web services through async traits
//! ([`hue::HueBridgeApi`], [`pvpc_hourly_pricing::PriceSource`]) so the
//! HTTP clients stay outside this crate.

mod hass;
pub mod hue;
pub mod pvpc_hourly_pricing;

pub use hass::HomeAssistant;
