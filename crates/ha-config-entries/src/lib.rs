//! Config Entries
//!
//! A config entry is one configured instance of an integration. This crate
//! tracks entries, persists them in `.storage/core.config_entries` and
//! drives their lifecycle (setup, retry, unload, reload).
//!
//! # Key Types
//!
//! - [`ConfigEntry`] - A single integration configuration
//! - [`ConfigEntryState`] - Lifecycle state of an entry
//! - [`ConfigEntries`] - Manager for all config entries
//! - [`SetupError`] - How a setup handler reports "not ready" vs "failed"

pub mod entry;
pub mod manager;
pub mod state_machine;

pub use entry::{ConfigEntry, ConfigEntrySource, ConfigEntryState, ConfigEntryUpdate};
pub use manager::{
    ConfigEntries, ConfigEntriesData, ConfigEntriesError, ConfigEntriesResult, SetupError,
    SetupHandler, UnloadHandler, UpdateListener, STORAGE_KEY, STORAGE_MINOR_VERSION,
    STORAGE_VERSION,
};
pub use state_machine::{calculate_retry_delay, InvalidTransition};
