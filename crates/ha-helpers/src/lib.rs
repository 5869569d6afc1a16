//! Integration helpers
//!
//! The pieces of the host that integrations are written against:
//!
//! - [`clock`] - wall-clock source, swappable in tests
//! - [`event`] - `track_time_change` / `track_point_in_time` with
//!   cancellable handles
//! - [`entity`] - the `Entity` trait and how an entity's properties become a
//!   state machine write
//! - [`update_coordinator`] - a polling loop shared by many entities
//! - [`storage`] / [`restore_state`] - `.storage/` persistence and the last
//!   known state of entities across restarts and reloads

pub mod clock;
pub mod entity;
pub mod event;
pub mod restore_state;
pub mod storage;
pub mod update_coordinator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{write_state, Entity};
pub use event::{action, Action, TimePattern, TimeTracker, Unsubscribe};
pub use restore_state::RestoreStateStore;
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
pub use update_coordinator::{DataUpdateCoordinator, Listener, UpdateFailed, UpdateMethod};
