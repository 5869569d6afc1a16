//! Last known entity states across restarts and reloads

use dashmap::DashMap;
use ha_core::State;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for restorable states
pub const STORAGE_KEY: &str = "core.restore_state";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredStates {
    states: Vec<State>,
}

impl Storable for StoredStates {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

/// Keeps the last state each restorable entity wrote
///
/// Entities ask for their last state when they are added and hand it back
/// when they are removed. With a [`Storage`] backend the set survives
/// restarts through [`load`](Self::load) and [`dump`](Self::dump).
pub struct RestoreStateStore {
    storage: Option<Storage>,
    last_states: DashMap<String, State>,
}

impl RestoreStateStore {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Some(storage),
            last_states: DashMap::new(),
        }
    }

    /// A store that only lives as long as the process
    pub fn in_memory() -> Self {
        Self {
            storage: None,
            last_states: DashMap::new(),
        }
    }

    /// Read previously dumped states
    pub async fn load(&self) -> StorageResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if let Some(stored) = storage.load::<StoredStates>().await? {
            info!("Restoring {} entity states", stored.states.len());
            for state in stored.states {
                self.last_states.insert(state.entity_id.to_string(), state);
            }
        }
        Ok(())
    }

    /// The last state remembered for `entity_id`
    pub fn last_state(&self, entity_id: &str) -> Option<State> {
        self.last_states.get(entity_id).map(|s| s.clone())
    }

    /// Remember `state` as the entity's last state
    pub fn remember(&self, state: State) {
        debug!(entity_id = %state.entity_id, state = %state.state, "Remembering state");
        self.last_states.insert(state.entity_id.to_string(), state);
    }

    /// Persist every remembered state
    pub async fn dump(&self) -> StorageResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let stored = StoredStates {
            states: self.last_states.iter().map(|r| r.value().clone()).collect(),
        };
        storage.save(&stored).await?;
        debug!("Dumped {} entity states", stored.states.len());
        Ok(())
    }
}
