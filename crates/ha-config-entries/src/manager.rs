//! Config Entries Manager
//!
//! Holds every config entry, persists them through [`Storage`] and drives
//! the setup/unload lifecycle through per-domain handlers.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use ha_helpers::{Storable, Storage, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
pub const STORAGE_VERSION: u32 = 1;
pub const STORAGE_MINOR_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("Setup failed: {0}")]
    SetupFailed(String),

    #[error("Unload failed for entry {0}")]
    UnloadFailed(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Outcome of a failed setup handler
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// Device or service not reachable yet; setup is retried later
    #[error("{0}")]
    NotReady(String),

    /// Setup cannot succeed without user action
    #[error("{0}")]
    Failed(String),
}

/// Config entries as stored on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub type SetupHandler =
    Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, Result<(), SetupError>> + Send + Sync>;

/// Returns whether the entry was unloaded
pub type UnloadHandler = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, bool> + Send + Sync>;

/// Called with the updated entry after its options change
pub type UpdateListener = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, ()> + Send + Sync>;

/// Config Entries Manager
pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// domain -> entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serializes setup and unload
    setup_lock: Mutex<()>,

    setup_handlers: DashMap<String, SetupHandler>,
    unload_handlers: DashMap<String, UnloadHandler>,
    update_listeners: DashMap<String, Vec<UpdateListener>>,

    /// entry_id -> pending setup retry
    retries: DashMap<String, CancellationToken>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_lock: Mutex::new(()),
            setup_handlers: DashMap::new(),
            unload_handlers: DashMap::new(),
            update_listeners: DashMap::new(),
            retries: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage
    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.iter().collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &ConfigEntry) {
        let entry_id = entry.entry_id.clone();
        self.entries.insert(entry_id.clone(), entry.clone());
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id);
        }
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_loaded_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.get_by_domain(domain)
            .into_iter()
            .filter(|e| e.is_loaded())
            .collect()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry; `(domain, unique_id)` must be unused
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    /// Apply `update` and notify update listeners when the options changed
    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);

        let mut updated = entry.clone();
        if let Some(title) = update.title {
            updated.title = title;
        }
        if let Some(data) = update.data {
            updated.data = data;
        }
        if let Some(options) = update.options {
            updated.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            updated.unique_id = unique_id;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.save().await?;
        debug!("Updated config entry: {}", entry_id);

        if updated.options != entry.options {
            self.notify_update_listeners(&updated);
        }
        Ok(updated)
    }

    /// Listeners run as their own tasks, so a listener may reload the entry
    fn notify_update_listeners(&self, entry: &ConfigEntry) {
        let listeners = self
            .update_listeners
            .get(&entry.entry_id)
            .map(|l| l.clone())
            .unwrap_or_default();
        for listener in listeners {
            tokio::spawn(listener(entry.clone()));
        }
    }

    /// Remove an entry, unloading it first
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        self.unload(entry_id).await?;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.unindex_entry(&entry);
        self.update_listeners.remove(entry_id);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    pub fn register_setup_handler<F, Fut>(&self, domain: &str, handler: F)
    where
        F: Fn(ConfigEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SetupError>> + Send + 'static,
    {
        self.setup_handlers
            .insert(domain.to_string(), Arc::new(move |entry| handler(entry).boxed()));
        debug!("Registered setup handler for domain: {}", domain);
    }

    pub fn register_unload_handler<F, Fut>(&self, domain: &str, handler: F)
    where
        F: Fn(ConfigEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.unload_handlers
            .insert(domain.to_string(), Arc::new(move |entry| handler(entry).boxed()));
        debug!("Registered unload handler for domain: {}", domain);
    }

    /// Register a listener for option changes; dropped when the entry unloads
    pub fn add_update_listener<F, Fut>(&self, entry_id: &str, listener: F)
    where
        F: Fn(ConfigEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: UpdateListener = Arc::new(move |entry| listener(entry).boxed());
        self.update_listeners
            .entry(entry_id.to_string())
            .or_default()
            .push(listener);
    }

    fn transition(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Run the domain's setup handler for an entry
    ///
    /// A handler that is not ready leaves the entry in `SetupRetry` with a
    /// retry scheduled; this still returns `Ok`.
    #[instrument(skip(self))]
    pub async fn setup(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.disabled {
            debug!("Skipping setup for disabled entry: {}", entry_id);
            return Ok(());
        }

        if let Some((_, pending)) = self.retries.remove(entry_id) {
            pending.cancel();
        }
        self.transition(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let handler = self.setup_handlers.get(&entry.domain).map(|h| h.clone());
        let Some(handler) = handler else {
            self.transition(entry_id, ConfigEntryState::Loaded, None)?;
            debug!(
                "No setup handler for domain {}, marking as loaded",
                entry.domain
            );
            return Ok(());
        };

        match handler(entry.clone()).await {
            Ok(()) => {
                self.transition(entry_id, ConfigEntryState::Loaded, None)?;
                info!("Setup completed for entry: {} ({})", entry.title, entry_id);
                Ok(())
            }
            Err(SetupError::NotReady(reason)) => {
                let tries = self
                    .entries
                    .get(entry_id)
                    .map(|e| e.tries)
                    .unwrap_or_default();
                let delay = calculate_retry_delay(tries);
                self.transition(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                if let Some(mut e) = self.entries.get_mut(entry_id) {
                    e.tries += 1;
                }

                warn!(
                    "Config entry '{}' for {} integration not ready yet: {}; Retrying in background in {} seconds",
                    entry.title,
                    entry.domain,
                    reason,
                    delay.as_secs()
                );
                self.schedule_retry(entry_id, delay);
                Ok(())
            }
            Err(SetupError::Failed(reason)) => {
                error!(
                    "Error setting up entry {} for {}: {}",
                    entry.title, entry.domain, reason
                );
                self.transition(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, entry_id: &str, delay: std::time::Duration) {
        let token = CancellationToken::new();
        self.retries.insert(entry_id.to_string(), token.clone());

        let manager: Weak<Self> = Arc::downgrade(self);
        let entry_id = entry_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let retry: BoxFuture<'static, ConfigEntriesResult<()>> =
                async move { manager.setup(&entry_id).await }.boxed();
            if let Err(err) = retry.await {
                debug!("Setup retry failed: {}", err);
            }
        });
    }

    /// Unload an entry
    ///
    /// Loaded entries go through the domain's unload handler; entries that
    /// are retrying or failed are just reset to `NotLoaded`.
    #[instrument(skip(self))]
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _lock = self.setup_lock.lock().await;

        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some((_, pending)) = self.retries.remove(entry_id) {
            pending.cancel();
        }

        match entry.state {
            ConfigEntryState::NotLoaded => return Ok(()),
            ConfigEntryState::SetupError | ConfigEntryState::SetupRetry => {
                self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;
                self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
                return Ok(());
            }
            _ => {}
        }

        self.transition(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        let handler = self.unload_handlers.get(&entry.domain).map(|h| h.clone());
        let unloaded = match handler {
            Some(handler) => handler(entry.clone()).await,
            None => true,
        };

        if !unloaded {
            self.transition(
                entry_id,
                ConfigEntryState::FailedUnload,
                Some("Unload handler refused".to_string()),
            )?;
            return Err(ConfigEntriesError::UnloadFailed(entry_id.to_string()));
        }

        self.update_listeners.remove(entry_id);
        self.transition(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!("Unloaded entry: {} ({})", entry.title, entry_id);
        Ok(())
    }

    /// Unload then set up again
    pub async fn reload(self: &Arc<Self>, entry_id: &str) -> ConfigEntriesResult<()> {
        info!("Reloading config entry {}", entry_id);
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn domains(&self) -> Vec<String> {
        self.by_domain.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ConfigEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    /// Set up every entry, keyed by entry id
    pub async fn setup_all(self: &Arc<Self>) -> HashMap<String, ConfigEntriesResult<()>> {
        let mut results = HashMap::new();
        for entry_id in self.entry_ids() {
            let result = self.setup(&entry_id).await;
            results.insert(entry_id, result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ConfigEntrySource;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_manager() -> (TempDir, Arc<ConfigEntries>) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));
        (temp_dir, Arc::new(ConfigEntries::new(storage)))
    }

    fn state_of(manager: &ConfigEntries, entry_id: &str) -> ConfigEntryState {
        manager.get(entry_id).unwrap().state
    }

    #[tokio::test]
    async fn test_duplicate_unique_id_rejected() {
        let (_dir, manager) = create_test_manager();

        manager
            .add(ConfigEntry::new("pvpc_hourly_pricing", "PVPC").with_unique_id("normal"))
            .await
            .unwrap();
        let result = manager
            .add(ConfigEntry::new("pvpc_hourly_pricing", "PVPC 2").with_unique_id("normal"))
            .await;
        assert!(matches!(result, Err(ConfigEntriesError::AlreadyExists { .. })));

        // Same unique id in another domain is fine
        manager
            .add(ConfigEntry::new("hue", "Bridge").with_unique_id("normal"))
            .await
            .unwrap();
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get_by_domain("hue").len(), 1);
    }

    #[tokio::test]
    async fn test_setup_and_unload_handlers() {
        let (_dir, manager) = create_test_manager();
        let unloads = Arc::new(AtomicUsize::new(0));

        manager.register_setup_handler("hue", |_entry| async { Ok(()) });
        let counter = unloads.clone();
        manager.register_unload_handler("hue", move |_entry| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        let entry = manager.add(ConfigEntry::new("hue", "Bridge")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();
        assert_eq!(state_of(&manager, &entry.entry_id), ConfigEntryState::Loaded);
        assert_eq!(manager.get_loaded_by_domain("hue").len(), 1);

        manager.unload(&entry.entry_id).await.unwrap();
        assert_eq!(state_of(&manager, &entry.entry_id), ConfigEntryState::NotLoaded);
        assert_eq!(unloads.load(Ordering::SeqCst), 1);

        // Unloading twice is a no-op
        manager.unload(&entry.entry_id).await.unwrap();
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_not_retried() {
        let (_dir, manager) = create_test_manager();
        manager.register_setup_handler("hue", |_entry| async {
            Err(SetupError::Failed("Link button not pressed".to_string()))
        });

        let entry = manager.add(ConfigEntry::new("hue", "Bridge")).await.unwrap();
        let result = manager.setup(&entry.entry_id).await;

        assert!(matches!(result, Err(ConfigEntriesError::SetupFailed(_))));
        let entry = manager.get(&entry.entry_id).unwrap();
        assert_eq!(entry.state, ConfigEntryState::SetupError);
        assert_eq!(entry.reason.as_deref(), Some("Link button not pressed"));
    }

    #[tokio::test]
    async fn test_unload_refused() {
        let (_dir, manager) = create_test_manager();
        manager.register_unload_handler("hue", |_entry| async { false });

        let entry = manager.add(ConfigEntry::new("hue", "Bridge")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let result = manager.unload(&entry.entry_id).await;
        assert!(matches!(result, Err(ConfigEntriesError::UnloadFailed(_))));
        assert_eq!(state_of(&manager, &entry.entry_id), ConfigEntryState::FailedUnload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_ready_setup_is_retried_with_backoff() {
        let (_dir, manager) = create_test_manager();
        let results = Arc::new(std::sync::Mutex::new(VecDeque::from([
            Err(SetupError::NotReady("timeout".to_string())),
            Err(SetupError::NotReady("timeout".to_string())),
            Ok(()),
        ])));
        let calls = Arc::new(AtomicUsize::new(0));

        let (script, counter) = (results.clone(), calls.clone());
        manager.register_setup_handler("hue", move |_entry| {
            counter.fetch_add(1, Ordering::SeqCst);
            let result = script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            async move { result }
        });

        let entry = manager.add(ConfigEntry::new("hue", "Bridge")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();

        let retrying = manager.get(&entry.entry_id).unwrap();
        assert_eq!(retrying.state, ConfigEntryState::SetupRetry);
        assert_eq!(retrying.tries, 1);
        assert_eq!(retrying.reason.as_deref(), Some("timeout"));

        // First retry after ~5s
        tokio::time::sleep(Duration::from_millis(5_200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get(&entry.entry_id).unwrap().tries, 2);

        // Second retry after ~10s more
        tokio::time::sleep(Duration::from_millis(9_000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state_of(&manager, &entry.entry_id), ConfigEntryState::Loaded);
        assert_eq!(manager.get(&entry.entry_id).unwrap().tries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_cancels_pending_retry() {
        let (_dir, manager) = create_test_manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        manager.register_setup_handler("hue", move |_entry| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(SetupError::NotReady("bridge offline".to_string())) }
        });

        let entry = manager.add(ConfigEntry::new("hue", "Bridge")).await.unwrap();
        manager.setup(&entry.entry_id).await.unwrap();
        manager.unload(&entry.entry_id).await.unwrap();
        assert_eq!(state_of(&manager, &entry.entry_id), ConfigEntryState::NotLoaded);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_listener_runs_on_options_change() {
        let (_dir, manager) = create_test_manager();
        let entry = manager
            .add(ConfigEntry::new("pvpc_hourly_pricing", "PVPC"))
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager.add_update_listener(&entry.entry_id, move |entry: ConfigEntry| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(entry.option_str("tariff").map(str::to_string));
            }
        });

        manager
            .update(&entry.entry_id, ConfigEntryUpdate::new().title("Renamed"))
            .await
            .unwrap();
        manager
            .update(
                &entry.entry_id,
                ConfigEntryUpdate::new()
                    .options(HashMap::from([("tariff".to_string(), json!("electric_car"))])),
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Some("electric_car".to_string())));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reload_runs_setup_again() {
        let (_dir, manager) = create_test_manager();
        let setups = Arc::new(AtomicUsize::new(0));
        let counter = setups.clone();
        manager.register_setup_handler("pvpc_hourly_pricing", move |_entry| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let entry = manager
            .add(ConfigEntry::new("pvpc_hourly_pricing", "PVPC"))
            .await
            .unwrap();
        manager.setup(&entry.entry_id).await.unwrap();
        manager.reload(&entry.entry_id).await.unwrap();

        assert_eq!(setups.load(Ordering::SeqCst), 2);
        assert_eq!(state_of(&manager, &entry.entry_id), ConfigEntryState::Loaded);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(temp_dir.path()));

        {
            let manager = Arc::new(ConfigEntries::new(storage.clone()));
            let entry = manager
                .add(
                    ConfigEntry::new("pvpc_hourly_pricing", "PVPC")
                        .with_unique_id("discrimination")
                        .with_source(ConfigEntrySource::Import),
                )
                .await
                .unwrap();
            let removed = manager
                .add(ConfigEntry::new("hue", "Gone"))
                .await
                .unwrap();
            manager.setup(&entry.entry_id).await.unwrap();
            manager.remove(&removed.entry_id).await.unwrap();
        }

        let manager = ConfigEntries::new(storage);
        manager.load().await.unwrap();

        assert_eq!(manager.len(), 1);
        let entry = manager
            .get_by_unique_id("pvpc_hourly_pricing", "discrimination")
            .unwrap();
        assert_eq!(entry.source, ConfigEntrySource::Import);
        assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    }
}
