//! Polling coordinator shared by the entities of one data source

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::event::Unsubscribe;

/// Raised by an update method when fresh data could not be fetched
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct UpdateFailed(pub String);

impl UpdateFailed {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Fetches a new snapshot of the coordinated data
pub type UpdateMethod<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, UpdateFailed>> + Send + Sync>;

/// Called after every refresh, successful or not
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Fetches data on an interval and fans the result out to listeners
///
/// Only the first failure of a failing streak is logged as an error and
/// the recovery as info, so a bridge that is down does not flood the log.
/// [`data`](Self::data) keeps the last good snapshot while updates fail.
pub struct DataUpdateCoordinator<T> {
    name: String,
    update_method: UpdateMethod<T>,
    update_interval: RwLock<Duration>,
    data: RwLock<Option<Arc<T>>>,
    last_update_success: AtomicBool,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
}

impl<T: Send + Sync + 'static> DataUpdateCoordinator<T> {
    pub fn new<F, Fut>(name: impl Into<String>, update_interval: Duration, update_method: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, UpdateFailed>> + Send + 'static,
    {
        Self {
            name: name.into(),
            update_method: Arc::new(move || update_method().boxed()),
            update_interval: RwLock::new(update_interval),
            data: RwLock::new(None),
            last_update_success: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last successfully fetched data
    pub fn data(&self) -> Option<Arc<T>> {
        match self.data.read() {
            Ok(data) => data.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    pub fn update_interval(&self) -> Duration {
        match self.update_interval.read() {
            Ok(interval) => *interval,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Change the polling interval; applies from the next scheduled poll
    pub fn set_update_interval(&self, interval: Duration) {
        debug!("{} update interval set to {:?}", self.name, interval);
        match self.update_interval.write() {
            Ok(mut current) => *current = interval,
            Err(poisoned) => *poisoned.into_inner() = interval,
        }
    }

    /// Register a listener; returns an id for [`remove_listener`](Self::remove_listener)
    pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: u64) {
        self.lock_listeners().retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Fetch new data now and notify listeners
    pub async fn refresh(&self) {
        match (self.update_method)().await {
            Ok(data) => {
                match self.data.write() {
                    Ok(mut current) => *current = Some(Arc::new(data)),
                    Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(data)),
                }
                if !self.last_update_success.swap(true, Ordering::SeqCst) {
                    info!("Fetching {} data recovered", self.name);
                }
            }
            Err(err) => {
                if self.last_update_success.swap(false, Ordering::SeqCst) {
                    error!("Error fetching {} data: {}", self.name, err);
                }
            }
        }

        // Clone out so a listener may add or remove listeners
        let listeners: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener();
        }
    }

    /// Poll on the update interval until cancelled or the coordinator is dropped
    pub fn start(self: &Arc<Self>) -> Unsubscribe {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let coordinator: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let Some(interval) = coordinator.upgrade().map(|c| c.update_interval()) else {
                    break;
                };
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(strong) = coordinator.upgrade() else {
                    break;
                };
                strong.refresh().await;
            }
        });

        Unsubscribe::from(token)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Listener)>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
