//! Connection to one Hue bridge

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use ha_config_entries::{ConfigEntry, ConfigEntryUpdate, SetupError};
use ha_core::slugify;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::api::{BridgeConfig, HueBridgeApi};
use super::consts::{
    BRIDGE_MODEL_V1, CONF_ALLOW_UNREACHABLE, CONF_INCLUDE_HUE_REMOTES, CONF_USERNAME,
    DEFAULT_ALLOW_UNREACHABLE, DEFAULT_INCLUDE_HUE_REMOTES, HUB_BUSY_SLEEP,
};
use super::errors::{HueApiError, HueSetupError};
use super::remote;
use super::sensor_base::SensorManager;
use crate::HomeAssistant;

/// Time allowed to link with the bridge during setup
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts of one bridge request before giving up
const MAX_REQUEST_TRIES: u32 = 4;

const PARALLEL_UPDATES_V1: usize = 3;
const PARALLEL_UPDATES: usize = 10;

/// Run when the bridge is reset
pub type ResetJob = Box<dyn FnOnce() + Send>;

/// Manages a single Hue bridge
pub struct HueBridge {
    hass: Arc<HomeAssistant>,
    entry: ConfigEntry,
    api: Arc<dyn HueBridgeApi>,
    allow_unreachable: bool,
    add_remotes: bool,
    authorized: AtomicBool,
    config: OnceLock<BridgeConfig>,
    /// Narrowed to the model limit during setup
    parallel_updates: Semaphore,
    reset_jobs: Mutex<Vec<ResetJob>>,
    sensor_manager: OnceLock<Arc<SensorManager>>,
}

impl HueBridge {
    pub fn new(hass: Arc<HomeAssistant>, entry: ConfigEntry, api: Arc<dyn HueBridgeApi>) -> Arc<Self> {
        Arc::new(Self {
            allow_unreachable: entry.option_bool(CONF_ALLOW_UNREACHABLE, DEFAULT_ALLOW_UNREACHABLE),
            add_remotes: entry.option_bool(CONF_INCLUDE_HUE_REMOTES, DEFAULT_INCLUDE_HUE_REMOTES),
            hass,
            entry,
            api,
            authorized: AtomicBool::new(false),
            config: OnceLock::new(),
            parallel_updates: Semaphore::new(PARALLEL_UPDATES),
            reset_jobs: Mutex::new(Vec::new()),
            sensor_manager: OnceLock::new(),
        })
    }

    pub fn host(&self) -> &str {
        self.api.host()
    }

    pub fn hass(&self) -> &Arc<HomeAssistant> {
        &self.hass
    }

    pub fn entry(&self) -> &ConfigEntry {
        &self.entry
    }

    pub fn api(&self) -> &Arc<dyn HueBridgeApi> {
        &self.api
    }

    pub fn allow_unreachable(&self) -> bool {
        self.allow_unreachable
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    /// Bridge configuration, once set up
    pub fn config(&self) -> Option<&BridgeConfig> {
        self.config.get()
    }

    pub fn sensor_manager(&self) -> Option<&Arc<SensorManager>> {
        self.sensor_manager.get()
    }

    /// Link with the bridge and set up the enabled platforms
    pub async fn setup(self: &Arc<Self>) -> Result<(), SetupError> {
        let host = self.host().to_string();

        let config = match self.authenticate().await {
            Ok(config) => config,
            Err(HueSetupError::AuthenticationRequired) => {
                warn!("Hue bridge at {} requires the link button to be pressed again", host);
                return Err(SetupError::Failed(
                    HueSetupError::AuthenticationRequired.to_string(),
                ));
            }
            Err(HueSetupError::CannotConnect) => {
                error!("Error connecting to the Hue bridge at {}", host);
                return Err(SetupError::NotReady(format!("Cannot connect to {}", host)));
            }
        };

        let limit = if config.modelid == BRIDGE_MODEL_V1 {
            PARALLEL_UPDATES_V1
        } else {
            PARALLEL_UPDATES
        };
        debug!(
            "Hue bridge {} ({}) allows {} parallel requests",
            host, config.modelid, limit
        );
        if self.config.set(config).is_ok() {
            self.parallel_updates.forget_permits(PARALLEL_UPDATES - limit);
        }
        self.authorized.store(true, Ordering::SeqCst);

        let manager = SensorManager::new(self);
        let _ = self.sensor_manager.set(manager.clone());

        if self.add_remotes {
            remote::setup_entry(&manager).await;
        }
        info!("Hue bridge at {} set up", host);
        Ok(())
    }

    async fn authenticate(&self) -> Result<BridgeConfig, HueSetupError> {
        let link = async {
            if self.api.username().is_none() {
                let username = self.api.create_user(&self.device_type()).await?;
                self.store_username(username).await;
            }
            self.api.initialize().await
        };

        match tokio::time::timeout(AUTH_TIMEOUT, link).await {
            Ok(Ok(config)) => Ok(config),
            Ok(Err(HueApiError::Unauthorized | HueApiError::LinkButtonNotPressed)) => {
                Err(HueSetupError::AuthenticationRequired)
            }
            Ok(Err(
                HueApiError::Timeout
                | HueApiError::Os(_)
                | HueApiError::ServerDisconnected
                | HueApiError::Response { .. },
            ))
            | Err(_) => Err(HueSetupError::CannotConnect),
            Ok(Err(HueApiError::Other(message))) => {
                error!("Unknown Hue linking error occurred: {}", message);
                Err(HueSetupError::AuthenticationRequired)
            }
        }
    }

    /// Device type registered with the bridge, at most 40 characters
    fn device_type(&self) -> String {
        let location: String = slugify(&self.hass.location_name).chars().take(19).collect();
        format!("home-assistant#{}", location)
    }

    async fn store_username(&self, username: String) {
        let mut data = self
            .hass
            .config_entries
            .get(&self.entry.entry_id)
            .map(|entry| entry.data)
            .unwrap_or_else(|| self.entry.data.clone());
        data.insert(CONF_USERNAME.to_string(), json!(username));

        if let Err(err) = self
            .hass
            .config_entries
            .update(&self.entry.entry_id, ConfigEntryUpdate::new().data(data))
            .await
        {
            warn!("Could not store the Hue username for {}: {}", self.host(), err);
        }
    }

    /// Run a bridge request, retrying while the bridge is busy
    ///
    /// 4xx responses are returned at once; OS errors, disconnects and 5xx
    /// responses are retried with a growing pause.
    pub async fn request_call<T, F, Fut>(&self, task: F) -> Result<T, HueApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, HueApiError>>,
    {
        let _permit = self
            .parallel_updates
            .acquire()
            .await
            .map_err(|err| HueApiError::Other(err.to_string()))?;

        let mut tries = 0;
        loop {
            let err = match task().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_client_error() => return Err(err),
                Err(err) => err,
            };

            tries += 1;
            if tries == MAX_REQUEST_TRIES {
                error!("Request failed {} times, giving up.", tries);
                return Err(err);
            }
            if !err.is_retryable() {
                return Err(err);
            }
            debug!("Hue bridge busy ({}), retrying", err);
            tokio::time::sleep(HUB_BUSY_SLEEP * (tries - 1)).await;
        }
    }

    /// The bridge rejected our username
    pub fn handle_unauthorized_error(&self) {
        if !self.authorized.swap(false, Ordering::SeqCst) {
            return;
        }
        error!(
            "Unable to authorize to bridge {}, setup the linking again.",
            self.host()
        );
    }

    pub fn add_reset_job(&self, job: ResetJob) {
        if let Ok(mut jobs) = self.reset_jobs.lock() {
            jobs.push(job);
        }
    }

    /// Stop polling and remove the bridge entities
    pub fn reset(&self) -> bool {
        if self.config.get().is_none() {
            return true;
        }

        let jobs: Vec<ResetJob> = match self.reset_jobs.lock() {
            Ok(mut jobs) => jobs.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for job in jobs.into_iter().rev() {
            job();
        }

        if let Some(manager) = self.sensor_manager.get() {
            manager.remove_entities();
        }
        debug!("Hue bridge at {} reset", self.host());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use chrono_tz::Europe::Madrid;
    use ha_helpers::ManualClock;

    use super::super::api::HueSensor;

    struct FakeApi {
        modelid: &'static str,
        username: Option<String>,
        init_errors: Mutex<VecDeque<HueApiError>>,
        created: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn new(modelid: &'static str) -> Self {
            Self {
                modelid,
                username: Some("abcdef".to_string()),
                init_errors: Mutex::new(VecDeque::new()),
                created: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, err: HueApiError) -> Self {
            self.init_errors.get_mut().unwrap().push_back(err);
            self
        }
    }

    #[async_trait]
    impl HueBridgeApi for FakeApi {
        fn host(&self) -> &str {
            "1.2.3.4"
        }

        fn username(&self) -> Option<String> {
            self.username.clone()
        }

        async fn create_user(&self, device_type: &str) -> Result<String, HueApiError> {
            self.created.lock().unwrap().push(device_type.to_string());
            Ok("new-user".to_string())
        }

        async fn initialize(&self) -> Result<BridgeConfig, HueApiError> {
            if let Some(err) = self.init_errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(BridgeConfig {
                name: "Philips hue".to_string(),
                modelid: self.modelid.to_string(),
                ..Default::default()
            })
        }

        async fn sensors(&self) -> Result<HashMap<String, HueSensor>, HueApiError> {
            Ok(HashMap::new())
        }
    }

    fn hass(dir: &tempfile::TempDir) -> Arc<HomeAssistant> {
        let clock = Arc::new(ManualClock::at(
            chrono::Utc.with_ymd_and_hms(2020, 3, 21, 10, 0, 0).unwrap(),
        ));
        Arc::new(HomeAssistant::new(dir.path(), clock, Madrid).with_location_name("Casa de Campo"))
    }

    fn bridge(dir: &tempfile::TempDir, api: FakeApi) -> Arc<HueBridge> {
        HueBridge::new(hass(dir), ConfigEntry::new("hue", "1.2.3.4"), Arc::new(api))
    }

    #[tokio::test]
    async fn test_setup_limits_v1_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new(BRIDGE_MODEL_V1));

        bridge.setup().await.unwrap();

        assert!(bridge.is_authorized());
        assert_eq!(bridge.parallel_updates.available_permits(), PARALLEL_UPDATES_V1);
        assert!(bridge.sensor_manager().is_some());
    }

    #[tokio::test]
    async fn test_setup_limits_v2_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new("BSB002"));

        bridge.setup().await.unwrap();
        assert_eq!(bridge.parallel_updates.available_permits(), PARALLEL_UPDATES);
    }

    #[tokio::test]
    async fn test_v1_limit_applies_after_early_request() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new(BRIDGE_MODEL_V1));

        let early = bridge.request_call(|| async { Ok(()) }).await;
        assert_eq!(early, Ok(()));
        assert_eq!(bridge.parallel_updates.available_permits(), PARALLEL_UPDATES);

        bridge.setup().await.unwrap();
        assert_eq!(bridge.parallel_updates.available_permits(), PARALLEL_UPDATES_V1);

        // A second setup does not narrow it again
        bridge.setup().await.unwrap();
        assert_eq!(bridge.parallel_updates.available_permits(), PARALLEL_UPDATES_V1);
    }

    #[tokio::test]
    async fn test_setup_errors() {
        let dir = tempfile::tempdir().unwrap();

        let unauthorized = bridge(&dir, FakeApi::new("BSB002").failing(HueApiError::Unauthorized));
        assert!(matches!(unauthorized.setup().await, Err(SetupError::Failed(_))));

        let offline = bridge(&dir, FakeApi::new("BSB002").failing(HueApiError::Os("refused".into())));
        assert!(matches!(offline.setup().await, Err(SetupError::NotReady(_))));

        let unknown = bridge(&dir, FakeApi::new("BSB002").failing(HueApiError::Other("?".into())));
        assert!(matches!(unknown.setup().await, Err(SetupError::Failed(_))));
        assert!(!unknown.is_authorized());
    }

    #[tokio::test]
    async fn test_setup_creates_user_without_username() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = FakeApi::new("BSB002");
        api.username = None;
        let api = Arc::new(api);
        let bridge = HueBridge::new(hass(&dir), ConfigEntry::new("hue", "1.2.3.4"), api.clone());

        bridge.setup().await.unwrap();
        assert_eq!(*api.created.lock().unwrap(), vec!["home-assistant#casa_de_campo".to_string()]);
    }

    #[test]
    fn test_device_type_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::at(chrono::Utc::now()));
        let hass = Arc::new(
            HomeAssistant::new(dir.path(), clock, Madrid)
                .with_location_name("A very long installation name"),
        );
        let bridge = HueBridge::new(hass, ConfigEntry::new("hue", "h"), Arc::new(FakeApi::new("BSB002")));

        assert_eq!(bridge.device_type(), "home-assistant#a_very_long_install");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_call_retries_busy_bridge() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new("BSB002"));
        let calls = AtomicUsize::new(0);

        let started = tokio::time::Instant::now();
        let result = bridge
            .request_call(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(HueApiError::Response { status: 503, message: "busy".into() })
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Pauses of 0 s and 0.5 s
        assert_eq!(started.elapsed(), HUB_BUSY_SLEEP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_call_gives_up_after_four_tries() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new("BSB002"));
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = bridge
            .request_call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(HueApiError::ServerDisconnected) }
            })
            .await;

        assert_eq!(result, Err(HueApiError::ServerDisconnected));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_request_call_raises_client_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new("BSB002"));
        let calls = AtomicUsize::new(0);

        let not_found: Result<(), _> = bridge
            .request_call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(HueApiError::Response { status: 404, message: "nope".into() }) }
            })
            .await;
        assert!(matches!(not_found, Err(HueApiError::Response { status: 404, .. })));

        let unauthorized: Result<(), _> = bridge
            .request_call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(HueApiError::Unauthorized) }
            })
            .await;
        assert_eq!(unauthorized, Err(HueApiError::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bridge(&dir, FakeApi::new("BSB002"));
        assert!(bridge.reset());

        bridge.setup().await.unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        bridge.add_reset_job(Box::new(move || flag.store(true, Ordering::SeqCst)));

        bridge.handle_unauthorized_error();
        assert!(!bridge.is_authorized());
        bridge.handle_unauthorized_error();

        assert!(bridge.reset());
        assert!(ran.load(Ordering::SeqCst));
    }
}
