//! PVPC sensors set up from YAML platform config against a fake price source

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Europe::Madrid;
use ha_components::pvpc_hourly_pricing::{
    PriceSource, PriceSourceError, Prices, PvpcIntegration, PvpcPlatformConfig, SourceStatus,
    Tariff, DOMAIN,
};
use ha_components::HomeAssistant;
use ha_config_entries::{ConfigEntrySource, ConfigEntryUpdate};
use ha_core::STATE_UNAVAILABLE;
use ha_helpers::ManualClock;
use serde_json::json;
use tokio_test::assert_ok;

struct FakeEsios {
    ok: AtomicBool,
    calls: AtomicUsize,
    tariffs: Mutex<Vec<Tariff>>,
}

impl FakeEsios {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ok: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            tariffs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl PriceSource for FakeEsios {
    async fn fetch_day(&self, tariff: Tariff, day: NaiveDate) -> Result<Prices, PriceSourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tariffs.lock().unwrap().push(tariff);
        if !self.ok.load(Ordering::SeqCst) {
            return Err(PriceSourceError::Connection("connection refused".to_string()));
        }

        let midnight = Madrid
            .from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc);
        Ok((0..24)
            .map(|h| (midnight + chrono::Duration::hours(h), 0.1 + 0.001 * h as f64))
            .collect::<BTreeMap<_, _>>())
    }
}

struct Setup {
    _dir: tempfile::TempDir,
    clock: ManualClock,
    hass: Arc<HomeAssistant>,
    source: Arc<FakeEsios>,
    integration: Arc<PvpcIntegration>,
}

fn setup(hour: u32, minute: u32, second: u32) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(Utc.with_ymd_and_hms(2020, 3, 21, hour, minute, second).unwrap());
    let hass = Arc::new(HomeAssistant::new(dir.path(), Arc::new(clock.clone()), Madrid));
    let source = FakeEsios::new();
    let integration = PvpcIntegration::with_price_minute(hass.clone(), source.clone(), 10);
    integration.register();

    Setup {
        _dir: dir,
        clock,
        hass,
        source,
        integration,
    }
}

fn yaml_config() -> PvpcPlatformConfig {
    PvpcPlatformConfig::from_yaml("name: pvpc_manual_sensor\ntariff: discrimination\n").unwrap()
}

#[tokio::test]
async fn test_yaml_config_imported_as_entry() {
    let s = setup(10, 42, 0);

    let entry_id = s.integration.setup_platform(yaml_config()).await.unwrap();

    let entry = s.hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.domain, DOMAIN);
    assert_eq!(entry.source, ConfigEntrySource::Import);
    assert_eq!(entry.unique_id.as_deref(), Some("discrimination"));
    assert!(entry.is_loaded());

    let state = s.hass.states.get("sensor.pvpc_manual_sensor").unwrap();
    assert_eq!(state.state, "0.111");
    assert_eq!(state.attribute::<String>("friendly_name").as_deref(), Some("pvpc_manual_sensor"));
    assert_eq!(state.attribute::<String>("icon").as_deref(), Some("mdi:currency-eur"));
    assert_eq!(state.attribute::<String>("tariff").as_deref(), Some("discrimination"));
    let price_11h = state.attribute::<f64>("price_11h").unwrap();
    assert!((price_11h - 0.111).abs() < 1e-9);

    // The same tariff again is skipped
    let again = s.integration.setup_platform(yaml_config()).await.unwrap();
    assert_eq!(again, entry_id);
    assert_eq!(s.hass.config_entries.len(), 1);
    assert_eq!(s.hass.states.entity_ids("sensor").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_state_follows_the_hour() {
    let s = setup(10, 59, 59);
    let entry_id = s.integration.setup_platform(yaml_config()).await.unwrap();
    assert_eq!(s.hass.states.get_state("sensor.pvpc_manual_sensor").as_deref(), Some("0.111"));

    // Let the trackers compute their first fire time
    tokio::time::sleep(Duration::from_millis(10)).await;
    s.clock.set(Utc.with_ymd_and_hms(2020, 3, 21, 11, 0, 0).unwrap());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(s.hass.states.get_state("sensor.pvpc_manual_sensor").as_deref(), Some("0.112"));
    let sensor = s.integration.sensor(&entry_id).unwrap();
    assert_eq!(sensor.status().await, SourceStatus::Available);
    assert_eq!(s.source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_price_download_at_configured_minutes() {
    let s = setup(10, 9, 50);
    s.integration.setup_platform(yaml_config()).await.unwrap();
    assert_eq!(s.source.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(s.source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_tariff_option_change_reloads_sensor() {
    let s = setup(10, 42, 0);
    let entry_id = s.integration.setup_platform(yaml_config()).await.unwrap();

    assert_ok!(
        s.hass
            .config_entries
            .update(
                &entry_id,
                ConfigEntryUpdate::new().options(HashMap::from([(
                    "tariff".to_string(),
                    json!("electric_car")
                )])),
            )
            .await
    );

    let mut reloaded = false;
    for _ in 0..100 {
        if let Some(sensor) = s.integration.sensor(&entry_id) {
            if sensor.tariff().await == Tariff::ElectricCar {
                reloaded = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reloaded);

    let entry = s.hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.data["tariff"], json!("electric_car"));
    assert!(entry.is_loaded());
    assert_eq!(s.source.tariffs.lock().unwrap().last(), Some(&Tariff::ElectricCar));
    assert_eq!(
        s.hass.states.get("sensor.pvpc_manual_sensor").unwrap().attribute::<String>("tariff").as_deref(),
        Some("electric_car")
    );
}

#[tokio::test]
async fn test_unload_keeps_last_state_for_next_setup() {
    let s = setup(10, 42, 0);
    let entry_id = s.integration.setup_platform(yaml_config()).await.unwrap();

    assert_ok!(s.hass.config_entries.unload(&entry_id).await);
    assert!(!s.hass.states.contains("sensor.pvpc_manual_sensor"));
    assert!(s.integration.sensor(&entry_id).is_none());

    s.source.ok.store(false, Ordering::SeqCst);
    assert_ok!(s.hass.config_entries.setup(&entry_id).await);

    let sensor = s.integration.sensor(&entry_id).unwrap();
    assert_eq!(sensor.state().await.as_deref(), Some("0.111"));
    assert_eq!(
        s.hass.states.get_state("sensor.pvpc_manual_sensor").as_deref(),
        Some(STATE_UNAVAILABLE)
    );
    assert_eq!(sensor.status().await, SourceStatus::Retrying { attempt: 2 });
}

#[tokio::test]
async fn test_stop_persists_sensor_state() {
    let s = setup(10, 42, 0);
    s.integration.setup_platform(yaml_config()).await.unwrap();

    assert_ok!(s.hass.stop().await);

    let restarted = HomeAssistant::new(s._dir.path(), Arc::new(s.clock.clone()), Madrid);
    assert_ok!(restarted.start().await);
    assert_eq!(
        restarted
            .restore_state
            .last_state("sensor.pvpc_manual_sensor")
            .map(|state| state.state)
            .as_deref(),
        Some("0.111")
    );
    assert_eq!(restarted.config_entries.len(), 1);
}
