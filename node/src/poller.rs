use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use hab_node_common::{
    polling::parse_state, ClimateSensor, CycleReport, ItemNames, ItemStore, SensorConfig,
    SensorPollingPolicy,
};
use tracing::{debug, info, warn};

use crate::scheduler::{ScheduledTask, Scheduler};

pub struct SensorPoller<S> {
    sensor: Arc<S>,
    policy: Arc<Mutex<SensorPollingPolicy>>,
    store: Option<Arc<dyn ItemStore>>,
    items: ItemNames,
    poll_interval: Duration,
    baseline_timeout: Duration,
}

impl<S> Clone for SensorPoller<S> {
    fn clone(&self) -> Self {
        Self {
            sensor: self.sensor.clone(),
            policy: self.policy.clone(),
            store: self.store.clone(),
            items: self.items.clone(),
            poll_interval: self.poll_interval,
            baseline_timeout: self.baseline_timeout,
        }
    }
}

impl<S> SensorPoller<S>
where
    S: ClimateSensor + Send + Sync + 'static,
{
    pub fn new(
        sensor: Arc<S>,
        store: Option<Arc<dyn ItemStore>>,
        config: &SensorConfig,
        items: &ItemNames,
    ) -> Self {
        Self {
            sensor,
            policy: Arc::new(Mutex::new(SensorPollingPolicy::new(config, items))),
            store,
            items: items.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            baseline_timeout: Duration::from_millis(config.baseline_timeout_ms),
        }
    }

    pub fn baselines(&self) -> (f32, f32) {
        let policy = self.policy.lock().unwrap_or_else(PoisonError::into_inner);
        (
            policy.temperature().last_published(),
            policy.humidity().last_published(),
        )
    }

    pub async fn load_baselines(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let temperature = self.fetch_baseline(store.as_ref(), &self.items.temperature).await;
        let humidity = self.fetch_baseline(store.as_ref(), &self.items.humidity).await;
        info!("sensor baselines: {temperature:.1} °C, {humidity:.1} %");

        self.policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_baselines(temperature, humidity);
    }

    async fn fetch_baseline(&self, store: &dyn ItemStore, item: &str) -> f32 {
        match tokio::time::timeout(self.baseline_timeout, store.get_item(item)).await {
            Ok(Ok(item)) => parse_state(&item.state),
            Ok(Err(err)) => {
                warn!("no baseline for `{item}`: {err}");
                0.0
            }
            Err(_) => {
                warn!("baseline fetch of `{item}` timed out");
                0.0
            }
        }
    }

    pub fn start(&self, scheduler: &Scheduler) -> ScheduledTask {
        let poller = self.clone();
        scheduler.schedule_with_fixed_delay(self.poll_interval, self.poll_interval, move || {
            let poller = poller.clone();
            async move {
                poller.tick().await;
            }
        })
    }

    pub async fn tick(&self) -> Option<CycleReport> {
        let sensor = self.sensor.clone();
        let policy = self.policy.clone();
        let report = match tokio::task::spawn_blocking(move || {
            policy
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .run_cycle(sensor.as_ref())
        })
        .await
        {
            Ok(report) => report,
            Err(err) => {
                warn!("sensor poll task failed: {err}");
                return None;
            }
        };

        match (&report.reading, &report.last_error) {
            (Some(reading), _) => debug!(
                "DHT22 {:.1} °C {:.1} % after {} attempt(s)",
                reading.temperature_celsius, reading.humidity_percent, report.attempts
            ),
            (None, Some(err)) => warn!(
                "DHT22 read failed {} times, last error (code {}): {err}",
                report.attempts,
                err.code()
            ),
            (None, None) => {}
        }

        for publication in &report.publications {
            info!("publishing {} = {}", publication.item, publication.state);
            if let Some(store) = &self.store {
                store.submit_item(&publication.item, &publication.state);
            }
        }

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use hab_node_common::{
        Item, MemoryItemStore, ReadError, SensorReading, StoreError, ITEM_HUMIDITY,
        ITEM_TEMPERATURE,
    };
    use pretty_assertions::assert_eq;
    use tokio::runtime::Handle;

    use super::*;

    struct FakeSensor {
        calls: AtomicU32,
        reading: Option<SensorReading>,
    }

    impl FakeSensor {
        fn reading(temperature: f32, humidity: f32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reading: Some(SensorReading {
                    temperature_celsius: temperature,
                    humidity_percent: humidity,
                    valid: true,
                }),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                reading: None,
            })
        }
    }

    impl ClimateSensor for FakeSensor {
        fn read(&self) -> Result<SensorReading, ReadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reading.ok_or(ReadError::TimeoutHighPulse)
        }
    }

    struct HangingStore;

    #[async_trait]
    impl ItemStore for HangingStore {
        async fn get_item(&self, _name: &str) -> Result<Item, StoreError> {
            std::future::pending().await
        }

        fn submit_item(&self, _name: &str, _state: &str) {}
    }

    fn poller<S: ClimateSensor + Send + Sync + 'static>(
        sensor: Arc<S>,
        store: Option<Arc<dyn ItemStore>>,
    ) -> SensorPoller<S> {
        SensorPoller::new(sensor, store, &SensorConfig::default(), &ItemNames::default())
    }

    #[tokio::test]
    async fn only_significant_changes_are_submitted() {
        let store = Arc::new(MemoryItemStore::with_items([
            (ITEM_TEMPERATURE, "20.0"),
            (ITEM_HUMIDITY, "50.0"),
        ]));
        let poller = poller(FakeSensor::reading(20.05, 52.04), Some(store.clone()));

        poller.load_baselines().await;
        poller.tick().await.unwrap();

        assert_eq!(
            store.submissions(),
            vec![Item {
                name: ITEM_HUMIDITY.to_string(),
                state: "52.0".to_string(),
            }]
        );
        assert_eq!(store.state(ITEM_HUMIDITY).as_deref(), Some("52.0"));
        assert_eq!(poller.baselines(), (20.0, 52.0));
    }

    #[tokio::test]
    async fn malformed_baseline_counts_as_zero() {
        let store = Arc::new(MemoryItemStore::with_items([(ITEM_TEMPERATURE, "NULL")]));
        let poller = poller(FakeSensor::reading(0.0, 0.0), Some(store));

        poller.load_baselines().await;

        assert_eq!(poller.baselines(), (0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_store_yields_zero_baselines() {
        let poller = poller(FakeSensor::reading(0.0, 0.0), Some(Arc::new(HangingStore)));

        poller.load_baselines().await;

        assert_eq!(poller.baselines(), (0.0, 0.0));
    }

    #[tokio::test]
    async fn failing_sensor_is_retried_then_waited_out() {
        let store = Arc::new(MemoryItemStore::default());
        let sensor = FakeSensor::broken();
        let poller = poller(sensor.clone(), Some(store.clone()));

        let report = poller.tick().await.unwrap();

        assert_eq!(report.attempts, 11);
        assert_eq!(report.last_error, Some(ReadError::TimeoutHighPulse));
        assert_eq!(sensor.calls.load(Ordering::SeqCst), 11);
        assert!(store.submissions().is_empty());
    }

    #[tokio::test]
    async fn scheduled_polling_repeats() {
        let sensor = FakeSensor::reading(21.0, 40.0);
        let config = SensorConfig {
            poll_interval_ms: 20,
            ..SensorConfig::default()
        };
        let poller = SensorPoller::new(sensor.clone(), None, &config, &ItemNames::default());

        let task = poller.start(&Scheduler::from_handle(Handle::current()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        task.cancel();

        assert!(sensor.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(poller.baselines(), (21.0, 40.0));
    }
}
