use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use hab_node_common::{ItemStore, MqttConfig, NodeConfig, PresenceEngine};
use tokio::io::BufReader;
use tracing::{debug, info, warn};

use crate::{
    decoder::{DecoderSettings, Dht22Decoder},
    display::{DisplaySurface, LogDisplay},
    gpio::{GpioBackend, PinRegistry},
    input::run_input_source,
    mqtt_store::MqttItemStore,
    poller::SensorPoller,
    presence::{PresenceController, PresenceOracle},
    scheduler::Scheduler,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_store = ConfigStore::new();
    let mut config = config_store.load().await?;
    apply_env_overrides(&mut config.mqtt, |key| std::env::var(key).ok());
    config.sanitize();
    debug!(
        "effective config: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );

    let backend = build_backend()?;
    let pins = PinRegistry::default();
    let sensor_pin = pins
        .claim(config.sensor.pin)
        .context("failed to claim the sensor pin")?;
    let dimmer_pin = pins
        .claim(config.presence.dimmer_pin)
        .context("failed to claim the dimmer pin")?;

    let item_store: Option<Arc<dyn ItemStore>> = if config.mqtt.host.is_empty() {
        info!("MQTT host not set, running without an item store");
        None
    } else {
        let store: Arc<dyn ItemStore> = MqttItemStore::connect(&config.mqtt);
        Some(store)
    };

    let scheduler = Scheduler::spawn_dedicated("hab-scheduler")?;

    let line = backend
        .sensor_line(sensor_pin)
        .context("failed to open the sensor line")?;
    let decoder = Dht22Decoder::new(line, DecoderSettings::from(&config.sensor))
        .context("failed to idle the sensor line")?;
    let poller = SensorPoller::new(
        Arc::new(decoder),
        item_store.clone(),
        &config.sensor,
        &config.items,
    );
    poller.load_baselines().await;
    let _poll_task = poller.start(&scheduler);

    let display: Arc<dyn DisplaySurface> = Arc::new(LogDisplay::new());
    let dimmer = backend
        .dimmer(dimmer_pin)
        .context("failed to open the dimmer output")?;
    let controller = PresenceController::new(
        PresenceEngine::new(config.presence.clone()),
        dimmer,
        scheduler.clone(),
        display,
        PresenceOracle::new(item_store, &config.presence, &config.items),
    );
    controller.start().await;

    let input = tokio::spawn({
        let controller = controller.clone();
        async move {
            if let Err(err) = run_input_source(BufReader::new(tokio::io::stdin()), controller).await {
                warn!("input source failed: {err}");
            }
        }
    });

    info!(
        "node running: DHT22 on GPIO{}, dimmer on GPIO{}",
        config.sensor.pin, config.presence.dimmer_pin
    );
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    input.abort();
    Ok(())
}

#[cfg(feature = "rpi")]
fn build_backend() -> anyhow::Result<Box<dyn GpioBackend>> {
    let backend = crate::gpio::rpi::RpiBackend::new().context("failed to open GPIO")?;
    info!("using Raspberry Pi GPIO");
    Ok(Box::new(backend))
}

#[cfg(not(feature = "rpi"))]
fn build_backend() -> anyhow::Result<Box<dyn GpioBackend>> {
    use crate::gpio::sim::SimBackend;

    let corrupt_every = std::env::var("HAB_NODE_SIM_CORRUPT_EVERY")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(25);
    info!("using simulated GPIO");
    Ok(Box::new(SimBackend::default().with_corruption(corrupt_every)))
}

fn apply_env_overrides(mqtt: &mut MqttConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("MQTT_HOST") {
        mqtt.host = host;
    }
    if let Some(port) = var("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        mqtt.port = port;
    }
    if let Some(user) = var("MQTT_USER") {
        mqtt.user = user;
        mqtt.pass = var("MQTT_PASS").unwrap_or_default();
    }
}

struct ConfigStore {
    runtime_path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("HAB_NODE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.hab-node"));
        Self::at(&data_dir)
    }

    fn at(data_dir: &Path) -> Self {
        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<NodeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => NodeConfig::from_json_slice(&raw)
                .with_context(|| format!("invalid config in {}", self.runtime_path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    "no config at {}, using defaults",
                    self.runtime_path.display()
                );
                Ok(NodeConfig::default())
            }
            Err(err) => Err(err)
                .with_context(|| format!("failed to read {}", self.runtime_path.display())),
        }
    }
}
