use serde::{Deserialize, Serialize};

use crate::{
    dht22::TransactionTiming,
    gpio::MAX_DUTY,
    items::{HOME_MODE_PRESENT, ITEM_HOME_MODE, ITEM_HUMIDITY, ITEM_TEMPERATURE},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub pin: u8,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub min_interval_ms: u64,
    pub wake_low_ms: u32,
    pub settle_us: u32,
    pub join_timeout_ms: u64,
    pub temperature_threshold: f32,
    pub humidity_threshold: f32,
    pub baseline_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            pin: 27,
            poll_interval_ms: 10_000,
            max_retries: 10,
            min_interval_ms: 500,
            wake_low_ms: 20,
            settle_us: 10,
            join_timeout_ms: 10_000,
            temperature_threshold: 0.1,
            humidity_threshold: 0.5,
            baseline_timeout_ms: 10_000,
        }
    }
}

impl SensorConfig {
    pub fn sanitize(&mut self) {
        self.poll_interval_ms = self.poll_interval_ms.max(2_000);
        self.max_retries = self.max_retries.min(50);
        self.min_interval_ms = self.min_interval_ms.max(500);
        self.wake_low_ms = self.wake_low_ms.clamp(18, 30);
        self.settle_us = self.settle_us.clamp(1, 40);
        self.join_timeout_ms = self.join_timeout_ms.clamp(2_000, 10_000);
        if !self.temperature_threshold.is_finite() || self.temperature_threshold < 0.0 {
            self.temperature_threshold = 0.1;
        }
        if !self.humidity_threshold.is_finite() || self.humidity_threshold < 0.0 {
            self.humidity_threshold = 0.5;
        }
    }

    pub fn timing(&self) -> TransactionTiming {
        TransactionTiming {
            wake_low_ms: self.wake_low_ms,
            settle_us: self.settle_us,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub dimmer_pin: u8,
    pub go_idle_ms: u64,
    pub confirm_idle_ms: u64,
    pub active_duty: u16,
    pub dimmed_duty: u16,
    pub idling_view: bool,
    pub present_state: String,
    pub oracle_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            dimmer_pin: 18,
            go_idle_ms: 60_000,
            confirm_idle_ms: 540_000,
            active_duty: 500,
            dimmed_duty: 150,
            idling_view: true,
            present_state: HOME_MODE_PRESENT.to_string(),
            oracle_timeout_ms: 10_000,
        }
    }
}

impl PresenceConfig {
    pub fn sanitize(&mut self) {
        self.go_idle_ms = self.go_idle_ms.max(1_000);
        self.confirm_idle_ms = self.confirm_idle_ms.max(1_000);
        self.active_duty = self.active_duty.min(MAX_DUTY);
        self.dimmed_duty = self.dimmed_duty.min(self.active_duty);
        self.oracle_timeout_ms = self.oracle_timeout_ms.clamp(100, 10_000);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemNames {
    pub temperature: String,
    pub humidity: String,
    pub home_mode: String,
}

impl Default for ItemNames {
    fn default() -> Self {
        Self {
            temperature: ITEM_TEMPERATURE.to_string(),
            humidity: ITEM_HUMIDITY.to_string(),
            home_mode: ITEM_HOME_MODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "hab-node".to_string(),
            topic_prefix: "openhab".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub sensor: SensorConfig,
    pub presence: PresenceConfig,
    pub items: ItemNames,
    pub mqtt: MqttConfig,
}

impl NodeConfig {
    pub fn from_json_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.sensor.sanitize();
        self.presence.sanitize();
        let prefix = self.mqtt.topic_prefix.trim_matches('/');
        self.mqtt.topic_prefix = if prefix.is_empty() {
            MqttConfig::default().topic_prefix
        } else {
            prefix.to_string()
        };
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config =
            NodeConfig::from_json_slice(br#"{"presence": {"go_idle_ms": 120000}}"#).unwrap();

        assert_eq!(config.presence.go_idle_ms, 120_000);
        assert_eq!(config.presence.confirm_idle_ms, 540_000);
        assert_eq!(config.sensor, SensorConfig::default());
        assert_eq!(config.items.home_mode, "Maison_mode");
    }

    #[test]
    fn sanitize_clamps_duties_and_wake_pulse() {
        let mut config = NodeConfig::default();
        config.presence.active_duty = 4_000;
        config.presence.dimmed_duty = 2_000;
        config.sensor.wake_low_ms = 2;
        config.sensor.min_interval_ms = 0;
        config.mqtt.topic_prefix = "/home/".to_string();

        config.sanitize();

        assert_eq!(config.presence.active_duty, 1_000);
        assert_eq!(config.presence.dimmed_duty, 1_000);
        assert_eq!(config.sensor.wake_low_ms, 18);
        assert_eq!(config.sensor.min_interval_ms, 500);
        assert_eq!(config.mqtt.topic_prefix, "home");
    }

    #[test]
    fn recovery_gap_from_file_cannot_drop_below_sensor_minimum() {
        let config = NodeConfig::from_json_slice(br#"{"sensor": {"min_interval_ms": 0}}"#).unwrap();

        assert_eq!(config.sensor.min_interval_ms, 500);
    }
}
