use crate::{
    config::{ItemNames, SensorConfig},
    dht22::{ReadError, SensorReading},
};

pub trait ClimateSensor {
    fn read(&self) -> Result<SensorReading, ReadError>;
}

pub fn parse_state(state: &str) -> f32 {
    state
        .trim()
        .parse::<f32>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

pub fn round_tenth(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

pub fn format_state(value: f32) -> String {
    format!("{:.1}", round_tenth(value))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub item: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct Hysteresis {
    item: String,
    threshold: f32,
    last_published: f32,
}

impl Hysteresis {
    pub fn new(item: impl Into<String>, threshold: f32, baseline: f32) -> Self {
        Self {
            item: item.into(),
            threshold,
            last_published: baseline,
        }
    }

    pub fn last_published(&self) -> f32 {
        self.last_published
    }

    pub fn set_baseline(&mut self, baseline: f32) {
        self.last_published = baseline;
    }

    pub fn offer(&mut self, value: f32) -> Option<Publication> {
        if !value.is_finite() {
            return None;
        }

        let diff = value - self.last_published;
        if diff.abs() < self.threshold {
            return None;
        }

        let state = format_state(value);
        self.last_published = parse_state(&state);
        Some(Publication {
            item: self.item.clone(),
            state,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub attempts: u32,
    pub reading: Option<SensorReading>,
    pub last_error: Option<ReadError>,
    pub publications: Vec<Publication>,
}

#[derive(Debug, Clone)]
pub struct SensorPollingPolicy {
    max_retries: u32,
    retries: u32,
    temperature: Hysteresis,
    humidity: Hysteresis,
}

impl SensorPollingPolicy {
    pub fn new(config: &SensorConfig, items: &ItemNames) -> Self {
        Self {
            max_retries: config.max_retries,
            retries: 0,
            temperature: Hysteresis::new(&items.temperature, config.temperature_threshold, 0.0),
            humidity: Hysteresis::new(&items.humidity, config.humidity_threshold, 0.0),
        }
    }

    pub fn temperature(&self) -> &Hysteresis {
        &self.temperature
    }

    pub fn humidity(&self) -> &Hysteresis {
        &self.humidity
    }

    pub fn set_baselines(&mut self, temperature: f32, humidity: f32) {
        self.temperature.set_baseline(temperature);
        self.humidity.set_baseline(humidity);
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn run_cycle<S: ClimateSensor + ?Sized>(&mut self, sensor: &S) -> CycleReport {
        self.retries = 0;
        let mut last_error = None;

        loop {
            match sensor.read() {
                Ok(reading) => {
                    let publications = self
                        .temperature
                        .offer(reading.temperature_celsius)
                        .into_iter()
                        .chain(self.humidity.offer(reading.humidity_percent))
                        .collect();
                    return CycleReport {
                        attempts: self.retries + 1,
                        reading: Some(reading),
                        last_error,
                        publications,
                    };
                }
                Err(err) => {
                    last_error = Some(err);
                    if self.retries >= self.max_retries {
                        break;
                    }
                    self.retries += 1;
                }
            }
        }

        CycleReport {
            attempts: self.retries + 1,
            reading: None,
            last_error,
            publications: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;

    struct FakeSensor {
        failures_before_success: Cell<u32>,
        calls: Cell<u32>,
        reading: SensorReading,
    }

    impl FakeSensor {
        fn new(failures_before_success: u32, temperature: f32, humidity: f32) -> Self {
            Self {
                failures_before_success: Cell::new(failures_before_success),
                calls: Cell::new(0),
                reading: SensorReading {
                    temperature_celsius: temperature,
                    humidity_percent: humidity,
                    valid: true,
                },
            }
        }
    }

    impl ClimateSensor for FakeSensor {
        fn read(&self) -> Result<SensorReading, ReadError> {
            self.calls.set(self.calls.get() + 1);
            let remaining = self.failures_before_success.get();
            if remaining > 0 {
                self.failures_before_success.set(remaining - 1);
                return Err(ReadError::TimeoutAck);
            }
            Ok(self.reading)
        }
    }

    fn policy() -> SensorPollingPolicy {
        SensorPollingPolicy::new(&SensorConfig::default(), &ItemNames::default())
    }

    #[test]
    fn small_temperature_change_is_not_published() {
        let mut hysteresis = Hysteresis::new("Salon_Temperature2", 0.1, 20.0);
        assert_eq!(hysteresis.offer(20.05), None);
        assert_eq!(hysteresis.last_published(), 20.0);
    }

    #[test]
    fn large_temperature_change_is_published_rounded() {
        let mut hysteresis = Hysteresis::new("Salon_Temperature2", 0.1, 20.0);

        assert_eq!(
            hysteresis.offer(20.2),
            Some(Publication {
                item: "Salon_Temperature2".to_string(),
                state: "20.2".to_string(),
            })
        );
        assert_eq!(hysteresis.last_published(), 20.2);

        // Drops count too.
        assert_eq!(
            hysteresis.offer(19.96).map(|publication| publication.state),
            Some("20.0".to_string())
        );
    }

    #[test]
    fn malformed_states_parse_as_zero() {
        assert_eq!(parse_state(" 21.5 "), 21.5);
        assert_eq!(parse_state("NULL"), 0.0);
        assert_eq!(parse_state(""), 0.0);
        assert_eq!(parse_state("NaN"), 0.0);
    }

    #[test]
    fn always_failing_sensor_gets_exactly_the_retry_budget() {
        let mut policy = policy();
        let sensor = FakeSensor::new(u32::MAX, 0.0, 0.0);

        let report = policy.run_cycle(&sensor);

        assert_eq!(report.attempts, 11);
        assert_eq!(sensor.calls.get(), 11);
        assert_eq!(policy.retries(), 10);
        assert_eq!(report.last_error, Some(ReadError::TimeoutAck));
        assert!(report.publications.is_empty());

        let report = policy.run_cycle(&sensor);
        assert_eq!(report.attempts, 11);
        assert_eq!(sensor.calls.get(), 22);
    }

    #[test]
    fn retry_counter_resets_every_cycle() {
        let mut policy = policy();
        let sensor = FakeSensor::new(3, 21.0, 40.0);

        let report = policy.run_cycle(&sensor);
        assert_eq!(report.attempts, 4);
        assert_eq!(policy.retries(), 3);

        let report = policy.run_cycle(&sensor);
        assert_eq!(report.attempts, 1);
        assert_eq!(policy.retries(), 0);
    }

    #[test]
    fn first_success_publishes_against_zero_baseline() {
        let mut policy = policy();
        let sensor = FakeSensor::new(0, 21.34, 48.26);

        let report = policy.run_cycle(&sensor);

        assert_eq!(
            report.publications,
            vec![
                Publication {
                    item: "Salon_Temperature2".to_string(),
                    state: "21.3".to_string(),
                },
                Publication {
                    item: "Salon_Humidity2".to_string(),
                    state: "48.3".to_string(),
                },
            ]
        );
    }

    #[test]
    fn quantities_use_their_own_thresholds() {
        let mut policy = policy();
        policy.set_baselines(20.0, 50.0);
        let sensor = FakeSensor::new(0, 20.2, 50.3);

        let report = policy.run_cycle(&sensor);

        assert_eq!(report.publications.len(), 1);
        assert_eq!(report.publications[0].item, "Salon_Temperature2");
        assert_eq!(policy.humidity().last_published(), 50.0);
    }
}
