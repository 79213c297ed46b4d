use std::{
    collections::VecDeque,
    f32::consts::TAU,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use hab_node_common::{
    dht22::FRAME_LEN, DigitalLine, GpioError, Level, PinMode, PwmLine, SensorFrame, MAX_DUTY,
};
use tracing::{debug, info};

use super::{GpioBackend, PinClaim};

const MIN_WAKE_MS: u32 = 18;

// Poll counts per waveform segment, roughly one per microsecond.
const ACK_HIGH: u32 = 20;
const PREAMBLE: u32 = 80;
const BIT_LOW: u32 = 50;
const BIT_ZERO_HIGH: u32 = 27;
const BIT_ONE_HIGH: u32 = 70;

#[derive(Debug, Clone, Copy)]
pub struct SimulatedClimate {
    base_temperature: f32,
    base_humidity: f32,
    amplitude: f32,
    period: Duration,
    origin: Instant,
}

impl SimulatedClimate {
    pub fn fixed(temperature: f32, humidity: f32) -> Self {
        Self::drifting(temperature, humidity, 0.0, Duration::from_secs(3_600))
    }

    pub fn drifting(temperature: f32, humidity: f32, amplitude: f32, period: Duration) -> Self {
        Self {
            base_temperature: temperature,
            base_humidity: humidity,
            amplitude,
            period,
            origin: Instant::now(),
        }
    }

    pub fn sample(&self) -> (f32, f32) {
        let phase = self.origin.elapsed().as_secs_f32() / self.period.as_secs_f32().max(1.0);
        let swing = self.amplitude * (phase * TAU).sin();
        (
            self.base_temperature + swing,
            (self.base_humidity - swing * 2.0).clamp(0.0, 100.0),
        )
    }
}

impl Default for SimulatedClimate {
    fn default() -> Self {
        Self::drifting(21.0, 45.0, 0.8, Duration::from_secs(600))
    }
}

// Answers every wake pulse of at least MIN_WAKE_MS with the current climate.
pub struct SimulatedDht22 {
    claim: PinClaim,
    climate: SimulatedClimate,
    corrupt_every: Option<u32>,
    transactions: u32,
    mode: PinMode,
    driven: Level,
    held_low_ms: u32,
    segments: VecDeque<(Level, u32)>,
}

impl SimulatedDht22 {
    pub fn new(claim: PinClaim, climate: SimulatedClimate) -> Self {
        Self {
            claim,
            climate,
            corrupt_every: None,
            transactions: 0,
            mode: PinMode::Input,
            driven: Level::High,
            held_low_ms: 0,
            segments: VecDeque::new(),
        }
    }

    pub fn corrupt_every(mut self, n: u32) -> Self {
        self.corrupt_every = (n > 0).then_some(n);
        self
    }

    fn respond(&mut self) {
        self.transactions = self.transactions.wrapping_add(1);
        let (temperature, humidity) = self.climate.sample();
        let mut bytes = SensorFrame::from_measurement(temperature, humidity).bytes();
        if self
            .corrupt_every
            .is_some_and(|n| self.transactions % n == 0)
        {
            bytes[FRAME_LEN - 1] ^= 0x01;
            debug!("simulated DHT22 corrupting frame {}", self.transactions);
        }

        self.segments.clear();
        self.segments.push_back((Level::High, ACK_HIGH));
        self.segments.push_back((Level::Low, PREAMBLE));
        self.segments.push_back((Level::High, PREAMBLE));
        for bit in 0..FRAME_LEN * 8 {
            let set = bytes[bit / 8] & (0x80 >> (bit % 8)) != 0;
            self.segments.push_back((Level::Low, BIT_LOW));
            self.segments
                .push_back((Level::High, if set { BIT_ONE_HIGH } else { BIT_ZERO_HIGH }));
        }
        self.segments.push_back((Level::Low, BIT_LOW));
    }
}

impl DigitalLine for SimulatedDht22 {
    fn pin(&self) -> u8 {
        self.claim.pin()
    }

    fn set_mode(&mut self, mode: PinMode) -> Result<(), GpioError> {
        if mode == PinMode::Input && self.mode == PinMode::Output && self.held_low_ms >= MIN_WAKE_MS
        {
            self.respond();
        }
        if mode == PinMode::Output {
            self.segments.clear();
        }
        self.held_low_ms = 0;
        self.mode = mode;
        Ok(())
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.driven = level;
        self.held_low_ms = 0;
        Ok(())
    }

    fn read(&mut self) -> Level {
        if self.mode == PinMode::Output {
            return self.driven;
        }
        while let Some((level, remaining)) = self.segments.front_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return *level;
            }
            self.segments.pop_front();
        }
        Level::High
    }

    fn delay_ms(&mut self, ms: u32) {
        if self.mode == PinMode::Output && self.driven == Level::Low {
            self.held_low_ms = self.held_low_ms.saturating_add(ms);
        }
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

#[derive(Debug, Clone, Default)]
pub struct DimmerLevel(Arc<AtomicU16>);

impl DimmerLevel {
    pub fn get(&self) -> u16 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct LoggingDimmer {
    claim: PinClaim,
    level: DimmerLevel,
}

impl LoggingDimmer {
    pub fn new(claim: PinClaim) -> Self {
        Self {
            claim,
            level: DimmerLevel::default(),
        }
    }

    pub fn level(&self) -> DimmerLevel {
        self.level.clone()
    }
}

impl PwmLine for LoggingDimmer {
    fn pin(&self) -> u8 {
        self.claim.pin()
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), GpioError> {
        if duty > MAX_DUTY {
            return Err(GpioError::DutyOutOfRange(duty));
        }
        self.level.0.store(duty, Ordering::SeqCst);
        info!("dimmer GPIO{} duty {duty}/{MAX_DUTY}", self.pin());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimBackend {
    climate: SimulatedClimate,
    corrupt_every: Option<u32>,
}

impl SimBackend {
    pub fn with_corruption(mut self, every: u32) -> Self {
        self.corrupt_every = (every > 0).then_some(every);
        self
    }
}

impl GpioBackend for SimBackend {
    fn sensor_line(&self, claim: PinClaim) -> Result<Box<dyn DigitalLine>, GpioError> {
        let mut line = SimulatedDht22::new(claim, self.climate);
        if let Some(every) = self.corrupt_every {
            line = line.corrupt_every(every);
        }
        Ok(Box::new(line))
    }

    fn dimmer(&self, claim: PinClaim) -> Result<Box<dyn PwmLine>, GpioError> {
        Ok(Box::new(LoggingDimmer::new(claim)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use hab_node_common::{dht22, ReadError, TransactionTiming};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::gpio::PinRegistry;

    fn claim(pin: u8) -> PinClaim {
        PinRegistry::default().claim(pin).unwrap()
    }

    #[test]
    fn short_wake_pulse_gets_no_answer() {
        let mut line = SimulatedDht22::new(claim(27), SimulatedClimate::fixed(20.0, 50.0));
        let timing = TransactionTiming {
            wake_low_ms: 5,
            settle_us: 10,
        };

        let result = dht22::transact(&mut line, &timing, &AtomicBool::new(false));

        assert_eq!(result, Err(ReadError::TimeoutAck));
    }

    #[test]
    fn answers_with_the_current_climate() {
        let mut line = SimulatedDht22::new(claim(27), SimulatedClimate::fixed(23.7, 61.2));

        let frame =
            dht22::transact(&mut line, &TransactionTiming::default(), &AtomicBool::new(false))
                .unwrap();

        assert_eq!(frame.temperature_celsius(), 23.7);
        assert_eq!(frame.humidity_percent(), 61.2);
    }

    #[test]
    fn dimmer_rejects_out_of_range_duty() {
        let mut dimmer = LoggingDimmer::new(claim(18));
        let level = dimmer.level();

        dimmer.set_duty_cycle(150).unwrap();
        assert!(matches!(
            dimmer.set_duty_cycle(1_001),
            Err(GpioError::DutyOutOfRange(1_001))
        ));
        assert_eq!(level.get(), 150);
    }
}
