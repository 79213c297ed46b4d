use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::gpio::{DigitalLine, GpioError, Level, PinMode};

/// Spin ceiling while polling the line. Any count reaching it is a timeout.
pub const MAX_POLL_COUNT: u32 = 32_000;

pub const BIT_PULSES: usize = 41;

pub const TRAIN_LEN: usize = BIT_PULSES * 2;

pub const FRAME_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("timed out waiting for the sensor acknowledgement")]
    TimeoutAck,
    #[error("timed out counting a low pulse")]
    TimeoutLowPulse,
    #[error("timed out counting a high pulse")]
    TimeoutHighPulse,
    #[error("checksum mismatch: expected {expected:#04x}, received {received:#04x}")]
    ChecksumMismatch { expected: u8, received: u8 },
    #[error("internal decoder error: {0}")]
    Internal(String),
}

impl ReadError {
    pub fn code(&self) -> u8 {
        match self {
            Self::TimeoutAck => 1,
            Self::TimeoutLowPulse => 2,
            Self::TimeoutHighPulse => 3,
            Self::ChecksumMismatch { .. } => 4,
            Self::Internal(_) => 5,
        }
    }
}

impl From<GpioError> for ReadError {
    fn from(err: GpioError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReading {
    pub temperature_celsius: f32,
    pub humidity_percent: f32,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame([u8; FRAME_LEN]);

impl SensorFrame {
    pub fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_measurement(temperature_celsius: f32, humidity_percent: f32) -> Self {
        let humidity = (humidity_percent * 10.0).round().clamp(0.0, 1_000.0) as u16;
        let magnitude = (temperature_celsius.abs() * 10.0).round().min(f32::from(0x7FFF_u16)) as u16;
        let [humidity_hi, humidity_lo] = humidity.to_be_bytes();
        let [mut temp_hi, temp_lo] = magnitude.to_be_bytes();
        if temperature_celsius < 0.0 && magnitude != 0 {
            temp_hi |= 0x80;
        }

        let mut frame = Self([humidity_hi, humidity_lo, temp_hi, temp_lo, 0]);
        frame.0[4] = frame.expected_checksum();
        frame
    }

    pub fn bytes(&self) -> [u8; FRAME_LEN] {
        self.0
    }

    pub fn checksum(&self) -> u8 {
        self.0[4]
    }

    pub fn expected_checksum(&self) -> u8 {
        self.0[..4]
            .iter()
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
    }

    pub fn verify(&self) -> Result<(), ReadError> {
        let expected = self.expected_checksum();
        if expected == self.checksum() {
            Ok(())
        } else {
            Err(ReadError::ChecksumMismatch {
                expected,
                received: self.checksum(),
            })
        }
    }

    pub fn humidity_percent(&self) -> f32 {
        f32::from(u16::from_be_bytes([self.0[0], self.0[1]])) / 10.0
    }

    pub fn temperature_celsius(&self) -> f32 {
        let magnitude = f32::from(u16::from_be_bytes([self.0[2] & 0x7F, self.0[3]])) / 10.0;
        if self.0[2] & 0x80 != 0 {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn to_reading(&self) -> SensorReading {
        SensorReading {
            temperature_celsius: self.temperature_celsius(),
            humidity_percent: self.humidity_percent(),
            valid: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTrain([u32; TRAIN_LEN]);

impl PulseTrain {
    pub fn from_counts(counts: [u32; TRAIN_LEN]) -> Self {
        Self(counts)
    }

    pub fn counts(&self) -> &[u32; TRAIN_LEN] {
        &self.0
    }

    pub fn check_timeouts(&self) -> Result<(), ReadError> {
        match self.0.iter().position(|count| *count >= MAX_POLL_COUNT) {
            Some(index) if index % 2 == 0 => Err(ReadError::TimeoutLowPulse),
            Some(_) => Err(ReadError::TimeoutHighPulse),
            None => Ok(()),
        }
    }

    /// Mean low width of the data pulses, the ~50µs reference separating a
    /// short (0) high pulse from a long (1) one. The lead-in pulse is skipped.
    pub fn threshold(&self) -> u32 {
        let total: u64 = self.0[2..]
            .iter()
            .step_by(2)
            .map(|count| u64::from(*count))
            .sum();
        (total / (BIT_PULSES as u64 - 1)) as u32
    }

    pub fn decode(&self) -> Result<SensorFrame, ReadError> {
        self.check_timeouts()?;

        let threshold = self.threshold();
        let mut bytes = [0u8; FRAME_LEN];
        for (bit, high) in self.0[3..].iter().step_by(2).enumerate() {
            let byte = &mut bytes[bit / 8];
            *byte <<= 1;
            if *high >= threshold {
                *byte |= 1;
            }
        }

        let frame = SensorFrame::new(bytes);
        frame.verify()?;
        Ok(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionTiming {
    pub wake_low_ms: u32,
    pub settle_us: u32,
}

impl Default for TransactionTiming {
    fn default() -> Self {
        Self {
            wake_low_ms: 20,
            settle_us: 10,
        }
    }
}

fn count_while<L: DigitalLine + ?Sized>(line: &mut L, level: Level) -> Option<u32> {
    let mut count = 0;
    while line.read() == level {
        count += 1;
        if count >= MAX_POLL_COUNT {
            return None;
        }
    }
    Some(count)
}

/// Wakes the sensor and records the widths of every pulse it answers with.
///
/// The caller owns the line for the whole call. `cancel` is checked between
/// pulses; every individual poll loop is bounded by [`MAX_POLL_COUNT`].
pub fn capture_pulse_train<L: DigitalLine + ?Sized>(
    line: &mut L,
    timing: &TransactionTiming,
    cancel: &AtomicBool,
) -> Result<PulseTrain, ReadError> {
    line.set_mode(PinMode::Output)?;
    line.write(Level::Low)?;
    line.delay_ms(timing.wake_low_ms);

    line.set_mode(PinMode::Input)?;
    line.delay_us(timing.settle_us);

    count_while(line, Level::High).ok_or(ReadError::TimeoutAck)?;

    let mut counts = [0u32; TRAIN_LEN];
    for pulse in counts.chunks_exact_mut(2) {
        if cancel.load(Ordering::Relaxed) {
            return Err(ReadError::Internal("capture cancelled".to_string()));
        }
        pulse[0] = count_while(line, Level::Low).ok_or(ReadError::TimeoutLowPulse)?;
        pulse[1] = count_while(line, Level::High).ok_or(ReadError::TimeoutHighPulse)?;
    }

    Ok(PulseTrain(counts))
}

pub fn release_line<L: DigitalLine + ?Sized>(line: &mut L) -> Result<(), GpioError> {
    line.set_mode(PinMode::Output)?;
    line.write(Level::High)
}

/// Runs one complete transaction and always leaves the line idle afterwards.
pub fn transact<L: DigitalLine + ?Sized>(
    line: &mut L,
    timing: &TransactionTiming,
    cancel: &AtomicBool,
) -> Result<SensorFrame, ReadError> {
    let result = capture_pulse_train(line, timing, cancel).and_then(|train| train.decode());
    let released = release_line(line);

    match (result, released) {
        (Ok(_), Err(err)) => Err(err.into()),
        (result, _) => result,
    }
}
