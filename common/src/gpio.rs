use std::{thread, time::Duration};

use thiserror::Error;

pub const MAX_DUTY: u16 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO{0} is already claimed by another component")]
    PinClaimed(u8),
    #[error("duty cycle {0} is outside 0..={MAX_DUTY}")]
    DutyOutOfRange(u16),
    #[error("GPIO{pin}: {message}")]
    Hardware { pin: u8, message: String },
}

// `read` sits in the busy-poll loop and cannot fail. Backends report failures
// from `set_mode` and `write` instead.
pub trait DigitalLine: Send {
    fn pin(&self) -> u8;

    fn set_mode(&mut self, mode: PinMode) -> Result<(), GpioError>;

    fn write(&mut self, level: Level) -> Result<(), GpioError>;

    fn read(&mut self) -> Level;

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }

    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(u64::from(us)));
    }
}

pub trait PwmLine: Send {
    fn pin(&self) -> u8;

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), GpioError>;
}
