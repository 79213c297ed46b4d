use std::time::{Duration, Instant};

use hab_node_common::{DigitalLine, GpioError, Level, PinMode, PwmLine, MAX_DUTY};
use rppal::{
    gpio::{self, Gpio, IoPin, Mode, OutputPin},
    pwm::{Channel, Polarity, Pwm},
};

use super::{GpioBackend, PinClaim};

const PWM_FREQUENCY_HZ: f64 = 1_000.0;

fn hardware_error(pin: u8, err: impl std::fmt::Display) -> GpioError {
    GpioError::Hardware {
        pin,
        message: err.to_string(),
    }
}

fn duty_fraction(duty: u16) -> Result<f64, GpioError> {
    if duty > MAX_DUTY {
        return Err(GpioError::DutyOutOfRange(duty));
    }
    Ok(f64::from(duty) / f64::from(MAX_DUTY))
}

pub struct RpiBackend {
    gpio: Gpio,
}

impl RpiBackend {
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|err| hardware_error(0, err))?;
        Ok(Self { gpio })
    }
}

impl GpioBackend for RpiBackend {
    fn sensor_line(&self, claim: PinClaim) -> Result<Box<dyn DigitalLine>, GpioError> {
        let pin = claim.pin();
        let io = self
            .gpio
            .get(pin)
            .map_err(|err| hardware_error(pin, err))?
            .into_io(Mode::Output);
        Ok(Box::new(RpiLine { claim, io }))
    }

    fn dimmer(&self, claim: PinClaim) -> Result<Box<dyn PwmLine>, GpioError> {
        let pin = claim.pin();
        let channel = match pin {
            12 | 18 => Some(Channel::Pwm0),
            13 | 19 => Some(Channel::Pwm1),
            _ => None,
        };

        match channel {
            Some(channel) => {
                let pwm = Pwm::with_frequency(channel, PWM_FREQUENCY_HZ, 0.0, Polarity::Normal, true)
                    .map_err(|err| hardware_error(pin, err))?;
                Ok(Box::new(HardwareDimmer { claim, pwm }))
            }
            None => {
                let output = self
                    .gpio
                    .get(pin)
                    .map_err(|err| hardware_error(pin, err))?
                    .into_output_low();
                Ok(Box::new(SoftwareDimmer { claim, output }))
            }
        }
    }
}

struct RpiLine {
    claim: PinClaim,
    io: IoPin,
}

impl DigitalLine for RpiLine {
    fn pin(&self) -> u8 {
        self.claim.pin()
    }

    fn set_mode(&mut self, mode: PinMode) -> Result<(), GpioError> {
        self.io.set_mode(match mode {
            PinMode::Input => Mode::Input,
            PinMode::Output => Mode::Output,
        });
        Ok(())
    }

    fn write(&mut self, level: Level) -> Result<(), GpioError> {
        self.io.write(match level {
            Level::Low => gpio::Level::Low,
            Level::High => gpio::Level::High,
        });
        Ok(())
    }

    fn read(&mut self) -> Level {
        match self.io.read() {
            gpio::Level::Low => Level::Low,
            gpio::Level::High => Level::High,
        }
    }

    // Sleeping this short overshoots by tens of microseconds; spin instead.
    fn delay_us(&mut self, us: u32) {
        let until = Instant::now() + Duration::from_micros(u64::from(us));
        while Instant::now() < until {
            std::hint::spin_loop();
        }
    }
}

struct HardwareDimmer {
    claim: PinClaim,
    pwm: Pwm,
}

impl PwmLine for HardwareDimmer {
    fn pin(&self) -> u8 {
        self.claim.pin()
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), GpioError> {
        let fraction = duty_fraction(duty)?;
        self.pwm
            .set_duty_cycle(fraction)
            .map_err(|err| hardware_error(self.pin(), err))
    }
}

struct SoftwareDimmer {
    claim: PinClaim,
    output: OutputPin,
}

impl PwmLine for SoftwareDimmer {
    fn pin(&self) -> u8 {
        self.claim.pin()
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), GpioError> {
        let fraction = duty_fraction(duty)?;
        if duty == 0 {
            self.output
                .clear_pwm()
                .map_err(|err| hardware_error(self.pin(), err))?;
            self.output.set_low();
            return Ok(());
        }
        self.output
            .set_pwm_frequency(PWM_FREQUENCY_HZ, fraction)
            .map_err(|err| hardware_error(self.pin(), err))
    }
}
