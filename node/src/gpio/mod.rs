use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, PoisonError},
};

use hab_node_common::{DigitalLine, GpioError, PwmLine};

#[cfg(feature = "rpi")]
pub mod rpi;
pub mod sim;

// Each opened line keeps its claim, so the pin stays taken until the line is dropped.
pub trait GpioBackend {
    fn sensor_line(&self, claim: PinClaim) -> Result<Box<dyn DigitalLine>, GpioError>;

    fn dimmer(&self, claim: PinClaim) -> Result<Box<dyn PwmLine>, GpioError>;
}

#[derive(Debug, Clone, Default)]
pub struct PinRegistry {
    claimed: Arc<Mutex<BTreeSet<u8>>>,
}

impl PinRegistry {
    pub fn claim(&self, pin: u8) -> Result<PinClaim, GpioError> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(pin) {
            return Err(GpioError::PinClaimed(pin));
        }
        Ok(PinClaim {
            pin,
            claimed: self.claimed.clone(),
        })
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&pin)
    }
}

#[derive(Debug)]
pub struct PinClaim {
    pin: u8,
    claimed: Arc<Mutex<BTreeSet<u8>>>,
}

impl PinClaim {
    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl Drop for PinClaim {
    fn drop(&mut self) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pin);
    }
}
