pub mod config;
pub mod dht22;
pub mod gpio;
pub mod items;
pub mod polling;
pub mod presence;
pub mod store;

pub use config::{ItemNames, MqttConfig, NodeConfig, PresenceConfig, SensorConfig};
pub use dht22::{PulseTrain, ReadError, SensorFrame, SensorReading, TransactionTiming};
pub use gpio::{DigitalLine, GpioError, Level, PinMode, PwmLine, MAX_DUTY};
pub use items::*;
pub use polling::{ClimateSensor, CycleReport, Hysteresis, Publication, SensorPollingPolicy};
pub use presence::{
    IdleState, IdleTimer, InputEvent, InputKind, InputOutcome, PresenceAction, PresenceEngine,
    PresenceQuery, View,
};
pub use store::{Item, ItemStore, MemoryItemStore, StoreError};
