pub mod decoder;
pub mod display;
pub mod gpio;
pub mod host;
pub mod input;
pub mod mqtt_store;
pub mod poller;
pub mod presence;
pub mod realtime;
pub mod scheduler;
