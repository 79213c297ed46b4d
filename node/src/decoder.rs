use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use hab_node_common::{
    dht22::{self, release_line},
    ClimateSensor, DigitalLine, ReadError, SensorConfig, SensorFrame, SensorReading,
    TransactionTiming,
};
use tracing::{debug, warn};

use crate::realtime::RealtimeGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderSettings {
    pub min_interval: Duration,
    pub join_timeout: Duration,
    pub timing: TransactionTiming,
}

impl From<&SensorConfig> for DecoderSettings {
    fn from(config: &SensorConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            join_timeout: Duration::from_millis(config.join_timeout_ms),
            timing: config.timing(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub started: Instant,
    pub finished: Instant,
}

// Only ever locked briefly, never across a transaction.
struct Timeline {
    next_start: Instant,
    last_transaction: Option<Transaction>,
}

impl Timeline {
    fn wait(&self) -> Duration {
        self.next_start.saturating_duration_since(Instant::now())
    }
}

// Only the worker thread locks the line, so callers wait at most `join_timeout`.
pub struct Dht22Decoder {
    line: Arc<Mutex<Box<dyn DigitalLine>>>,
    timeline: Arc<Mutex<Timeline>>,
    last: Mutex<SensorReading>,
    call: Mutex<()>,
    settings: DecoderSettings,
}

impl Dht22Decoder {
    pub fn new(mut line: Box<dyn DigitalLine>, settings: DecoderSettings) -> Result<Self, ReadError> {
        release_line(line.as_mut())?;
        debug!("DHT22 on GPIO{} idle", line.pin());

        Ok(Self {
            line: Arc::new(Mutex::new(line)),
            timeline: Arc::new(Mutex::new(Timeline {
                next_start: Instant::now() + settings.min_interval,
                last_transaction: None,
            })),
            last: Mutex::new(SensorReading::default()),
            call: Mutex::new(()),
            settings,
        })
    }

    pub fn read(&self) -> Result<SensorReading, ReadError> {
        let _call = self.call.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.run_transaction();

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(frame) => {
                *last = frame.to_reading();
                Ok(*last)
            }
            Err(err) => {
                last.valid = false;
                Err(err)
            }
        }
    }

    pub fn temperature(&self) -> f32 {
        self.reading().temperature_celsius
    }

    pub fn humidity(&self) -> f32 {
        self.reading().humidity_percent
    }

    pub fn reading(&self) -> SensorReading {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_transaction(&self) -> Option<Transaction> {
        self.timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_transaction
    }

    fn run_transaction(&self) -> Result<SensorFrame, ReadError> {
        let wait = self.timeline.lock().unwrap_or_else(PoisonError::into_inner).wait();
        if !wait.is_zero() {
            thread::sleep(wait);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = mpsc::channel();
        let line = self.line.clone();
        let timeline = self.timeline.clone();
        let worker_cancel = cancel.clone();
        let timing = self.settings.timing;
        let min_interval = self.settings.min_interval;

        thread::Builder::new()
            .name("dht22".to_string())
            .spawn(move || {
                let mut line = line.lock().unwrap_or_else(PoisonError::into_inner);
                if worker_cancel.load(Ordering::Relaxed) {
                    return;
                }
                // An overrunning predecessor may have held the line past the caller's wait.
                let wait = timeline.lock().unwrap_or_else(PoisonError::into_inner).wait();
                if !wait.is_zero() {
                    thread::sleep(wait);
                }

                let priority = RealtimeGuard::acquire();
                let started = Instant::now();
                let result = dht22::transact(line.as_mut(), &timing, &worker_cancel);
                let finished = Instant::now();
                drop(priority);

                {
                    let mut timeline = timeline.lock().unwrap_or_else(PoisonError::into_inner);
                    timeline.last_transaction = Some(Transaction { started, finished });
                    timeline.next_start = finished + min_interval;
                }
                drop(line);
                let _ = result_tx.send(result);
            })
            .map_err(|err| ReadError::Internal(format!("failed to spawn decoder thread: {err}")))?;

        match result_rx.recv_timeout(self.settings.join_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                warn!(
                    "DHT22 transaction exceeded {:?}, cancelling",
                    self.settings.join_timeout
                );
                Err(ReadError::Internal("transaction timed out".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(ReadError::Internal("decoder thread panicked".to_string()))
            }
        }
    }
}

impl ClimateSensor for Dht22Decoder {
    fn read(&self) -> Result<SensorReading, ReadError> {
        Dht22Decoder::read(self)
    }
}
