#[cfg(all(feature = "rpi", target_os = "linux"))]
mod imp {
    use tracing::{debug, warn};

    pub struct Elevated;

    pub fn elevate() -> Option<Elevated> {
        // SAFETY: sched_param is plain data and pid 0 targets the calling thread.
        unsafe {
            let mut param: libc::sched_param = std::mem::zeroed();
            param.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
            if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == 0 {
                Some(Elevated)
            } else {
                debug!(
                    "real-time priority unavailable: {}",
                    std::io::Error::last_os_error()
                );
                None
            }
        }
    }

    impl Drop for Elevated {
        fn drop(&mut self) {
            // SAFETY: same as above; SCHED_OTHER requires priority 0.
            let reverted = unsafe {
                let param: libc::sched_param = std::mem::zeroed();
                libc::sched_setscheduler(0, libc::SCHED_OTHER, &param) == 0
            };
            if !reverted {
                warn!(
                    "failed to restore normal scheduling: {}",
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

#[cfg(not(all(feature = "rpi", target_os = "linux")))]
mod imp {
    pub type Elevated = std::convert::Infallible;

    pub fn elevate() -> Option<Elevated> {
        None
    }
}

// Best-effort SCHED_FIFO for the calling thread, reverted on drop.
pub struct RealtimeGuard {
    _elevated: Option<imp::Elevated>,
}

impl RealtimeGuard {
    pub fn acquire() -> Self {
        Self {
            _elevated: imp::elevate(),
        }
    }
}
