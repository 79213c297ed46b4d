use std::sync::{Mutex, PoisonError};

use hab_node_common::View;
use tracing::info;

pub trait DisplaySurface: Send + Sync {
    fn show(&self, view: View);
}

#[derive(Debug)]
pub struct LogDisplay {
    current: Mutex<View>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(View::Main),
        }
    }

    pub fn current(&self) -> View {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DisplaySurface for LogDisplay {
    fn show(&self, view: View) {
        info!("display view -> {view:?}");
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = view;
    }
}
