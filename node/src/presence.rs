use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use hab_node_common::{
    IdleState, IdleTimer, InputEvent, ItemNames, ItemStore, PresenceAction, PresenceConfig,
    PresenceEngine, PresenceQuery, PwmLine,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    display::DisplaySurface,
    scheduler::{ScheduledTask, Scheduler},
};

pub struct PresenceOracle {
    store: Option<Arc<dyn ItemStore>>,
    item: String,
    present_state: String,
    timeout: Duration,
}

impl PresenceOracle {
    pub fn new(store: Option<Arc<dyn ItemStore>>, config: &PresenceConfig, items: &ItemNames) -> Self {
        Self {
            store,
            item: items.home_mode.clone(),
            present_state: config.present_state.clone(),
            timeout: Duration::from_millis(config.oracle_timeout_ms),
        }
    }

    // Any failure to learn the flag counts as nobody home.
    pub async fn is_present(&self) -> bool {
        let Some(store) = &self.store else {
            debug!("no item store, assuming nobody home");
            return false;
        };

        match tokio::time::timeout(self.timeout, store.get_item(&self.item)).await {
            Ok(Ok(item)) => item.state.trim() == self.present_state,
            Ok(Err(err)) => {
                warn!("presence lookup failed: {err}");
                false
            }
            Err(_) => {
                warn!(
                    "presence lookup of `{}` timed out after {:?}",
                    self.item, self.timeout
                );
                false
            }
        }
    }
}

struct PendingTimer {
    id: u64,
    kind: IdleTimer,
    task: ScheduledTask,
}

struct Core {
    engine: PresenceEngine,
    dimmer: Box<dyn PwmLine>,
    timer: Option<PendingTimer>,
    next_timer_id: u64,
}

struct Inner {
    core: Mutex<Core>,
    scheduler: Scheduler,
    display: Arc<dyn DisplaySurface>,
    oracle: PresenceOracle,
}

// Every transition happens under the core lock. The oracle is awaited outside it.
#[derive(Clone)]
pub struct PresenceController {
    inner: Arc<Inner>,
}

impl PresenceController {
    pub fn new(
        engine: PresenceEngine,
        dimmer: Box<dyn PwmLine>,
        scheduler: Scheduler,
        display: Arc<dyn DisplaySurface>,
        oracle: PresenceOracle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    engine,
                    dimmer,
                    timer: None,
                    next_timer_id: 0,
                }),
                scheduler,
                display,
                oracle,
            }),
        }
    }

    pub async fn start(&self) {
        let mut core = self.inner.core.lock().await;
        let actions = core.engine.start();
        self.inner.apply(&mut core, actions);
        info!("presence controller started in {}", core.engine.state().as_str());
    }

    pub async fn state(&self) -> IdleState {
        self.inner.core.lock().await.engine.state()
    }

    pub async fn pending_timer(&self) -> Option<IdleTimer> {
        self.inner
            .core
            .lock()
            .await
            .timer
            .as_ref()
            .map(|timer| timer.kind)
    }

    pub async fn handle_input(&self, event: InputEvent) -> bool {
        let mut core = self.inner.core.lock().await;
        let before = core.engine.state();
        let outcome = core.engine.on_input(&event);
        self.inner.apply(&mut core, outcome.actions);

        let after = core.engine.state();
        if before != after {
            info!("presence {} -> {} on {:?}", before.as_str(), after.as_str(), event.kind);
        }
        outcome.consumed
    }
}

impl Inner {
    async fn on_timer(self: Arc<Self>, id: u64) {
        let query = {
            let mut core = self.core.lock().await;
            if core.timer.as_ref().map(|timer| timer.id) != Some(id) {
                debug!("ignoring superseded timer {id}");
                return;
            }
            core.timer = None;

            let before = core.engine.state();
            let actions = core.engine.on_timer();
            let query = self.apply(&mut core, actions);
            if before != core.engine.state() {
                info!(
                    "presence {} -> {} on timer",
                    before.as_str(),
                    core.engine.state().as_str()
                );
            }
            query
        };

        let Some(query) = query else {
            return;
        };
        let present = self.oracle.is_present().await;

        let mut core = self.core.lock().await;
        let actions = core.engine.resolve_presence(query, present);
        if actions.is_empty() && core.engine.state() != IdleState::Idling {
            debug!("dropping presence verdict, state moved on");
        }
        let before = core.engine.state();
        self.apply(&mut core, actions);
        if before != core.engine.state() {
            info!("presence {} -> {}, nobody home", before.as_str(), core.engine.state().as_str());
        } else if present {
            debug!("somebody home, staying dimmed");
        }
    }

    fn apply(self: &Arc<Self>, core: &mut Core, actions: Vec<PresenceAction>) -> Option<PresenceQuery> {
        let mut query = None;
        for action in actions {
            match action {
                PresenceAction::SetDuty(duty) => {
                    if let Err(err) = core.dimmer.set_duty_cycle(duty) {
                        warn!("failed to set dimmer duty {duty}: {err}");
                    }
                }
                PresenceAction::Schedule(kind, delay) => self.reschedule(core, kind, delay),
                PresenceAction::ShowView(view) => self.display.show(view),
                PresenceAction::QueryPresence(pending) => query = Some(pending),
            }
        }
        query
    }

    fn reschedule(self: &Arc<Self>, core: &mut Core, kind: IdleTimer, delay: Duration) {
        if let Some(previous) = core.timer.take() {
            previous.task.cancel();
        }

        let id = core.next_timer_id;
        core.next_timer_id = core.next_timer_id.wrapping_add(1);
        let weak: Weak<Inner> = Arc::downgrade(self);
        let task = self.scheduler.schedule(delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(id).await;
            }
        });

        debug!("scheduled {kind:?} timer {id} in {delay:?}");
        core.timer = Some(PendingTimer { id, kind, task });
    }
}
