use std::time::Duration;

use crate::config::PresenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Present,
    Idling,
    Idle,
}

impl IdleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "PRESENT",
            Self::Idling => "IDLING",
            Self::Idle => "IDLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleTimer {
    GoIdle,
    ConfirmIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Main,
    Idling,
}

// A verdict is only applied while its ticket matches the current transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceQuery(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceAction {
    SetDuty(u16),
    Schedule(IdleTimer, Duration),
    ShowView(View),
    QueryPresence(PresenceQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Press,
    Release,
    Click,
    Move,
    Key,
    Scroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub still_since_press: bool,
}

impl InputEvent {
    pub fn new(kind: InputKind) -> Self {
        Self {
            kind,
            still_since_press: true,
        }
    }

    pub fn click() -> Self {
        Self::new(InputKind::Click)
    }

    pub fn drag() -> Self {
        Self {
            kind: InputKind::Click,
            still_since_press: false,
        }
    }

    pub fn is_genuine_click(&self) -> bool {
        self.kind == InputKind::Click && self.still_since_press
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputOutcome {
    pub consumed: bool,
    pub actions: Vec<PresenceAction>,
}

#[derive(Debug, Clone)]
pub struct PresenceEngine {
    config: PresenceConfig,
    state: IdleState,
    transitions: u64,
}

impl PresenceEngine {
    pub fn new(mut config: PresenceConfig) -> Self {
        config.sanitize();
        Self {
            config,
            state: IdleState::Present,
            transitions: 0,
        }
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    pub fn start(&mut self) -> Vec<PresenceAction> {
        vec![
            PresenceAction::SetDuty(self.config.active_duty),
            self.schedule(IdleTimer::GoIdle),
        ]
    }

    pub fn on_timer(&mut self) -> Vec<PresenceAction> {
        match self.state {
            IdleState::Present => {
                let mut actions = Vec::new();
                self.enter_idling(&mut actions);
                actions
            }
            IdleState::Idling => vec![PresenceAction::QueryPresence(PresenceQuery(
                self.transitions,
            ))],
            IdleState::Idle => Vec::new(),
        }
    }

    pub fn resolve_presence(&mut self, query: PresenceQuery, present: bool) -> Vec<PresenceAction> {
        if self.state != IdleState::Idling || query.0 != self.transitions {
            return Vec::new();
        }

        if present {
            return vec![self.schedule(IdleTimer::ConfirmIdle)];
        }

        self.transition(IdleState::Idle);
        vec![PresenceAction::SetDuty(0)]
    }

    pub fn on_input(&mut self, event: &InputEvent) -> InputOutcome {
        let mut actions = Vec::new();
        let consumed = match self.state {
            IdleState::Present => {
                actions.push(self.schedule(IdleTimer::GoIdle));
                false
            }
            IdleState::Idling => {
                self.enter_present(&mut actions);
                false
            }
            IdleState::Idle => {
                if event.is_genuine_click() {
                    self.enter_present(&mut actions);
                }
                true
            }
        };

        InputOutcome { consumed, actions }
    }

    fn enter_idling(&mut self, actions: &mut Vec<PresenceAction>) {
        self.transition(IdleState::Idling);
        actions.push(self.schedule(IdleTimer::ConfirmIdle));
        if self.config.idling_view {
            actions.push(PresenceAction::ShowView(View::Idling));
        }
        actions.push(PresenceAction::SetDuty(self.config.dimmed_duty));
    }

    fn enter_present(&mut self, actions: &mut Vec<PresenceAction>) {
        self.transition(IdleState::Present);
        actions.push(PresenceAction::ShowView(View::Main));
        actions.push(PresenceAction::SetDuty(self.config.active_duty));
        actions.push(self.schedule(IdleTimer::GoIdle));
    }

    fn transition(&mut self, state: IdleState) {
        self.state = state;
        self.transitions = self.transitions.wrapping_add(1);
    }

    fn schedule(&self, timer: IdleTimer) -> PresenceAction {
        let delay_ms = match timer {
            IdleTimer::GoIdle => self.config.go_idle_ms,
            IdleTimer::ConfirmIdle => self.config.confirm_idle_ms,
        };
        PresenceAction::Schedule(timer, Duration::from_millis(delay_ms))
    }
}
