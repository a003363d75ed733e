/// Casting state machine
///
/// Decides, tick by tick, whether a match result should press a key. All
/// methods take the current instant explicitly so sequences of ticks can be
/// replayed deterministically.
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use super::session::{CastingParams, CastingSession, CooldownScope, SessionSnapshot};
use crate::input::Keybind;
use crate::matcher::MatchResult;

/// State of the caster
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub enum CastingState {
    /// Casting disabled
    #[default]
    Idle,

    /// Casting enabled, nothing cooling
    Armed,

    /// `template` just fired; suppressed until `until`
    Cooling { template: String, until: Instant },
}

impl CastingState {
    /// True in `Armed` and `Cooling`
    pub fn is_running(&self) -> bool {
        !matches!(self, CastingState::Idle)
    }

    pub fn is_cooling(&self) -> bool {
        matches!(self, CastingState::Cooling { .. })
    }

    pub fn description(&self) -> &'static str {
        match self {
            CastingState::Idle => "Idle",
            CastingState::Armed => "Armed",
            CastingState::Cooling { .. } => "Cooling",
        }
    }
}

impl fmt::Display for CastingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastingState::Cooling { template, .. } => write!(f, "Cooling({})", template),
            other => f.write_str(other.description()),
        }
    }
}

/// A state transition that actually happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: CastingState,
    pub to: CastingState,
}

/// Request to press a keybind, produced on entry into `Cooling`
#[derive(Debug, Clone, PartialEq)]
pub struct Actuation {
    pub template: String,
    pub keybind: Keybind,
    pub confidence: f32,
    pub at: Instant,
}

/// Everything one tick decided
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    pub actuation: Option<Actuation>,
    pub change: Option<StateChange>,
}

pub struct CastingStateMachine {
    state: CastingState,
    params: CastingParams,
    keybinds: HashMap<String, Keybind>,
    session: CastingSession,
}

impl CastingStateMachine {
    /// Create a machine in the `Idle` state
    pub fn new(params: CastingParams, keybinds: impl IntoIterator<Item = Keybind>) -> Self {
        Self {
            state: CastingState::Idle,
            params,
            keybinds: index_keybinds(keybinds),
            session: CastingSession::default(),
        }
    }

    /// Swap in new parameters and keybinds; the current state is kept
    pub fn configure(&mut self, params: CastingParams, keybinds: impl IntoIterator<Item = Keybind>) {
        self.params = params;
        self.keybinds = index_keybinds(keybinds);
    }

    pub fn state(&self) -> &CastingState {
        &self.state
    }

    pub fn params(&self) -> &CastingParams {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// `Idle -> Armed`; a running machine is left alone
    pub fn start(&mut self) -> Option<StateChange> {
        if self.state.is_running() {
            return None;
        }
        self.transition(CastingState::Armed)
    }

    /// Any state -> `Idle`, cancelling pending suppression
    pub fn stop(&mut self) -> Option<StateChange> {
        self.session.clear();
        if !self.state.is_running() {
            return None;
        }
        self.transition(CastingState::Idle)
    }

    /// `Idle -> Armed`, anything else -> `Idle`
    pub fn toggle(&mut self) -> Option<StateChange> {
        if self.state.is_running() {
            self.stop()
        } else {
            self.start()
        }
    }

    /// `Cooling(t, until) -> Armed` once `now >= until`
    pub fn expire(&mut self, now: Instant) -> Option<StateChange> {
        match &self.state {
            CastingState::Cooling { until, .. } if now >= *until => {
                self.transition(CastingState::Armed)
            }
            _ => None,
        }
    }

    /// Feed one match result. At most one actuation comes out, and only on a
    /// transition into `Cooling`.
    pub fn observe(&mut self, result: &MatchResult, now: Instant) -> Decision {
        if !self.state.is_running() {
            return Decision::default();
        }

        let streak = self.session.record_winner(result.template.as_deref());
        let Some(template) = result.template.as_deref() else {
            return Decision::default();
        };
        if streak < self.params.stable_ticks.max(1) {
            return Decision::default();
        }

        let blocked = match (&self.state, self.params.scope) {
            (CastingState::Cooling { .. }, CooldownScope::Global) => true,
            _ => self.session.is_suppressed(template, self.params.cooldown, now),
        };
        if blocked {
            return Decision::default();
        }

        if !self.params.repeat_cast && self.session.last_fired.as_deref() == Some(template) {
            return Decision::default();
        }

        let Some(keybind) = self.keybinds.get(template).cloned() else {
            tracing::debug!("Matched '{}' but it has no keybind", template);
            return Decision::default();
        };

        self.session.last_actuation.insert(template.to_string(), now);
        self.session.last_fired = Some(template.to_string());

        let change = self.transition(CastingState::Cooling {
            template: template.to_string(),
            until: now + self.params.cooldown,
        });

        Decision {
            actuation: Some(Actuation {
                template: template.to_string(),
                keybind,
                confidence: result.confidence,
                at: now,
            }),
            change,
        }
    }

    /// One full tick: expire the cooldown first, then process the match
    pub fn tick(&mut self, result: &MatchResult, now: Instant) -> Decision {
        let before = self.state.clone();
        self.expire(now);
        let decision = self.observe(result, now);

        let change = (self.state != before).then(|| StateChange {
            from: before,
            to: self.state.clone(),
        });
        Decision {
            actuation: decision.actuation,
            change,
        }
    }

    /// Copy of the session for readers outside the loop
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut last_actuations: Vec<(String, Instant)> = self
            .session
            .last_actuation
            .iter()
            .map(|(name, at)| (name.clone(), *at))
            .collect();
        last_actuations.sort_by(|a, b| a.0.cmp(&b.0));

        SessionSnapshot {
            state: self.state.clone(),
            running: self.state.is_running(),
            cooldown: self.params.cooldown,
            scope: self.params.scope,
            last_actuations,
        }
    }

    fn transition(&mut self, to: CastingState) -> Option<StateChange> {
        if self.state == to {
            return None;
        }
        let from = std::mem::replace(&mut self.state, to.clone());
        Some(StateChange { from, to })
    }
}

fn index_keybinds(keybinds: impl IntoIterator<Item = Keybind>) -> HashMap<String, Keybind> {
    keybinds
        .into_iter()
        .map(|bind| (bind.template.clone(), bind))
        .collect()
}
