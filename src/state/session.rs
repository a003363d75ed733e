use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::casting::CastingState;

/// Whether one actuation suppresses every template or only itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownScope {
    /// One active cooldown at a time; every match is ignored while cooling
    #[default]
    Global,
    /// Each template has its own cooldown; others may fire meanwhile
    PerTemplate,
}

/// Timing parameters of a casting session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastingParams {
    pub cooldown: Duration,
    pub scope: CooldownScope,
    /// When false the template that fired last cannot fire again until another one has
    pub repeat_cast: bool,
    /// Consecutive ticks a template must win before it qualifies
    pub stable_ticks: u32,
}

impl Default for CastingParams {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(500),
            scope: CooldownScope::Global,
            repeat_cast: true,
            stable_ticks: 1,
        }
    }
}

/// Mutable bookkeeping behind the state machine
#[derive(Debug, Clone, Default)]
pub(crate) struct CastingSession {
    pub(crate) last_actuation: HashMap<String, Instant>,
    pub(crate) last_fired: Option<String>,
    pub(crate) streak: Option<(String, u32)>,
}

impl CastingSession {
    /// Drop all suppression and stability history
    pub(crate) fn clear(&mut self) {
        self.last_actuation.clear();
        self.last_fired = None;
        self.streak = None;
    }

    /// Count another consecutive win for `template` (or reset on no match)
    /// and return the streak length
    pub(crate) fn record_winner(&mut self, template: Option<&str>) -> u32 {
        match template {
            None => {
                self.streak = None;
                0
            }
            Some(name) => match self.streak.as_mut() {
                Some((current, count)) if current == name => {
                    *count = count.saturating_add(1);
                    *count
                }
                _ => {
                    self.streak = Some((name.to_string(), 1));
                    1
                }
            },
        }
    }

    /// True while `template`'s own cooldown window is open at `now`
    pub(crate) fn is_suppressed(&self, template: &str, cooldown: Duration, now: Instant) -> bool {
        self.last_actuation
            .get(template)
            .map(|at| now < *at + cooldown)
            .unwrap_or(false)
    }
}

/// Copy of the session handed to telemetry readers
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: CastingState,
    pub running: bool,
    pub cooldown: Duration,
    pub scope: CooldownScope,
    /// Last actuation instant per template, sorted by template name
    pub last_actuations: Vec<(String, Instant)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_counts_consecutive_wins() {
        let mut session = CastingSession::default();
        assert_eq!(session.record_winner(Some("N5")), 1);
        assert_eq!(session.record_winner(Some("N5")), 2);
        assert_eq!(session.record_winner(Some("C1")), 1);
        assert_eq!(session.record_winner(None), 0);
        assert_eq!(session.record_winner(Some("C1")), 1);
    }

    #[test]
    fn test_suppression_window_is_half_open() {
        let mut session = CastingSession::default();
        let t0 = Instant::now();
        let cooldown = Duration::from_millis(500);
        session.last_actuation.insert("N5".to_string(), t0);

        assert!(session.is_suppressed("N5", cooldown, t0));
        assert!(session.is_suppressed("N5", cooldown, t0 + Duration::from_millis(499)));
        assert!(!session.is_suppressed("N5", cooldown, t0 + cooldown));
        assert!(!session.is_suppressed("C1", cooldown, t0));
    }

    #[test]
    fn test_cooldown_scope_serde() {
        let scope: CooldownScope = serde_json::from_str("\"per_template\"").unwrap();
        assert_eq!(scope, CooldownScope::PerTemplate);
        assert_eq!(serde_json::to_string(&CooldownScope::Global).unwrap(), "\"global\"");
    }
}
