use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Phase, ScheduledWake};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    Idle,
    Running,
}

/// In-memory view of the single outstanding timer. The durable record is the
/// scheduler's wake slot; this is rebuilt from it after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running {
        phase: Phase,
        identifier: String,
        fire_at: DateTime<Utc>,
    },
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub fn from_wake(wake: &ScheduledWake) -> Self {
        SessionState::Running {
            phase: wake.phase,
            identifier: wake.identifier.clone(),
            fire_at: wake.fire_at,
        }
    }

    pub fn status(&self) -> TimerStatus {
        match self {
            SessionState::Idle => TimerStatus::Idle,
            SessionState::Running { .. } => TimerStatus::Running,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            SessionState::Idle => None,
            SessionState::Running { phase, .. } => Some(*phase),
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::Running { identifier, .. } => Some(identifier.as_str()),
        }
    }

    pub fn is_running(&self, identifier: &str) -> bool {
        self.identifier() == Some(identifier)
    }

    /// Whole seconds until the wake fires; 0 when idle or overdue.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        match self {
            SessionState::Idle => 0,
            SessionState::Running { fire_at, .. } => {
                (*fire_at - now).num_seconds().max(0) as u64
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn remaining_never_goes_negative() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let state = SessionState::Running {
            phase: Phase::Work,
            identifier: "timer_work_1_a".into(),
            fire_at: now + Duration::minutes(25),
        };

        assert_eq!(state.remaining_secs(now), 1500);
        assert_eq!(state.remaining_secs(now + Duration::hours(1)), 0);
        assert_eq!(SessionState::Idle.remaining_secs(now), 0);
    }

    #[test]
    fn identifier_matching() {
        let state = SessionState::Running {
            phase: Phase::Break,
            identifier: "timer_break_1_a".into(),
            fire_at: Utc::now(),
        };
        assert!(state.is_running("timer_break_1_a"));
        assert!(!state.is_running("timer_break_2_b"));
        assert!(!SessionState::Idle.is_running("timer_break_1_a"));
        assert_eq!(state.status(), TimerStatus::Running);
    }
}
