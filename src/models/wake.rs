use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::phase::Phase;

const IDENTIFIER_PREFIX: &str = "timer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub phase: Phase,
    pub duration_secs: u64,
}

impl TimerRequest {
    pub fn new(phase: Phase, duration_secs: u64) -> Result<Self> {
        if duration_secs == 0 {
            bail!("duration must be greater than zero seconds");
        }
        Ok(Self {
            phase,
            duration_secs,
        })
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledWake {
    pub identifier: String,
    pub phase: Phase,
    pub fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledWake {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.fire_at <= now
    }
}

/// `timer_<phase>_<epoch millis>_<short uuid>`; the uuid suffix keeps two
/// requests created within the same millisecond distinct.
pub fn new_identifier(phase: Phase, created_at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{IDENTIFIER_PREFIX}_{}_{}_{}",
        phase.as_str(),
        created_at.timestamp_millis(),
        &suffix[..8]
    )
}

pub fn phase_from_identifier(identifier: &str) -> Result<Phase> {
    let mut parts = identifier.split('_');
    match (parts.next(), parts.next()) {
        (Some(IDENTIFIER_PREFIX), Some(phase)) => phase.parse(),
        _ => Err(anyhow!("'{identifier}' is not a timer wake identifier")),
    }
}
