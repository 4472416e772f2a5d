use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::phase::NOMINAL_WORK_MINUTES;

/// Storage format for `lastSessionDate`. ISO 8601 so comparisons do not depend
/// on the host locale.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub completed_sessions: u64,
    pub total_focus_minutes: u64,
    pub last_session_date: String,
}

impl DailyStats {
    pub fn empty(today: NaiveDate) -> Self {
        Self {
            completed_sessions: 0,
            total_focus_minutes: 0,
            last_session_date: format_date(today),
        }
    }

    /// Zeroes the per-day counter when the stored date is not `today`.
    /// `total_focus_minutes` is cumulative and never reset.
    pub fn apply_daily_reset(mut self, today: NaiveDate) -> Self {
        if self.last_session_date != format_date(today) {
            self.completed_sessions = 0;
        }
        self
    }

    pub fn record_work_session(self, today: NaiveDate) -> Self {
        let reset = self.apply_daily_reset(today);
        Self {
            completed_sessions: reset.completed_sessions.saturating_add(1),
            total_focus_minutes: reset
                .total_focus_minutes
                .saturating_add(NOMINAL_WORK_MINUTES),
            last_session_date: format_date(today),
        }
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            completed_sessions: self.completed_sessions,
            total_focus_time: self.total_focus_minutes,
        }
    }
}

/// Shape returned to the UI for `GET_STATS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub completed_sessions: u64,
    pub total_focus_time: u64,
}
