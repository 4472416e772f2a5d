pub mod phase;
pub mod stats;
pub mod wake;

pub use phase::{Phase, NOMINAL_WORK_MINUTES};
pub use stats::{DailyStats, StatsSummary};
pub use wake::{ScheduledWake, TimerRequest};
