use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Minutes credited to `totalFocusTime` for every completed work session,
/// independent of the duration the UI actually requested.
pub const NOMINAL_WORK_MINUTES: u64 = 25;
pub const NOMINAL_BREAK_MINUTES: u64 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Work,
    Break,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Work => "work",
            Phase::Break => "break",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "work" => Ok(Phase::Work),
            "break" => Ok(Phase::Break),
            other => Err(anyhow!("unknown phase '{other}'")),
        }
    }
}
