use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::Phase;

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_phase(value: &str) -> Result<Phase> {
    value
        .parse()
        .with_context(|| format!("unknown phase {value} in scheduled_wake"))
}

/// Counters are stored as JSON numbers; reject anything that is not a
/// non-negative integer instead of silently treating it as zero.
pub fn parse_counter(raw: &str, field: &str) -> Result<u64> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("{field} is not valid JSON"))?;
    match value.as_i64() {
        Some(number) => to_u64(number, field),
        None => Err(anyhow!("{field} is not an integer: {raw}")),
    }
}
