use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{connection::Database, helpers::parse_counter};
use crate::models::DailyStats;

pub const COMPLETED_SESSIONS_KEY: &str = "completedSessions";
pub const TOTAL_FOCUS_TIME_KEY: &str = "totalFocusTime";
pub const LAST_SESSION_DATE_KEY: &str = "lastSessionDate";

const STATS_KEYS: [&str; 3] = [
    COMPLETED_SESSIONS_KEY,
    TOTAL_FOCUS_TIME_KEY,
    LAST_SESSION_DATE_KEY,
];

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_store WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .with_context(|| format!("failed to read {key}"))
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("failed to write {key}"))?;
    Ok(())
}

/// Missing keys read as zero / empty date, matching a store that was never
/// initialized. Malformed values are errors.
fn read_stats(conn: &Connection) -> Result<DailyStats> {
    let completed_sessions = read_value(conn, COMPLETED_SESSIONS_KEY)?
        .map(|raw| parse_counter(&raw, COMPLETED_SESSIONS_KEY))
        .transpose()?
        .unwrap_or(0);
    let total_focus_minutes = read_value(conn, TOTAL_FOCUS_TIME_KEY)?
        .map(|raw| parse_counter(&raw, TOTAL_FOCUS_TIME_KEY))
        .transpose()?
        .unwrap_or(0);
    let last_session_date = match read_value(conn, LAST_SESSION_DATE_KEY)? {
        Some(raw) => serde_json::from_str::<String>(&raw)
            .map_err(|err| anyhow!("{LAST_SESSION_DATE_KEY} is not a string: {err}"))?,
        None => String::new(),
    };

    Ok(DailyStats {
        completed_sessions,
        total_focus_minutes,
        last_session_date,
    })
}

fn write_stats(conn: &Connection, stats: &DailyStats) -> Result<()> {
    write_value(
        conn,
        COMPLETED_SESSIONS_KEY,
        &serde_json::to_string(&stats.completed_sessions)?,
    )?;
    write_value(
        conn,
        TOTAL_FOCUS_TIME_KEY,
        &serde_json::to_string(&stats.total_focus_minutes)?,
    )?;
    write_value(
        conn,
        LAST_SESSION_DATE_KEY,
        &serde_json::to_string(&stats.last_session_date)?,
    )?;
    Ok(())
}

impl Database {
    pub async fn load_daily_stats(&self) -> Result<DailyStats> {
        self.execute(|conn| read_stats(conn)).await
    }

    pub async fn save_daily_stats(&self, stats: &DailyStats) -> Result<()> {
        let record = stats.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            write_stats(&tx, &record)?;
            tx.commit().context("failed to commit daily stats")?;
            Ok(())
        })
        .await
    }

    /// Load, transform and store the stats in one transaction on the DB
    /// thread. If `update` or any write fails nothing is committed.
    pub async fn update_daily_stats<F>(&self, update: F) -> Result<DailyStats>
    where
        F: FnOnce(DailyStats) -> DailyStats + Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let current = read_stats(&tx)?;
            let next = update(current);
            write_stats(&tx, &next)?;
            tx.commit().context("failed to commit daily stats")?;
            Ok(next)
        })
        .await
    }

    /// Writes `initial` only when none of the stats keys exist yet.
    /// Returns whether anything was written.
    pub async fn insert_daily_stats_if_missing(&self, initial: &DailyStats) -> Result<bool> {
        let record = initial.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for key in STATS_KEYS {
                if read_value(&tx, key)?.is_some() {
                    return Ok(false);
                }
            }
            write_stats(&tx, &record)?;
            tx.commit().context("failed to commit initial stats")?;
            Ok(true)
        })
        .await
    }

    /// Raw stored text per key, in key order.
    pub async fn load_raw_stats(&self) -> Result<Vec<(String, Option<String>)>> {
        self.execute(|conn| {
            STATS_KEYS
                .iter()
                .map(|key| Ok((key.to_string(), read_value(conn, key)?)))
                .collect()
        })
        .await
    }

    #[cfg(test)]
    pub(crate) async fn write_raw_stat(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| write_value(conn, &key, &value)).await
    }
}
