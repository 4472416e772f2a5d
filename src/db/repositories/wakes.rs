use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_phase},
};
use crate::models::ScheduledWake;

fn row_to_wake(row: &Row) -> Result<ScheduledWake> {
    let phase: String = row.get("phase")?;
    let fire_at: String = row.get("fire_at")?;
    let created_at: String = row.get("created_at")?;

    Ok(ScheduledWake {
        identifier: row.get("identifier")?,
        phase: parse_phase(&phase)?,
        fire_at: parse_datetime(&fire_at, "fire_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    /// Replaces whatever occupies the single wake slot.
    pub async fn replace_scheduled_wake(&self, wake: &ScheduledWake) -> Result<()> {
        let record = wake.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_wake (slot, identifier, phase, fire_at, created_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(slot) DO UPDATE SET
                     identifier = excluded.identifier,
                     phase = excluded.phase,
                     fire_at = excluded.fire_at,
                     created_at = excluded.created_at",
                params![
                    record.identifier,
                    record.phase.as_str(),
                    record.fire_at.to_rfc3339(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to store scheduled wake")?;
            Ok(())
        })
        .await
    }

    pub async fn get_scheduled_wake(&self) -> Result<Option<ScheduledWake>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identifier, phase, fire_at, created_at
                 FROM scheduled_wake
                 WHERE slot = 1",
            )?;
            let mut rows = stmt.query([])?;
            let wake = match rows.next()? {
                Some(row) => Some(row_to_wake(row)?),
                None => None,
            };
            Ok(wake)
        })
        .await
    }

    pub async fn find_scheduled_wake(&self, identifier: &str) -> Result<Option<ScheduledWake>> {
        let identifier = identifier.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT identifier, phase, fire_at, created_at
                 FROM scheduled_wake
                 WHERE identifier = ?1",
            )?;
            let mut rows = stmt.query(params![identifier])?;
            let wake = match rows.next()? {
                Some(row) => Some(row_to_wake(row)?),
                None => None,
            };
            Ok(wake)
        })
        .await
    }

    pub async fn clear_scheduled_wakes(&self) -> Result<usize> {
        self.execute(|conn| {
            conn.execute("DELETE FROM scheduled_wake", [])
                .with_context(|| "failed to clear scheduled wakes")
        })
        .await
    }

    /// Clears the slot only if it still holds `identifier`, so a wake that
    /// was replaced while its fire was being delivered survives.
    pub async fn clear_scheduled_wake_if(&self, identifier: &str) -> Result<bool> {
        let identifier = identifier.to_string();
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM scheduled_wake WHERE identifier = ?1",
                    params![identifier],
                )
                .with_context(|| "failed to clear fired wake")?;
            Ok(removed > 0)
        })
        .await
    }
}
