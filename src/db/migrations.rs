use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema steps in order. Entry `n` moves `user_version` from `n` to `n + 1`.
const MIGRATIONS: &[(&str, &str)] = &[
    ("stats key-value store", include_str!("schemas/schema_v1.sql")),
    ("scheduled wake slot", include_str!("schemas/schema_v2.sql")),
];

pub(crate) const CURRENT_SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Brings the schema up to [`CURRENT_SCHEMA_VERSION`]. Each step commits on
/// its own, so an interrupted upgrade resumes from the last finished step.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "tomato database is at schema {version}, newer than this build's {CURRENT_SCHEMA_VERSION}"
        );
    }

    for (from, (label, sql)) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let target = from as i32 + 1;
        let tx = conn
            .transaction()
            .with_context(|| format!("failed to open transaction for schema {target}"))?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply schema {target} ({label})"))?;
        tx.pragma_update(None, "user_version", target)
            .context("failed to update user_version pragma")?;
        tx.commit()
            .with_context(|| format!("failed to commit schema {target}"))?;
        info!("Upgraded tomato database to schema {target}: {label}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> i32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_database_reaches_current_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        assert_eq!(user_version(&conn), CURRENT_SCHEMA_VERSION);

        // Second run is a no-op.
        run_migrations(&mut conn).unwrap();
        assert_eq!(user_version(&conn), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn partially_migrated_database_resumes() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].1).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        run_migrations(&mut conn).unwrap();
        let slots: i64 = conn
            .query_row("SELECT COUNT(*) FROM scheduled_wake", [], |row| row.get(0))
            .unwrap();
        assert_eq!(slots, 0);
    }

    #[test]
    fn newer_database_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION + 1)
            .unwrap();
        assert!(run_migrations(&mut conn).is_err());
    }
}
