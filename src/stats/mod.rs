use std::sync::Arc;

use anyhow::Result;
use log::{error, info};

use crate::{
    db::Database,
    models::{DailyStats, StatsSummary},
    utils::Clock,
};

/// Daily completion counters on top of the `kv_store` table.
///
/// The daily reset is lazy: nothing rewrites the counters at midnight. Reads
/// report `completedSessions = 0` once the stored date is stale, and the next
/// recorded session writes the reset and the increment in one transaction.
#[derive(Clone)]
pub struct StatsStore {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl StatsStore {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// First-run hook: seeds zero counters dated today when the store is
    /// empty. Existing values are left alone.
    pub async fn initialize_if_missing(&self) -> Result<bool> {
        let initial = DailyStats::empty(self.clock.today());
        let written = self.db.insert_daily_stats_if_missing(&initial).await?;
        if written {
            info!("Initialized daily stats for {}", initial.last_session_date);
        }
        Ok(written)
    }

    /// Current stats with the daily reset applied. Storage failures are
    /// logged and reported as zeroed stats.
    pub async fn get(&self) -> DailyStats {
        let today = self.clock.today();
        match self.db.load_daily_stats().await {
            Ok(stats) => stats.apply_daily_reset(today),
            Err(err) => {
                error!("Failed to load daily stats: {err:?}");
                DailyStats::empty(today)
            }
        }
    }

    pub async fn summary(&self) -> StatsSummary {
        self.get().await.summary()
    }

    /// Read-modify-write of one completed work session. On failure the
    /// stored values are untouched and `None` is returned.
    pub async fn record_completed_work_session(&self) -> Option<DailyStats> {
        let today = self.clock.today();
        match self
            .db
            .update_daily_stats(move |current| current.record_work_session(today))
            .await
        {
            Ok(updated) => {
                info!(
                    "Stats updated: {} sessions today, {} minutes total",
                    updated.completed_sessions, updated.total_focus_minutes
                );
                Some(updated)
            }
            Err(err) => {
                error!("Failed to update daily stats: {err:?}");
                None
            }
        }
    }

    /// Stored values without the daily reset, for callers that need the
    /// exact persisted record.
    pub async fn load_raw(&self) -> Result<DailyStats> {
        self.db.load_daily_stats().await
    }

    pub async fn save(&self, stats: &DailyStats) -> Result<()> {
        self.db.save_daily_stats(stats).await
    }
}
