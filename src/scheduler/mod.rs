mod dispatch;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Database,
    models::{Phase, ScheduledWake},
    utils::Clock,
};

pub use dispatch::FiredWake;

/// Wakes are resolved to whole minutes, the precision a suspendable host can
/// promise.
pub const WAKE_GRANULARITY_SECS: u64 = 60;

/// Rounds a requested delay up to the next whole minute, never below one
/// minute. A zero delay is clamped rather than rejected.
pub fn coarse_delay(requested: Duration) -> Duration {
    let secs = requested.as_secs() + u64::from(requested.subsec_nanos() > 0);
    let minutes = secs.div_ceil(WAKE_GRANULARITY_SECS).max(1);
    Duration::from_secs(minutes * WAKE_GRANULARITY_SECS)
}

/// Durable single-slot wake scheduler.
///
/// The pending wake lives in SQLite, so a restarted process picks it up again
/// and a wake whose deadline passed while the process was suspended fires on
/// the first check after resuming.
#[derive(Clone)]
pub struct WakeScheduler {
    db: Database,
    clock: Arc<dyn Clock>,
    rearm: Arc<Notify>,
}

impl WakeScheduler {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            rearm: Arc::new(Notify::new()),
        }
    }

    /// Stores a wake firing once after `delay` (see [`coarse_delay`]),
    /// replacing any outstanding wake.
    pub async fn schedule(
        &self,
        identifier: &str,
        phase: Phase,
        delay: Duration,
    ) -> Result<ScheduledWake> {
        let created_at = self.clock.now();
        let delay = coarse_delay(delay);
        let fire_at = created_at + chrono::Duration::from_std(delay)?;

        let wake = ScheduledWake {
            identifier: identifier.to_string(),
            phase,
            fire_at,
            created_at,
        };

        self.db.replace_scheduled_wake(&wake).await?;
        self.rearm.notify_one();

        info!(
            "Scheduled wake {} for {} ({}s)",
            wake.identifier,
            wake.fire_at.to_rfc3339(),
            delay.as_secs()
        );

        match self.db.find_scheduled_wake(identifier).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!("Wake {identifier} not visible right after scheduling"),
            Err(err) => warn!("Could not confirm wake {identifier}: {err:?}"),
        }

        Ok(wake)
    }

    pub async fn cancel_all(&self) -> Result<()> {
        let removed = self.db.clear_scheduled_wakes().await?;
        if removed > 0 {
            info!("Cancelled {removed} outstanding wake(s)");
        }
        self.rearm.notify_one();
        Ok(())
    }

    pub async fn outstanding(&self) -> Result<Option<ScheduledWake>> {
        self.db.get_scheduled_wake().await
    }

    /// The outstanding wake if its deadline has passed. Does not clear it.
    pub async fn fire_due(&self) -> Result<Option<ScheduledWake>> {
        let now = self.clock.now();
        Ok(self
            .outstanding()
            .await?
            .filter(|wake| wake.is_due(now)))
    }

    /// Clears the slot after a fire was handled, unless it was replaced in
    /// the meantime.
    pub async fn acknowledge_fire(&self, identifier: &str) -> Result<bool> {
        self.db.clear_scheduled_wake_if(identifier).await
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn rearm_signal(&self) -> Arc<Notify> {
        self.rearm.clone()
    }

    /// Spawns the dispatch loop. Fires arrive on the returned receiver one at
    /// a time and the next check waits for [`FiredWake::handled`]. The loop
    /// stops when `shutdown` is cancelled or the receiver is dropped.
    pub fn start(
        &self,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> (mpsc::Receiver<FiredWake>, JoinHandle<()>) {
        let (fired_tx, fired_rx) = mpsc::channel(8);
        let handle = tokio::spawn(dispatch::dispatch_loop(
            self.clone(),
            poll_interval,
            fired_tx,
            shutdown,
        ));
        (fired_rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::testing::ManualClock;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup() -> (WakeScheduler, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("wakes.sqlite3")).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        (WakeScheduler::new(db, clock.clone()), clock, dir)
    }

    #[test]
    fn delays_round_up_to_whole_minutes() {
        assert_eq!(coarse_delay(Duration::from_secs(1500)), Duration::from_secs(1500));
        assert_eq!(coarse_delay(Duration::from_secs(61)), Duration::from_secs(120));
        assert_eq!(coarse_delay(Duration::from_secs(5)), Duration::from_secs(60));
        assert_eq!(coarse_delay(Duration::from_millis(60_001)), Duration::from_secs(120));
    }

    #[test]
    fn zero_delay_is_clamped_to_one_minute() {
        assert_eq!(coarse_delay(Duration::ZERO), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn schedule_replaces_previous_wake() {
        let (scheduler, _clock, _dir) = setup();

        scheduler
            .schedule("timer_work_1_a", Phase::Work, Duration::from_secs(1500))
            .await
            .unwrap();
        scheduler
            .schedule("timer_break_2_b", Phase::Break, Duration::from_secs(300))
            .await
            .unwrap();

        let outstanding = scheduler.outstanding().await.unwrap().unwrap();
        assert_eq!(outstanding.identifier, "timer_break_2_b");
        assert_eq!(outstanding.phase, Phase::Break);
    }

    #[tokio::test]
    async fn cancel_all_is_idempotent() {
        let (scheduler, _clock, _dir) = setup();
        scheduler
            .schedule("timer_work_1_a", Phase::Work, Duration::from_secs(60))
            .await
            .unwrap();

        scheduler.cancel_all().await.unwrap();
        scheduler.cancel_all().await.unwrap();
        assert!(scheduler.outstanding().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wake_is_due_only_after_coarse_deadline() {
        let (scheduler, clock, _dir) = setup();
        scheduler
            .schedule("timer_work_1_a", Phase::Work, Duration::from_secs(90))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(90));
        assert!(scheduler.fire_due().await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(30));
        let due = scheduler.fire_due().await.unwrap().unwrap();
        assert_eq!(due.identifier, "timer_work_1_a");
    }

    #[tokio::test]
    async fn acknowledge_fire_leaves_replacement_in_place() {
        let (scheduler, _clock, _dir) = setup();
        scheduler
            .schedule("timer_work_1_a", Phase::Work, Duration::from_secs(60))
            .await
            .unwrap();
        scheduler
            .schedule("timer_work_2_b", Phase::Work, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!scheduler.acknowledge_fire("timer_work_1_a").await.unwrap());
        assert_eq!(
            scheduler.outstanding().await.unwrap().unwrap().identifier,
            "timer_work_2_b"
        );
        assert!(scheduler.acknowledge_fire("timer_work_2_b").await.unwrap());
        assert!(scheduler.outstanding().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_wake_survives_reopening_the_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wakes.sqlite3");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));

        {
            let scheduler = WakeScheduler::new(Database::new(path.clone()).unwrap(), clock.clone());
            scheduler
                .schedule("timer_work_1_a", Phase::Work, Duration::from_secs(1500))
                .await
                .unwrap();
        }

        clock.advance(chrono::Duration::hours(2));
        let scheduler = WakeScheduler::new(Database::new(path).unwrap(), clock.clone());
        let due = scheduler.fire_due().await.unwrap().unwrap();
        assert_eq!(due.identifier, "timer_work_1_a");
    }
}
