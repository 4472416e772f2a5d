use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::{
    bridge::{UiEvent, UiRelay},
    models::{
        wake::{new_identifier, phase_from_identifier},
        Phase, StatsSummary, TimerRequest,
    },
    notifications::NotificationPresenter,
    scheduler::{coarse_delay, FiredWake, WakeScheduler},
    settings::PhaseDurations,
    stats::StatsStore,
};

use super::{SessionState, TimerStatus};

/// What the popup needs to redraw its countdown after reopening.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub phase: Option<Phase>,
    pub identifier: Option<String>,
    pub fire_at: Option<DateTime<Utc>>,
    pub remaining_secs: u64,
    pub work_secs: u64,
    pub break_secs: u64,
}

#[derive(Default)]
struct ControllerState {
    session: SessionState,
    /// Last wake handled by this process. Guards against a duplicate
    /// delivery; it does not survive a restart.
    last_handled: Option<String>,
}

/// The session state machine. Every handler holds the state lock for its
/// whole duration, so start/stop/wake/completion never interleave.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<ControllerState>>,
    scheduler: WakeScheduler,
    stats: StatsStore,
    presenter: Arc<dyn NotificationPresenter>,
    relay: UiRelay,
    durations: PhaseDurations,
}

impl SessionController {
    pub fn new(
        scheduler: WakeScheduler,
        stats: StatsStore,
        presenter: Arc<dyn NotificationPresenter>,
        relay: UiRelay,
        durations: PhaseDurations,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState::default())),
            scheduler,
            stats,
            presenter,
            relay,
            durations,
        }
    }

    /// Rebuilds the in-memory state from the persisted wake after a restart.
    pub async fn restore(&self) {
        let mut guard = self.state.lock().await;
        match self.scheduler.outstanding().await {
            Ok(Some(wake)) => {
                info!(
                    "Restored pending {} timer {} (fires {})",
                    wake.phase,
                    wake.identifier,
                    wake.fire_at.to_rfc3339()
                );
                guard.session = SessionState::from_wake(&wake);
            }
            Ok(None) => guard.session = SessionState::Idle,
            Err(err) => error!("Failed to restore pending timer: {err:?}"),
        }
    }

    pub async fn get_snapshot(&self) -> TimerSnapshot {
        let guard = self.state.lock().await;
        self.snapshot_of(&guard.session)
    }

    fn snapshot_of(&self, session: &SessionState) -> TimerSnapshot {
        let fire_at = match session {
            SessionState::Idle => None,
            SessionState::Running { fire_at, .. } => Some(*fire_at),
        };
        TimerSnapshot {
            status: session.status(),
            phase: session.phase(),
            identifier: session.identifier().map(str::to_string),
            fire_at,
            remaining_secs: session.remaining_secs(self.scheduler.now()),
            work_secs: self.durations.seconds(Phase::Work),
            break_secs: self.durations.seconds(Phase::Break),
        }
    }

    /// Starts `phase`, superseding whatever timer was running.
    pub async fn start_timer(&self, duration_secs: u64, phase: Phase) -> Result<TimerSnapshot> {
        let request = TimerRequest::new(phase, duration_secs)?;

        let mut guard = self.state.lock().await;

        if let Err(err) = self.scheduler.cancel_all().await {
            error!("Failed to cancel previous wake: {err:?}");
        }

        let now = self.scheduler.now();
        let identifier = new_identifier(request.phase, now);

        guard.session = match self
            .scheduler
            .schedule(&identifier, request.phase, request.delay())
            .await
        {
            Ok(wake) => SessionState::from_wake(&wake),
            Err(err) => {
                // Reported to the caller as success; the wake is unconfirmed.
                error!("Failed to schedule wake {identifier}: {err:?}");
                let fire_at = now
                    + chrono::Duration::from_std(coarse_delay(request.delay()))
                        .unwrap_or_else(|_| chrono::Duration::zero());
                SessionState::Running {
                    phase: request.phase,
                    identifier: identifier.clone(),
                    fire_at,
                }
            }
        };

        info!(
            "Timer started: {phase} for {duration_secs} seconds ({:.2} minutes), wake {identifier}",
            duration_secs as f64 / 60.0
        );

        Ok(self.snapshot_of(&guard.session))
    }

    pub async fn stop_timer(&self) {
        let mut guard = self.state.lock().await;
        if let Err(err) = self.scheduler.cancel_all().await {
            error!("Failed to cancel wake: {err:?}");
        }
        match std::mem::take(&mut guard.session) {
            SessionState::Idle => debug!("Stop requested while idle"),
            SessionState::Running { identifier, .. } => info!("Timer {identifier} stopped"),
        }
    }

    /// A scheduled wake elapsed. Handled even when the in-memory state does
    /// not know the timer, since the process may have restarted since it was
    /// started.
    pub async fn handle_wake(&self, identifier: &str) {
        let phase = match phase_from_identifier(identifier) {
            Ok(phase) => phase,
            Err(err) => {
                warn!("Ignoring wake: {err}");
                return;
            }
        };

        let mut guard = self.state.lock().await;
        if guard.last_handled.as_deref() == Some(identifier) {
            info!("Wake {identifier} already handled; ignoring duplicate");
            return;
        }
        guard.last_handled = Some(identifier.to_string());

        if guard.session.is_running(identifier) {
            guard.session = SessionState::Idle;
        }

        info!("Processing timer completion for phase: {phase}");
        let notification_id = self.complete(phase).await;

        let delivered = self.relay.publish(UiEvent::TimerCompleted {
            phase,
            notification_id,
        });
        if delivered == 0 {
            debug!("Popup not available to receive timer completion message");
        }
    }

    /// The UI finished a countdown locally. If that phase is the one running
    /// here, its wake is cancelled so the session is not counted twice. The
    /// reporting UI already knows, so nothing is relayed back.
    pub async fn complete_session(&self, phase: Phase) {
        let mut guard = self.state.lock().await;

        if guard.session.phase() == Some(phase) {
            if let Err(err) = self.scheduler.cancel_all().await {
                error!("Failed to cancel wake for completed session: {err:?}");
            }
            if let SessionState::Running { identifier, .. } = std::mem::take(&mut guard.session) {
                guard.last_handled = Some(identifier);
            }
        }

        self.complete(phase).await;
    }

    pub async fn get_stats(&self) -> StatsSummary {
        let _guard = self.state.lock().await;
        self.stats.summary().await
    }

    pub async fn acknowledge_notification(&self, notification_id: &str) {
        let presenter = self.presenter.clone();
        let notification_id = notification_id.to_string();
        if let Err(err) =
            tokio::task::spawn_blocking(move || presenter.acknowledge(&notification_id)).await
        {
            error!("Acknowledge task failed: {err}");
        }
    }

    /// Feeds fires from the dispatch loop through [`Self::handle_wake`] one
    /// at a time until the channel closes. Each fire is marked handled only
    /// after its completion ran.
    pub async fn process_wakes(&self, mut fired_rx: mpsc::Receiver<FiredWake>) {
        while let Some(fired) = fired_rx.recv().await {
            self.handle_wake(&fired.identifier).await;
            fired.handled();
        }
        debug!("Wake channel closed");
    }

    /// Notification and stats for a finished phase. Returns the id of the
    /// alert, if one was shown.
    async fn complete(&self, phase: Phase) -> Option<String> {
        let presenter = self.presenter.clone();
        let shown = tokio::task::spawn_blocking(move || presenter.show(phase)).await;
        let notification_id = match shown {
            Ok(id) => id,
            Err(err) => {
                error!("Notification task failed: {err}");
                None
            }
        };

        if phase == Phase::Work {
            self.stats.record_completed_work_session().await;
        }

        notification_id
    }
}
