use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::models::{Phase, ScheduledWake};

use super::WakeScheduler;

// Set to true to log every poll of the wake slot.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// A delivered wake. The slot stays persisted until the receiver calls
/// [`FiredWake::handled`]; dropping it unhandled gets it delivered again.
#[derive(Debug)]
pub struct FiredWake {
    pub identifier: String,
    pub phase: Phase,
    pub fire_at: DateTime<Utc>,
    done: oneshot::Sender<()>,
}

impl FiredWake {
    fn new(wake: ScheduledWake, done: oneshot::Sender<()>) -> Self {
        Self {
            identifier: wake.identifier,
            phase: wake.phase,
            fire_at: wake.fire_at,
            done,
        }
    }

    /// Lets the dispatch loop clear the slot.
    pub fn handled(self) {
        if self.done.send(()).is_err() {
            log_debug!("dispatch loop gone before wake {} was cleared", self.identifier);
        }
    }
}

pub(super) async fn dispatch_loop(
    scheduler: WakeScheduler,
    poll_interval: Duration,
    fired_tx: mpsc::Sender<FiredWake>,
    shutdown: CancellationToken,
) {
    let rearm = scheduler.rearm_signal();
    log_info!(
        "wake dispatch loop started (poll every {}s)",
        poll_interval.as_secs_f32()
    );

    loop {
        let mut back_off = false;

        match scheduler.fire_due().await {
            Ok(Some(wake)) => {
                let identifier = wake.identifier.clone();
                log_info!(
                    "Wake {} fired (scheduled for {})",
                    identifier,
                    wake.fire_at.to_rfc3339()
                );

                let (done_tx, done_rx) = oneshot::channel();
                if fired_tx.send(FiredWake::new(wake, done_tx)).await.is_err() {
                    log_warn!("wake receiver dropped; stopping dispatch loop");
                    break;
                }

                // The slot is cleared only once the wake was handled, so a
                // crash in between delivers it again on the next start.
                let handled = tokio::select! {
                    result = done_rx => result.is_ok(),
                    _ = shutdown.cancelled() => {
                        log_info!("wake dispatch loop shutting down with {} in flight", identifier);
                        break;
                    }
                };

                if !handled {
                    log_warn!("wake {} dropped unhandled; will redeliver", identifier);
                    back_off = true;
                } else if let Err(err) = scheduler.acknowledge_fire(&identifier).await {
                    log_error!("failed to clear fired wake {}: {err:?}", identifier);
                    back_off = true;
                }
            }
            Ok(None) => {}
            Err(err) => log_error!("failed to check scheduled wake: {err:?}"),
        }

        let wait = if back_off {
            poll_interval
        } else {
            next_wait(&scheduler, poll_interval).await
        };
        log_debug!("next wake check in {}ms", wait.as_millis());

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = rearm.notified() => {
                log_debug!("wake slot changed, re-checking");
            }
            _ = shutdown.cancelled() => {
                log_info!("wake dispatch loop shutting down");
                break;
            }
        }
    }
}

/// Sleeps until the pending deadline, but never longer than one poll
/// interval: a suspended host does not advance monotonic sleeps, so the wall
/// clock has to be re-read periodically.
async fn next_wait(scheduler: &WakeScheduler, poll_interval: Duration) -> Duration {
    match scheduler.outstanding().await {
        Ok(Some(wake)) => {
            let until = (wake.fire_at - scheduler.now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            until.min(poll_interval)
        }
        Ok(None) => poll_interval,
        Err(err) => {
            log_error!("failed to read scheduled wake: {err:?}");
            poll_interval
        }
    }
}
