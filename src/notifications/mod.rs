use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use notify_rust::{Notification, NotificationHandle, Timeout};
use uuid::Uuid;

use crate::{
    audio::ChimePlayer,
    bridge::{UiEvent, UiRelay},
    models::Phase,
    settings::NotificationSettings,
};

const APP_NAME: &str = "Tomato Timer";
/// Action key the notification server reports for a click on the body.
const DEFAULT_ACTION: &str = "default";
/// Alerts nobody acknowledged are forgotten after this long.
const ALERT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// User-visible feedback for a finished phase. Implementations swallow and
/// log their own failures; nothing here may fail a session transition.
pub trait NotificationPresenter: Send + Sync {
    /// Shows the completion alert and returns its id if one was displayed.
    fn show(&self, phase: Phase) -> Option<String>;

    /// The user clicked the alert: dismiss it and ask for the UI.
    fn acknowledge(&self, notification_id: &str);

    /// Whether alerts can currently be shown at all.
    fn check_permission(&self) -> bool {
        true
    }
}

pub fn notification_copy(phase: Phase) -> (&'static str, &'static str) {
    match phase {
        Phase::Work => (
            "Work Session Completed!",
            "Great job! Time for a well-deserved break.",
        ),
        Phase::Break => (
            "Break Time Over!",
            "Break time is over. Ready to get back to work?",
        ),
    }
}

struct ActiveAlert {
    shown_at: Instant,
    handle: Option<NotificationHandle>,
}

/// Alerts still on screen, keyed by the id handed to the UI.
#[derive(Clone, Default)]
struct ActiveAlerts {
    inner: Arc<Mutex<HashMap<String, ActiveAlert>>>,
}

impl ActiveAlerts {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveAlert>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, notification_id: String, handle: Option<NotificationHandle>) {
        self.lock().insert(
            notification_id,
            ActiveAlert {
                shown_at: Instant::now(),
                handle,
            },
        );
    }

    fn take(&self, notification_id: &str) -> Option<ActiveAlert> {
        self.lock().remove(notification_id)
    }

    /// Drops alerts older than `max_age` without closing them.
    fn prune_older_than(&self, max_age: Duration) -> usize {
        let mut alerts = self.lock();
        let before = alerts.len();
        alerts.retain(|_, alert| alert.shown_at.elapsed() < max_age);
        before - alerts.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }
}

fn dismiss(handle: NotificationHandle) {
    #[cfg(all(unix, not(target_os = "macos")))]
    handle.close();
    #[cfg(not(all(unix, not(target_os = "macos"))))]
    drop(handle);
}

/// Shared by the UI acknowledge message and a click on the alert itself.
fn acknowledge_alert(alerts: &ActiveAlerts, relay: &UiRelay, notification_id: &str) {
    match alerts.take(notification_id) {
        Some(ActiveAlert {
            handle: Some(handle),
            ..
        }) => dismiss(handle),
        Some(_) => {}
        None => debug!("Acknowledged unknown notification {notification_id}"),
    }

    if relay.publish(UiEvent::ShowUi) == 0 {
        info!("Could not open the timer UI: no UI attached");
    }
}

pub struct DesktopPresenter {
    settings: NotificationSettings,
    chime: ChimePlayer,
    relay: UiRelay,
    active: ActiveAlerts,
}

impl DesktopPresenter {
    pub fn new(settings: NotificationSettings, chime: ChimePlayer, relay: UiRelay) -> Self {
        Self {
            settings,
            chime,
            relay,
            active: ActiveAlerts::default(),
        }
    }

    fn play_chime(&self, phase: Phase) {
        if !self.settings.chime_enabled {
            return;
        }
        if let Err(err) = self.chime.play(phase, self.settings.chime_volume) {
            warn!("Could not play completion chime: {err}");
        }
    }

    fn track(&self, notification_id: &str, handle: NotificationHandle) {
        #[cfg(all(unix, not(target_os = "macos")))]
        let server_id = handle.id();

        self.active.insert(notification_id.to_string(), Some(handle));

        #[cfg(all(unix, not(target_os = "macos")))]
        self.watch_for_click(notification_id.to_string(), server_id);
    }

    /// Blocks a short-lived thread on the notification's action signal until
    /// the alert is clicked or closed.
    #[cfg(all(unix, not(target_os = "macos")))]
    fn watch_for_click(&self, notification_id: String, server_id: u32) {
        use notify_rust::ActionResponse;

        let alerts = self.active.clone();
        let relay = self.relay.clone();
        let spawned = std::thread::Builder::new()
            .name("tomato-alert".into())
            .spawn(move || {
                let result = notify_rust::handle_action(server_id, |response| match response {
                    ActionResponse::Custom(action) if *action == DEFAULT_ACTION => {
                        info!("Notification {notification_id} clicked");
                        acknowledge_alert(&alerts, &relay, &notification_id);
                    }
                    ActionResponse::Custom(action) => {
                        debug!("Ignoring action {action} on {notification_id}");
                    }
                    ActionResponse::Closed(reason) => {
                        debug!("Notification {notification_id} closed: {reason:?}");
                        alerts.take(&notification_id);
                    }
                });
                if let Err(err) = result {
                    warn!("Stopped watching notification {notification_id}: {err}");
                }
            });

        if let Err(err) = spawned {
            warn!("Could not watch notification clicks: {err}");
        }
    }

    pub fn shutdown(&self) {
        if let Err(err) = self.chime.stop() {
            warn!("Could not stop chime player: {err}");
        }
    }
}

impl NotificationPresenter for DesktopPresenter {
    fn show(&self, phase: Phase) -> Option<String> {
        self.play_chime(phase);

        let pruned = self.active.prune_older_than(ALERT_RETENTION);
        if pruned > 0 {
            debug!("Forgot {pruned} stale notification(s)");
        }

        if !self.settings.enabled {
            debug!("Notifications disabled; skipping {phase} completion alert");
            return None;
        }

        let (title, body) = notification_copy(phase);
        let notification_id = format!("timer_{}_{}", phase, Uuid::new_v4().simple());

        match Notification::new()
            .summary(title)
            .body(body)
            .appname(APP_NAME)
            .icon("alarm-clock")
            .action(DEFAULT_ACTION, "Open timer")
            .timeout(Timeout::Milliseconds(self.settings.timeout_ms))
            .show()
        {
            Ok(handle) => {
                info!("Notification {notification_id} shown");
                self.track(&notification_id, handle);
                Some(notification_id)
            }
            Err(err) => {
                error!("Notification failed: {err}");
                None
            }
        }
    }

    fn acknowledge(&self, notification_id: &str) {
        acknowledge_alert(&self.active, &self.relay, notification_id);
    }

    fn check_permission(&self) -> bool {
        if !self.settings.enabled {
            warn!("Notifications are disabled. Enable them in settings.json to get completion alerts.");
        }
        self.settings.enabled
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_settings() -> NotificationSettings {
        NotificationSettings {
            enabled: false,
            chime_enabled: false,
            ..NotificationSettings::default()
        }
    }

    #[test]
    fn copy_differs_per_phase() {
        let (work_title, _) = notification_copy(Phase::Work);
        let (break_title, break_body) = notification_copy(Phase::Break);
        assert_ne!(work_title, break_title);
        assert!(break_body.contains("back to work"));
    }

    #[test]
    fn disabled_presenter_shows_nothing_and_reports_permission() {
        let presenter = DesktopPresenter::new(quiet_settings(), ChimePlayer::new(), UiRelay::default());
        assert_eq!(presenter.show(Phase::Work), None);
        assert!(!presenter.check_permission());
    }

    #[tokio::test]
    async fn acknowledge_requests_attached_ui() {
        let relay = UiRelay::default();
        let mut rx = relay.subscribe();
        let presenter = DesktopPresenter::new(quiet_settings(), ChimePlayer::new(), relay);

        presenter.acknowledge("timer_work_missing");
        assert_eq!(rx.recv().await.unwrap(), UiEvent::ShowUi);
    }

    #[tokio::test]
    async fn acknowledge_forgets_the_alert() {
        let relay = UiRelay::default();
        let mut rx = relay.subscribe();
        let presenter = DesktopPresenter::new(quiet_settings(), ChimePlayer::new(), relay);
        presenter.active.insert("timer_work_a".into(), None);
        presenter.active.insert("timer_break_b".into(), None);

        presenter.acknowledge("timer_work_a");
        assert_eq!(rx.recv().await.unwrap(), UiEvent::ShowUi);
        assert!(presenter.active.take("timer_work_a").is_none());
        assert_eq!(presenter.active.len(), 1);
    }

    #[test]
    fn stale_alerts_are_pruned() {
        let alerts = ActiveAlerts::default();
        alerts.insert("timer_work_a".into(), None);
        alerts.insert("timer_work_b".into(), None);

        assert_eq!(alerts.prune_older_than(ALERT_RETENTION), 0);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts.prune_older_than(Duration::ZERO), 2);
        assert_eq!(alerts.len(), 0);
    }
}
