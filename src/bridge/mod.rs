pub mod server;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::Phase;

/// Events pushed to whichever UI happens to be attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiEvent {
    /// `notificationId` is what `ACKNOWLEDGE_NOTIFICATION` expects back.
    TimerCompleted {
        phase: Phase,
        #[serde(
            rename = "notificationId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        notification_id: Option<String>,
    },
    /// Ask the host to bring the popup to the foreground.
    ShowUi,
}

/// Fire-and-forget broadcast. Nothing is queued for UIs that attach later.
#[derive(Clone)]
pub struct UiRelay {
    tx: broadcast::Sender<UiEvent>,
}

impl UiRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Returns how many UIs received the event. Zero is the normal case when
    /// the popup is closed.
    pub fn publish(&self, event: UiEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!("No UI attached to receive {:?}", event);
                0
            }
        }
    }
}

impl Default for UiRelay {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_listeners_is_not_an_error() {
        let relay = UiRelay::default();
        assert_eq!(relay.publish(UiEvent::ShowUi), 0);
    }

    #[tokio::test]
    async fn attached_listener_receives_event() {
        let relay = UiRelay::default();
        let mut rx = relay.subscribe();
        let event = UiEvent::TimerCompleted {
            phase: Phase::Work,
            notification_id: None,
        };
        assert_eq!(relay.publish(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(UiEvent::TimerCompleted {
            phase: Phase::Break,
            notification_id: Some("timer_break_abc".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "TIMER_COMPLETED");
        assert_eq!(json["phase"], "break");
        assert_eq!(json["notificationId"], "timer_break_abc");
        let json = serde_json::to_value(UiEvent::ShowUi).unwrap();
        assert_eq!(json["type"], "SHOW_UI");
    }
}
