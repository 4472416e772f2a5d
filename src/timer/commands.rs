use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Phase, StatsSummary};

use super::{SessionController, TimerSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    StartTimer { duration: u64, phase: Phase },
    StopTimer,
    SessionCompleted { phase: Phase },
    GetStats,
    GetTimerState,
    #[serde(rename_all = "camelCase")]
    AcknowledgeNotification { notification_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack { success: bool },
    Stats(StatsSummary),
    State(TimerSnapshot),
    Error { error: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }
}

const KNOWN_TYPES: [&str; 6] = [
    "START_TIMER",
    "STOP_TIMER",
    "SESSION_COMPLETED",
    "GET_STATS",
    "GET_TIMER_STATE",
    "ACKNOWLEDGE_NOTIFICATION",
];

/// Parses one raw message. Unknown types and malformed fields come back as
/// an error payload rather than an `Err`.
pub fn parse_request(raw: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| Response::error(format!("Malformed message: {err}")))?;

    match value.get("type").and_then(Value::as_str) {
        Some(kind) if KNOWN_TYPES.contains(&kind) => {}
        _ => return Err(Response::error("Unknown message type")),
    }

    serde_json::from_value(value)
        .map_err(|err| Response::error(format!("Invalid message fields: {err}")))
}

pub async fn handle_request(controller: &SessionController, request: Request) -> Response {
    debug!("Received message: {request:?}");

    match request {
        Request::StartTimer { duration, phase } => {
            match controller.start_timer(duration, phase).await {
                Ok(_) => Response::ok(),
                Err(err) => {
                    warn!("Rejected START_TIMER: {err}");
                    Response::error(err.to_string())
                }
            }
        }
        Request::StopTimer => {
            controller.stop_timer().await;
            Response::ok()
        }
        Request::SessionCompleted { phase } => {
            controller.complete_session(phase).await;
            Response::ok()
        }
        Request::GetStats => Response::Stats(controller.get_stats().await),
        Request::GetTimerState => Response::State(controller.get_snapshot().await),
        Request::AcknowledgeNotification { notification_id } => {
            controller.acknowledge_notification(&notification_id).await;
            Response::ok()
        }
    }
}

/// One line in, one line out.
pub async fn handle_message(controller: &SessionController, raw: &str) -> Response {
    match parse_request(raw) {
        Ok(request) => handle_request(controller, request).await,
        Err(response) => {
            warn!("Rejected message {raw:?}");
            response
        }
    }
}
