use std::path::Path;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::timer::{commands, SessionController};

use super::{UiEvent, UiRelay};

pub const SOCKET_FILE_NAME: &str = "tomato.sock";
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Binds the UI socket, replacing a stale socket file left by a previous
/// run. The socket is owner-only.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set socket permissions: {}", path.display()))?;
    }

    info!("Listening for UI connections on {}", path.display());
    Ok(listener)
}

/// Accepts UI connections until `shutdown` fires.
pub async fn serve(
    listener: UnixListener,
    controller: SessionController,
    relay: UiRelay,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let controller = controller.clone();
                        let events = relay.subscribe();
                        tokio::spawn(async move {
                            if let Err(err) = handle_client(stream, controller, events).await {
                                warn!("UI connection error: {err:?}");
                            }
                        });
                    }
                    Err(err) => error!("Accept error: {err}"),
                }
            }
            _ = shutdown.cancelled() => {
                info!("UI socket shutting down");
                break;
            }
        }
    }
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Newline-delimited JSON: each request line gets exactly one response line.
/// Relay events are interleaved whenever they occur. A line longer than
/// [`MAX_MESSAGE_BYTES`] gets an error payload and closes the connection.
async fn handle_client(
    mut stream: UnixStream,
    controller: SessionController,
    mut events: broadcast::Receiver<UiEvent>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut lines = FramedRead::new(
        reader,
        LinesCodec::new_with_max_length(MAX_MESSAGE_BYTES),
    );

    loop {
        tokio::select! {
            next = lines.next() => {
                match next {
                    None => break,
                    Some(Ok(line)) => {
                        let raw = line.trim();
                        if !raw.is_empty() {
                            let response = commands::handle_message(&controller, raw).await;
                            write_line(&mut writer, &response).await?;
                        }
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!("UI sent a message over {MAX_MESSAGE_BYTES} bytes; closing");
                        let response = commands::Response::error(format!(
                            "Message too large (max {MAX_MESSAGE_BYTES} bytes)"
                        ));
                        write_line(&mut writer, &response).await?;
                        break;
                    }
                    Some(Err(LinesCodecError::Io(err))) => {
                        warn!("Error reading from UI: {err}");
                        break;
                    }
                }
            }
            result = events.recv() => {
                match result {
                    Ok(event) => {
                        if write_line(&mut writer, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("UI lagged; dropped {skipped} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    use super::*;
    use crate::{
        db::Database, models::Phase, notifications::testing::RecordingPresenter,
        scheduler::WakeScheduler, settings::PhaseDurations, stats::StatsStore,
        utils::clock::testing::ManualClock,
    };

    struct Running {
        socket: std::path::PathBuf,
        relay: UiRelay,
        shutdown: CancellationToken,
        _dir: TempDir,
    }

    async fn start_server() -> Running {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("server.sqlite3")).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let relay = UiRelay::default();
        let controller = SessionController::new(
            WakeScheduler::new(db.clone(), clock.clone()),
            StatsStore::new(db, clock),
            Arc::new(RecordingPresenter::default()),
            relay.clone(),
            PhaseDurations::default(),
        );

        let socket = dir.path().join(SOCKET_FILE_NAME);
        let listener = bind(&socket).unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, controller, relay.clone(), shutdown.clone()));

        Running {
            socket,
            relay,
            shutdown,
            _dir: dir,
        }
    }

    async fn read_json<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Value {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn answers_one_line_per_request() {
        let server = start_server().await;
        let stream = UnixStream::connect(&server.socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer
            .write_all(b"{\"type\":\"START_TIMER\",\"duration\":1500,\"phase\":\"work\"}\n")
            .await
            .unwrap();
        assert_eq!(read_json(&mut reader).await, json!({"success": true}));

        writer.write_all(b"{\"type\":\"NOPE\"}\n").await.unwrap();
        assert_eq!(
            read_json(&mut reader).await,
            json!({"error": "Unknown message type"})
        );

        writer.write_all(b"{\"type\":\"GET_STATS\"}\n").await.unwrap();
        assert_eq!(
            read_json(&mut reader).await,
            json!({"completedSessions": 0, "totalFocusTime": 0})
        );

        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn forwards_relay_events_to_attached_ui() {
        let server = start_server().await;
        let stream = UnixStream::connect(&server.socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        // A response proves the connection is subscribed before publishing.
        writer.write_all(b"{\"type\":\"GET_STATS\"}\n").await.unwrap();
        read_json(&mut reader).await;

        server
            .relay
            .publish(UiEvent::TimerCompleted {
                phase: Phase::Break,
                notification_id: Some("timer_break_n1".into()),
            });
        assert_eq!(
            read_json(&mut reader).await,
            json!({"type": "TIMER_COMPLETED", "phase": "break", "notificationId": "timer_break_n1"})
        );

        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn request_split_around_an_event_is_still_answered() {
        let server = start_server().await;
        let stream = UnixStream::connect(&server.socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        writer.write_all(b"{\"type\":\"GET_STATS\"}\n").await.unwrap();
        read_json(&mut reader).await;

        writer.write_all(b"{\"type\":\"GET_").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.relay.publish(UiEvent::TimerCompleted {
            phase: Phase::Work,
            notification_id: None,
        });
        assert_eq!(
            read_json(&mut reader).await,
            json!({"type": "TIMER_COMPLETED", "phase": "work"})
        );

        writer.write_all(b"STATS\"}\n").await.unwrap();
        assert_eq!(
            read_json(&mut reader).await,
            json!({"completedSessions": 0, "totalFocusTime": 0})
        );

        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn oversized_line_is_rejected_and_connection_closed() {
        let server = start_server().await;
        let stream = UnixStream::connect(&server.socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        // The server stops reading once the limit is hit, so the tail of the
        // write may fail with a broken pipe.
        tokio::spawn(async move {
            let flood = vec![b'x'; MAX_MESSAGE_BYTES + 1024];
            let _ = writer.write_all(&flood).await;
        });

        let response = read_json(&mut reader).await;
        assert!(response["error"]
            .as_str()
            .unwrap()
            .starts_with("Message too large"));

        let mut rest = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);

        server.shutdown.cancel();
    }

    #[tokio::test]
    async fn rebinding_replaces_stale_socket_file() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join(SOCKET_FILE_NAME);
        std::fs::write(&socket, b"stale").unwrap();
        assert!(bind(&socket).is_ok());
    }
}
