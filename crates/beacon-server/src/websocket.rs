//! Per-subscriber socket task.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use beacon_core::Token;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::connection::{CloseReason, Connection};
use crate::server::AppState;

/// Heartbeat timing for one socket.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Time between pings.
    pub interval: Duration,
    /// Silence after which the subscriber is dropped.
    pub timeout: Duration,
}

impl Heartbeat {
    /// Consecutive unanswered pings tolerated before timing out.
    pub fn max_missed(&self) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let missed = (self.timeout.as_millis() / interval).max(1);
        u32::try_from(missed).unwrap_or(u32::MAX)
    }
}

/// Serve one subscriber from upgrade to close.
#[instrument(skip_all, fields(%token))]
pub async fn serve(socket: WebSocket, state: AppState, token: Token) {
    let settings = &state.settings;
    let (connection, rx) = Connection::channel(settings.send_queue_capacity);
    let connection = Arc::new(connection);
    let heartbeat = Heartbeat {
        interval: Duration::from_secs(settings.heartbeat_interval_secs),
        timeout: Duration::from_secs(settings.heartbeat_timeout_secs),
    };

    state.lifecycle.subscribe(token.clone(), Arc::clone(&connection));
    info!(conn_id = %connection.id(), "subscriber connected");

    pump(socket, &connection, rx, heartbeat, &state.shutdown).await;

    let reason = connection.finish();
    info!(
        conn_id = %connection.id(),
        %reason,
        age_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "subscriber closed"
    );
}

/// Drive the socket until the connection closes.
///
/// Forwards queued frames and probes liveness with pings. On exit, sends the
/// close frame matching the recorded [`CloseReason`].
pub async fn pump(
    socket: WebSocket,
    connection: &Connection,
    mut rx: mpsc::Receiver<Arc<String>>,
    heartbeat: Heartbeat,
    shutdown: &CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let mut ticker = time::interval(heartbeat.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;
    let max_missed = heartbeat.max_missed();
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            biased;

            () = connection.closed() => break,

            // Also covers subscribers that registered after the shutdown sweep.
            () = shutdown.cancelled() => {
                let _ = connection.close(CloseReason::Shutdown);
                break;
            }

            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(Message::Text(frame.as_str().into())).await.is_err() {
                    let _ = connection.close(CloseReason::Disconnected);
                    break;
                }
            }

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Close(_)) | Err(_)) | None => {
                    let _ = connection.close(CloseReason::Disconnected);
                    break;
                }
                // Subscribers are receive-only; anything else is a sign of
                // life and nothing more.
                Some(Ok(_)) => connection.mark_alive(),
            },

            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        debug!(conn_id = %connection.id(), missed, "heartbeat timed out");
                        let _ = connection.close(CloseReason::TimedOut);
                        break;
                    }
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    let _ = connection.close(CloseReason::Disconnected);
                    break;
                }
                trace!(conn_id = %connection.id(), "sent ping");
            }
        }
    }

    let reason = connection.close_reason().unwrap_or(CloseReason::Disconnected);
    if let Some((code, text)) = reason.close_frame() {
        let frame = CloseFrame {
            code,
            reason: text.into(),
        };
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
    let _ = sink.close().await;
}
