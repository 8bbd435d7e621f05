//! Reconnecting push-channel client feeding a [`TraceMonitor`].
//!
//! One owned task runs the whole state machine, so at most one connection or pending
//! retry exists at any time. Retries never stop and never back off.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::error::TraceError;
use crate::shared::TraceConfig;
use crate::trace::monitor::TraceMonitor;

const KEEPALIVE_PING: &str = "ping";
const KEEPALIVE_PONG: &str = "pong";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Why the previous connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// An open connection closed, cleanly or with an error.
    Closed,
    /// The connection attempt itself failed.
    ConnectFailed,
}

/// Fixed reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub after_close: Duration,
    pub after_connect_error: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            after_close: Duration::from_millis(3_000),
            after_connect_error: Duration::from_millis(5_000),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &TraceConfig) -> Self {
        Self {
            after_close: Duration::from_millis(config.reconnect_delay_ms),
            after_connect_error: Duration::from_millis(config.connect_error_delay_ms),
        }
    }

    pub fn delay_for(&self, reason: CloseReason) -> Duration {
        match reason {
            CloseReason::Closed => self.after_close,
            CloseReason::ConnectFailed => self.after_connect_error,
        }
    }
}

/// Handle to the running connection task.
pub struct TraceConnection {
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TraceConnection {
    /// Starts the connect / read / reconnect loop against `url`.
    pub fn spawn(
        url: impl Into<String>,
        monitor: Arc<TraceMonitor>,
        policy: ReconnectPolicy,
        keepalive: Option<Duration>,
    ) -> Self {
        let url = url.into();
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            url,
            monitor,
            policy,
            keepalive,
            Arc::clone(&state),
            cancel.clone(),
        ));
        Self { state, cancel, task }
    }

    pub fn from_config(url: impl Into<String>, monitor: Arc<TraceMonitor>, config: &TraceConfig) -> Self {
        Self::spawn(
            url,
            monitor,
            ReconnectPolicy::from_config(config),
            config.keepalive_secs.map(Duration::from_secs),
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Stops the loop, cancelling any pending retry, and waits for the task to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(target: "learnpack::trace", error = %e, "Trace connection task ended abnormally");
        }
    }
}

fn set_state(state: &RwLock<ConnectionState>, next: ConnectionState) {
    if let Ok(mut s) = state.write() {
        *s = next;
    }
}

async fn run(
    url: String,
    monitor: Arc<TraceMonitor>,
    policy: ReconnectPolicy,
    keepalive: Option<Duration>,
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
) {
    loop {
        set_state(&state, ConnectionState::Connecting);
        let reason = tokio::select! {
            _ = cancel.cancelled() => break,
            reason = session(&url, &monitor, keepalive, &state) => reason,
        };
        monitor.set_connected(false);
        set_state(&state, ConnectionState::Disconnected);

        let delay = policy.delay_for(reason);
        tracing::debug!(target: "learnpack::trace", delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    monitor.set_connected(false);
    set_state(&state, ConnectionState::Disconnected);
    tracing::info!(target: "learnpack::trace", "Trace connection stopped");
}

/// One connection lifetime. Returns how it ended.
async fn session(
    url: &str,
    monitor: &TraceMonitor,
    keepalive: Option<Duration>,
    state: &RwLock<ConnectionState>,
) -> CloseReason {
    let (ws, _) = match connect_async(url).await {
        Ok(conn) => conn,
        Err(e) => {
            let err = TraceError::Connect(e.to_string());
            tracing::warn!(target: "learnpack::trace", url = url, error = %err, "Trace channel unavailable");
            return CloseReason::ConnectFailed;
        }
    };
    set_state(state, ConnectionState::Connected);
    monitor.set_connected(true);
    tracing::info!(target: "learnpack::trace", url = url, "Trace channel connected");

    let (mut sink, mut stream) = ws.split();
    let mut ticker = keepalive.map(|every| {
        let mut t = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        t
    });

    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = tick(&mut ticker) => {
                if let Err(e) = sink.send(Message::text(KEEPALIVE_PING)).await {
                    let err = TraceError::Transport(e.to_string());
                    tracing::warn!(target: "learnpack::trace", error = %err, "Keep-alive failed");
                    return CloseReason::Closed;
                }
                continue;
            }
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                let text = text.as_str();
                if text == KEEPALIVE_PONG {
                    continue;
                }
                // Decode failures are logged by the monitor.
                let _ = monitor.apply_text(text);
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(target: "learnpack::trace", frame = ?frame, "Trace channel closed by server");
                return CloseReason::Closed;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let err = TraceError::Transport(e.to_string());
                tracing::warn!(target: "learnpack::trace", error = %err, "Trace channel error");
                return CloseReason::Closed;
            }
            None => return CloseReason::Closed,
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            after_close: Duration::from_millis(20),
            after_connect_error: Duration::from_millis(20),
        }
    }

    #[test]
    fn delays_depend_on_how_the_connection_ended() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(CloseReason::Closed), Duration::from_secs(3));
        assert_eq!(policy.delay_for(CloseReason::ConnectFailed), Duration::from_secs(5));
        let from_cfg = ReconnectPolicy::from_config(&TraceConfig::default());
        assert_eq!(from_cfg, policy);
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn events_flow_and_reconnect_after_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // First connection: one event, then close.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::text(
                r#"{"type":"action_start","action":{"id":"a1","agent":"manager","action":"route"}}"#,
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            drop(ws);

            // Second connection: answer the keep-alive, then push a completion.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() && msg.to_text().unwrap() == KEEPALIVE_PING {
                    ws.send(Message::text(KEEPALIVE_PONG)).await.unwrap();
                    ws.send(Message::text(
                        r#"{"type":"action_update","action_id":"a1","status":"completed"}"#,
                    ))
                    .await
                    .unwrap();
                    break;
                }
            }
            // Hold the connection open until the client shuts down.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let monitor = Arc::new(TraceMonitor::default());
        let conn = TraceConnection::spawn(
            format!("ws://{}", addr),
            Arc::clone(&monitor),
            fast_policy(),
            Some(Duration::from_millis(30)),
        );

        wait_until(|| {
            monitor
                .snapshot()
                .recent_actions
                .first()
                .map_or(false, |a| a.status == crate::trace::model::ActionStatus::Completed)
        })
        .await;
        assert!(monitor.is_connected());
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.shutdown().await;
        assert!(!monitor.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn failed_connect_keeps_retrying_quietly() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = Arc::new(TraceMonitor::default());
        let conn = TraceConnection::spawn(
            format!("ws://{}", addr),
            Arc::clone(&monitor),
            fast_policy(),
            None,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!monitor.is_connected());
        assert_ne!(conn.state(), ConnectionState::Connected);
        conn.shutdown().await;
    }
}
