//! Stream client for the hub websocket.
//!
//! Owns the single long-lived connection to the upstream hub and exposes the
//! received state-change envelopes as a channel of [`RawEvent`]. Connection
//! lifecycle:
//!
//! ```text
//! DISCONNECTED → CONNECTING → AUTHENTICATING → SUBSCRIBED
//!                    ▲                             │
//!                    └──── RECONNECTING ◀── ERROR ─┘
//! ```
//!
//! On any transport failure or keepalive timeout while subscribed, the client
//! waits with jittered exponential backoff and reconnects, re-issuing the
//! subscription before resuming delivery. Authentication rejection past the
//! configured limit is fatal and reported upward instead of retrying the same
//! credentials forever.
//!
//! The keepalive ping runs on its own interval inside the session loop,
//! independent of event delivery; a missing pong within the timeout tears the
//! session down so the reconnect path can take over.

mod backoff;
pub mod protocol;

pub use backoff::Backoff;

use crate::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hearth_core::RawEvent;
use parking_lot::Mutex;
use protocol::{ClientMessage, STATE_CHANGED, ServerMessage};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Configuration for the hub stream client.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub websocket endpoint, e.g. `ws://hub.local:8123/api/websocket`.
    pub url: String,

    /// Bearer token presented during the auth handshake.
    pub access_token: String,

    /// Consecutive authentication rejections before giving up. Retrying
    /// identical credentials past this point cannot succeed.
    pub auth_failure_limit: u32,

    /// Timeout for connection establishment and each handshake read.
    pub connect_timeout: Duration,

    /// Base reconnect delay; doubles per attempt.
    pub backoff_base: Duration,

    /// Cap on the reconnect delay.
    pub backoff_max: Duration,

    /// How often to send a keepalive ping while subscribed.
    pub ping_interval: Duration,

    /// How long to wait for a pong before declaring the connection dead.
    pub pong_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8123/api/websocket".to_string(),
            access_token: String::new(),
            auth_failure_limit: 3,
            connect_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Reconnecting => "reconnecting",
        }
    }

    fn gauge_value(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Authenticating => 2.0,
            Self::Subscribed => 3.0,
            Self::Reconnecting => 4.0,
        }
    }
}

/// Counters exposed on the health surface.
#[derive(Debug, Default)]
pub struct HubStats {
    pub events_received: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub reconnects: AtomicU64,
    pub auth_failures: AtomicU64,
}

impl HubStats {
    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Serialize)]
pub struct HubStatsSnapshot {
    pub events_received: u64,
    pub frames_malformed: u64,
    pub reconnects: u64,
    pub auth_failures: u64,
}

/// How a session ended when it was not an error.
enum SessionEnd {
    /// `stop()` was called; the subscription was closed cleanly.
    Stopped,
    /// The downstream event channel closed; the pipeline is shutting down.
    ChannelClosed,
}

/// The hub stream client.
///
/// `run` drives the connect/auth/subscribe/stream loop until `stop()` is
/// called, the event channel closes, or authentication fails fatally.
pub struct HubClient {
    config: HubConfig,
    state: Mutex<ConnectionState>,
    stats: Arc<HubStats>,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl HubClient {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectionState::Disconnected),
            stats: Arc::new(HubStats::default()),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
        }
    }

    /// Shared handle to the client's counters.
    pub fn stats(&self) -> Arc<HubStats> {
        Arc::clone(&self.stats)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Signal the client to close its subscription and stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::info!(from = state.as_str(), to = next.as_str(), "hub connection state");
            *state = next;
            metrics::gauge!("hub_connection_state").set(next.gauge_value());
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Run the connection loop, delivering events into `events`.
    ///
    /// Returns `Ok(())` on a clean stop and `Err` only for fatal conditions
    /// (repeated authentication rejection). Transport failures are handled
    /// internally via reconnection.
    pub async fn run(&self, events: mpsc::Sender<RawEvent>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_max);
        let mut auth_rejections = 0u32;

        while self.running.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Connecting);

            match self.run_session(&events, &mut backoff, &mut auth_rejections).await {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::ChannelClosed) => {
                    tracing::info!("event channel closed, stopping hub client");
                    break;
                }
                Err(Error::AuthRejected(reason)) => {
                    auth_rejections += 1;
                    self.stats.auth_failures.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("hub_auth_failures_total").increment(1);
                    tracing::error!(
                        %reason,
                        attempt = auth_rejections,
                        limit = self.config.auth_failure_limit,
                        "hub rejected authentication"
                    );
                    if auth_rejections >= self.config.auth_failure_limit {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(Error::AuthFailed {
                            attempts: auth_rejections,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "hub session ended");
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            self.set_state(ConnectionState::Reconnecting);
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("hub_reconnects_total").increment(1);

            let delay = backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::time::sleep(delay).await;
        }

        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// One full connect → authenticate → subscribe → stream cycle.
    async fn run_session(
        &self,
        events: &mpsc::Sender<RawEvent>,
        backoff: &mut Backoff,
        auth_rejections: &mut u32,
    ) -> Result<SessionEnd> {
        let connect = connect_async(self.config.url.as_str());
        let (ws, _response) = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectTimeout {
                timeout_secs: self.config.connect_timeout.as_secs(),
            })??;
        let (mut sink, mut source) = ws.split();

        self.set_state(ConnectionState::Authenticating);
        self.authenticate(&mut sink, &mut source).await?;

        // Subscribe before delivering anything. Re-issued on every reconnect;
        // a session without the subscription would sit silent forever.
        let sub_id = self.next_id();
        send_json(
            &mut sink,
            &ClientMessage::SubscribeEvents {
                id: sub_id,
                event_type: STATE_CHANGED,
            },
        )
        .await?;
        self.await_subscribe_ack(&mut source, sub_id).await?;

        self.set_state(ConnectionState::Subscribed);
        *auth_rejections = 0;
        backoff.reset();
        tracing::info!(subscription = sub_id, "subscribed to state changes");

        self.stream_events(&mut sink, &mut source, events).await
    }

    /// Perform the auth handshake: wait for `auth_required`, send the token,
    /// expect `auth_ok`.
    async fn authenticate(&self, sink: &mut WsSink, source: &mut WsSource) -> Result<()> {
        loop {
            match self.recv_handshake_message(source).await? {
                ServerMessage::AuthRequired { version } => {
                    tracing::debug!(hub_version = version.as_deref(), "hub requested auth");
                    break;
                }
                other => {
                    tracing::debug!(?other, "ignoring pre-auth message");
                }
            }
        }

        send_json(
            sink,
            &ClientMessage::Auth {
                access_token: self.config.access_token.clone(),
            },
        )
        .await?;

        loop {
            match self.recv_handshake_message(source).await? {
                ServerMessage::AuthOk { version } => {
                    tracing::debug!(hub_version = version.as_deref(), "authenticated");
                    return Ok(());
                }
                ServerMessage::AuthInvalid { message } => {
                    return Err(Error::AuthRejected(
                        message.unwrap_or_else(|| "no reason given".to_string()),
                    ));
                }
                other => {
                    tracing::debug!(?other, "ignoring message during auth");
                }
            }
        }
    }

    /// Wait for the `result` ack matching our subscribe request.
    async fn await_subscribe_ack(&self, source: &mut WsSource, sub_id: u64) -> Result<()> {
        loop {
            match self.recv_handshake_message(source).await? {
                ServerMessage::Result { id, success, error } if id == sub_id => {
                    if success {
                        return Ok(());
                    }
                    let reason = error.map(|e| e.describe()).unwrap_or_default();
                    return Err(Error::SubscribeRejected(reason));
                }
                other => {
                    tracing::debug!(?other, "ignoring message while awaiting subscribe ack");
                }
            }
        }
    }

    /// Read one parsed protocol message during the handshake phase, bounded
    /// by the connect timeout.
    async fn recv_handshake_message(&self, source: &mut WsSource) -> Result<ServerMessage> {
        loop {
            let frame = tokio::time::timeout(self.config.connect_timeout, source.next())
                .await
                .map_err(|_| Error::ConnectTimeout {
                    timeout_secs: self.config.connect_timeout.as_secs(),
                })?
                .ok_or(Error::ConnectionClosed)??;

            match frame {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(msg) => return Ok(msg),
                    Err(e) => {
                        self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("hub_frames_malformed_total").increment(1);
                        tracing::warn!(error = %e, "dropping malformed handshake frame");
                    }
                },
                Message::Close(_) => return Err(Error::ConnectionClosed),
                _ => {}
            }
        }
    }

    /// The steady-state loop: deliver events, answer pings, keep the
    /// connection alive, and watch for `stop()`.
    async fn stream_events(
        &self,
        sink: &mut WsSink,
        source: &mut WsSource,
        events: &mpsc::Sender<RawEvent>,
    ) -> Result<SessionEnd> {
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Housekeeping tick: polls the running flag and the pong deadline so
        // neither depends on event traffic.
        let mut housekeeping = tokio::time::interval(Duration::from_millis(500));

        let mut awaiting_pong: Option<(u64, Instant)> = None;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    let id = self.next_id();
                    send_json(sink, &ClientMessage::Ping { id }).await?;
                    if awaiting_pong.is_none() {
                        awaiting_pong = Some((id, Instant::now()));
                    }
                }

                _ = housekeeping.tick() => {
                    if !self.running.load(Ordering::SeqCst) {
                        // Close the subscription cleanly rather than
                        // abandoning the connection.
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Stopped);
                    }
                    if let Some((_, sent_at)) = awaiting_pong
                        && sent_at.elapsed() >= self.config.pong_timeout
                    {
                        metrics::counter!("hub_keepalive_timeouts_total").increment(1);
                        return Err(Error::KeepaliveTimeout {
                            timeout_secs: self.config.pong_timeout.as_secs(),
                        });
                    }
                }

                frame = source.next() => {
                    let frame = match frame {
                        None => return Err(Error::ConnectionClosed),
                        Some(frame) => frame?,
                    };

                    match frame {
                        Message::Text(text) => {
                            match serde_json::from_str::<ServerMessage>(text.as_str()) {
                                Ok(ServerMessage::Event { event, .. }) => {
                                    self.stats.events_received.fetch_add(1, Ordering::Relaxed);
                                    metrics::counter!("hub_events_total").increment(1);
                                    if events.send(event).await.is_err() {
                                        return Ok(SessionEnd::ChannelClosed);
                                    }
                                }
                                Ok(ServerMessage::Pong { id }) => {
                                    if let Some((expected, _)) = awaiting_pong
                                        && expected == id
                                    {
                                        awaiting_pong = None;
                                    }
                                }
                                Ok(ServerMessage::AuthInvalid { message }) => {
                                    // The hub can revoke a session's token mid-stream.
                                    return Err(Error::AuthRejected(
                                        message.unwrap_or_else(|| "token revoked".to_string()),
                                    ));
                                }
                                Ok(_) => {}
                                Err(e) => {
                                    self.stats.frames_malformed.fetch_add(1, Ordering::Relaxed);
                                    metrics::counter!("hub_frames_malformed_total").increment(1);
                                    tracing::warn!(error = %e, "dropping malformed hub frame");
                                }
                            }
                        }
                        Message::Ping(payload) => {
                            sink.send(Message::Pong(payload)).await?;
                        }
                        Message::Close(_) => return Err(Error::ConnectionClosed),
                        _ => {}
                    }
                }
            }
        }
    }
}

async fn send_json(sink: &mut WsSink, msg: &ClientMessage) -> Result<()> {
    let json = msg.to_json()?;
    sink.send(Message::text(json)).await?;
    Ok(())
}
