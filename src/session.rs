//! Per-session state machine and transport-upgrade engine.
//!
//! A [`Session`] is the long-lived logical connection identified by its
//! `sid`. It owns the outbound and inbound packet queues and, after an
//! upgrade, the WebSocket writer task; the dispatcher owns the inbound
//! read loops and reaches the session through the registry. The queues
//! are the only channel between the two sides:
//!
//! ```text
//! polling POST / WS reader ──► on_packet ──► in  ──► recv()
//! send() ──► out ──► polling GET  (before upgrade)
//!                └─► writer task  (after upgrade)
//! ```
//!
//! Because both the outstanding long-poll GET and the writer task drain
//! the same `out` queue, no message can be lost across the transport
//! switch: whatever the final GET does not flush, the writer delivers.

use core::{fmt, time::Duration};

use async_lock::RwLock;
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{CodecError, SessionError},
    packet::{Packet, PacketType},
    payload::Payload,
    sid,
};

/// Write half of a WebSocket bound to a session.
pub(crate) type WsSink = SplitSink<WebSocket, Message>;

/// Outbound payloads buffered between `send` and the active transport.
const OUTBOUND_QUEUE_CAPACITY: usize = 32;

/// Inbound messages buffered between the transport and the application
/// handler. A full queue blocks the reader, which is the backpressure
/// policy: slow handlers slow the client down instead of growing memory.
const INBOUND_QUEUE_CAPACITY: usize = 256;

/// The concrete transport currently carrying a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// HTTP long-polling.
    Polling,
    /// WebSocket.
    WebSocket,
}

impl Transport {
    /// The query-parameter name of this transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
        }
    }

    /// Parse a `transport` query-parameter value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(Self::Polling),
            "websocket" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a session. Transitions are strictly forward:
/// Opening → Open → Closing → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but the OPEN packet has not been emitted yet.
    Opening,
    /// Handshake complete; sends and receives are live.
    Open,
    /// Teardown in progress.
    Closing,
    /// Fully terminated; queues are closed and the reaper may collect.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

#[derive(Debug)]
struct Shared {
    state: SessionState,
    transport: Transport,
    upgraded: bool,
    /// A WebSocket stream has been handed to this session (probe phase
    /// or beyond). Later streams presenting the same sid are rejected.
    ws_bound: bool,
}

/// Handshake JSON returned to the client inside the OPEN packet.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Handshake<'a> {
    sid: &'a str,
    upgrades: &'static [&'static str],
    ping_interval: u64,
    ping_timeout: u64,
}

/// A fault-tolerant logical connection surviving transport changes.
#[derive(Debug)]
pub struct Session {
    id: String,
    ping_interval: Duration,
    ping_timeout: Duration,
    shared: RwLock<Shared>,
    out_tx: async_channel::Sender<Payload>,
    out_rx: async_channel::Receiver<Payload>,
    in_tx: async_channel::Sender<Vec<u8>>,
    in_rx: async_channel::Receiver<Vec<u8>>,
    closer: CancellationToken,
}

impl Session {
    /// Create a session in the Opening state on the given transport.
    #[must_use]
    pub fn new(transport: Transport, ping_interval: Duration, ping_timeout: Duration) -> Self {
        let (out_tx, out_rx) = async_channel::bounded(OUTBOUND_QUEUE_CAPACITY);
        let (in_tx, in_rx) = async_channel::bounded(INBOUND_QUEUE_CAPACITY);
        Self {
            id: sid::generate(),
            ping_interval,
            ping_timeout,
            shared: RwLock::new(Shared {
                state: SessionState::Opening,
                transport,
                upgraded: false,
                ws_bound: false,
            }),
            out_tx,
            out_rx,
            in_tx,
            in_rx,
            closer: CancellationToken::new(),
        }
    }

    /// The session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Interval at which the client is told to ping.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Idle time after which a long-poll GET is flushed with a NOOP.
    #[must_use]
    pub const fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// The current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.shared.read().await.state
    }

    /// The transport currently carrying the session.
    pub async fn transport(&self) -> Transport {
        self.shared.read().await.transport
    }

    /// Whether the session has completed a transport upgrade.
    pub async fn is_upgraded(&self) -> bool {
        self.shared.read().await.upgraded
    }

    // ─── Application side ────────────────────────────────────────────

    /// Enqueue one MESSAGE for the client.
    ///
    /// The data must be valid UTF-8: polling payload bodies are served
    /// as UTF-8 text and WebSocket frames are text frames, and the
    /// session may upgrade between enqueue and delivery, so only data
    /// both transports can carry losslessly is accepted.
    ///
    /// Suspends while the outbound queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotText`] for non-UTF-8 data and
    /// [`SessionError::Closed`] unless the session is open.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        let data = data.into();
        if core::str::from_utf8(&data).is_err() {
            return Err(SessionError::NotText);
        }
        if self.state().await != SessionState::Open {
            return Err(SessionError::Closed);
        }
        self.out_tx
            .send(Payload::from(Packet::message(data)))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Receive the next MESSAGE from the client, in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the session is not open, or
    /// closes while this call is blocked.
    pub async fn recv(&self) -> Result<Vec<u8>, SessionError> {
        if self.state().await != SessionState::Open {
            return Err(SessionError::Closed);
        }
        self.in_rx.recv().await.map_err(|_| SessionError::Closed)
    }

    /// Close the session: Closing, terminate both queues, signal the
    /// writer task, Closed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyClosed`] on a second close.
    pub async fn close(&self) -> Result<(), SessionError> {
        {
            let mut shared = self.shared.write().await;
            if matches!(shared.state, SessionState::Closing | SessionState::Closed) {
                return Err(SessionError::AlreadyClosed);
            }
            shared.state = SessionState::Closing;
        }
        tracing::info!(session_id = %self.id, "closing session");

        self.out_tx.close();
        self.in_tx.close();
        self.closer.cancel();

        self.shared.write().await.state = SessionState::Closed;
        Ok(())
    }

    // ─── Dispatcher side ─────────────────────────────────────────────

    /// First response of a polling handshake: the encoded one-packet
    /// payload whose OPEN data is the handshake JSON. Opening → Open.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyOpen`] if the session already
    /// emitted its OPEN packet.
    pub async fn open_on_polling(&self) -> Result<Vec<u8>, SessionError> {
        if self.state().await != SessionState::Opening {
            return Err(SessionError::AlreadyOpen);
        }
        let body = Payload::from(Packet::open(self.handshake_json())).encode();
        self.shared.write().await.state = SessionState::Open;
        Ok(body)
    }

    /// First response of a direct WebSocket handshake: one bare OPEN
    /// frame. Opening → Open, transport = WebSocket, upgraded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyOpen`] if the session already
    /// emitted its OPEN packet, or [`SessionError::Io`] if the frame
    /// cannot be written.
    pub async fn open_on_websocket(&self, ws: &mut WsSink) -> Result<(), SessionError> {
        if self.state().await != SessionState::Opening {
            return Err(SessionError::AlreadyOpen);
        }
        let open = Packet::open(self.handshake_json());
        let text = open.to_text().map_err(|_| SessionError::NotText)?;
        ws.send(Message::Text(text)).await?;

        let mut shared = self.shared.write().await;
        shared.state = SessionState::Open;
        shared.transport = Transport::WebSocket;
        shared.upgraded = true;
        shared.ws_bound = true;
        Ok(())
    }

    /// Decode an uploaded polling payload and route each packet.
    ///
    /// # Errors
    ///
    /// Propagates codec errors, which the dispatcher answers with
    /// HTTP 400.
    pub async fn polling_post(&self, body: &[u8]) -> Result<(), CodecError> {
        for packet in Payload::decode(body)? {
            self.on_packet(packet).await;
        }
        Ok(())
    }

    /// Await the next outbound payload for a long-poll GET, or
    /// synthesize a one-NOOP payload after `ping_timeout` of idleness.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportMismatch`] unless the session
    /// transport is polling, and [`SessionError::Closed`] if the
    /// session is not open or closes while the GET is parked.
    pub async fn polling_get(&self) -> Result<Payload, SessionError> {
        {
            let shared = self.shared.read().await;
            if shared.state != SessionState::Open {
                return Err(SessionError::Closed);
            }
            if shared.transport != Transport::Polling {
                return Err(SessionError::TransportMismatch);
            }
        }
        match tokio::time::timeout(self.ping_timeout, self.out_rx.recv()).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => Ok(Payload::from(Packet::noop())),
        }
    }

    /// Route one inbound packet. On non-open sessions this is a
    /// diagnostic no-op.
    pub async fn on_packet(&self, packet: Packet) {
        if self.state().await != SessionState::Open {
            tracing::debug!(
                session_id = %self.id,
                packet_type = %packet.packet_type(),
                "dropping packet on non-open session"
            );
            return;
        }
        match packet.packet_type() {
            PacketType::Ping => {
                tracing::debug!(session_id = %self.id, "ping");
                self.send_packet(Packet::pong(packet.into_data())).await;
            }
            PacketType::Message => {
                if self.in_tx.send(packet.into_data()).await.is_err() {
                    tracing::debug!(session_id = %self.id, "inbound queue closed, message dropped");
                }
            }
            PacketType::Upgrade => {
                // Live upgrades are completed by the dispatcher's probe
                // loop, which owns the stream.
                tracing::warn!(
                    session_id = %self.id,
                    "upgrade packet on an established transport"
                );
            }
            PacketType::Close => {
                if let Err(e) = self.close().await {
                    tracing::debug!(session_id = %self.id, "close packet raced teardown: {e}");
                }
            }
            other => {
                tracing::debug!(session_id = %self.id, packet_type = %other, "ignoring packet");
            }
        }
    }

    /// Enqueue a single control packet on the outbound queue.
    pub(crate) async fn send_packet(&self, packet: Packet) {
        if self.state().await != SessionState::Open {
            tracing::warn!(
                session_id = %self.id,
                packet_type = %packet.packet_type(),
                "send_packet on non-open session"
            );
            return;
        }
        if self.out_tx.send(Payload::from(packet)).await.is_err() {
            tracing::debug!(session_id = %self.id, "outbound queue closed, packet dropped");
        }
    }

    /// Claim the session for a candidate WebSocket stream.
    ///
    /// Returns `false` if the session is not open, is already upgraded,
    /// or already has a stream bound; the caller must then close the
    /// newer stream and keep the original binding.
    pub(crate) async fn bind_ws(&self) -> bool {
        let mut shared = self.shared.write().await;
        if shared.state != SessionState::Open || shared.upgraded || shared.ws_bound {
            return false;
        }
        shared.ws_bound = true;
        true
    }

    /// Release a binding whose probe never completed, leaving the
    /// polling session untouched.
    pub(crate) async fn release_ws(&self) {
        self.shared.write().await.ws_bound = false;
    }

    /// Commit the upgrade: transport = WebSocket, `upgraded` set.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotUpgraded`] if no stream is bound.
    pub(crate) async fn complete_upgrade(&self) -> Result<(), SessionError> {
        let mut shared = self.shared.write().await;
        if !shared.ws_bound {
            return Err(SessionError::NotUpgraded);
        }
        shared.upgraded = true;
        shared.transport = Transport::WebSocket;
        Ok(())
    }

    /// Start the writer task, the sole writer of the WebSocket sink.
    ///
    /// The task drains `out`, starting with anything the final polling
    /// GET left behind, frames each packet as one text frame, and
    /// closes the sink when the queue terminates, the close signal
    /// fires, or a write fails.
    pub(crate) fn spawn_writer(&self, sink: WsSink) {
        let out_rx = self.out_rx.clone();
        let closer = self.closer.clone();
        let session_id = self.id.clone();
        tokio::spawn(async move {
            let mut sink = sink;
            loop {
                let payload = tokio::select! {
                    () = closer.cancelled() => break,
                    recv = out_rx.recv() => match recv {
                        Ok(payload) => payload,
                        Err(_) => break,
                    },
                };
                for packet in payload.packets() {
                    // `send` guards MESSAGE data, but a PONG can echo
                    // raw bytes a polling POST carried in a PING.
                    let text = match packet.to_text() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(
                                session_id = %session_id,
                                packet_type = %packet.packet_type(),
                                "dropping packet a text frame cannot carry: {e}"
                            );
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::warn!(session_id = %session_id, "websocket write failed: {e}");
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            tracing::debug!(session_id = %session_id, "websocket writer exiting");
            let _ = sink.close().await;
        });
    }

    #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
    fn handshake_json(&self) -> Vec<u8> {
        serde_json::to_vec(&Handshake {
            sid: &self.id,
            upgrades: crate::VALID_UPGRADES,
            ping_interval: self.ping_interval.as_millis() as u64,
            ping_timeout: self.ping_timeout.as_millis() as u64,
        })
        .expect("handshake encoding should not fail")
    }
}
