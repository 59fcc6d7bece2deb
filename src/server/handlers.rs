//! Request dispatch: classify incoming traffic by transport and
//! session id, perform handshakes, and route frames into sessions.
//!
//! One route serves the whole protocol:
//!
//! | Request                              | Outcome                         |
//! |--------------------------------------|---------------------------------|
//! | `transport` missing or unknown       | envelope code 0                 |
//! | `transport=polling`, no `sid`, GET   | polling handshake               |
//! | `transport=polling`, no `sid`, other | envelope code 2                 |
//! | `transport=polling`, unknown `sid`   | envelope code 1                 |
//! | `transport=polling`, POST            | payload upload, body `ok`       |
//! | `transport=polling`, GET             | long-poll flush                 |
//! | `transport=websocket`                | WS handshake or upgrade probe   |

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures::{stream::SplitStream, SinkExt, StreamExt};
use serde::Deserialize;

use crate::{
    error::{CodecError, ProtocolError},
    packet::{Packet, PacketType, PROBE},
    session::{Session, Transport, WsSink},
};

use super::state::ServerState;

type WsStream = SplitStream<WebSocket>;

/// Query parameters recognized on the protocol route. The JSONP index
/// parameter `j` is reserved and intentionally unsupported.
#[derive(Debug, Deserialize)]
struct EngineQuery {
    transport: Option<String>,
    sid: Option<String>,
}

/// Build the protocol router around shared server state.
#[must_use]
pub fn router(state: Arc<ServerState>) -> Router {
    let base_path = state.config.base_path.clone();
    Router::new()
        .route(&base_path, any(engine_endpoint))
        .with_state(state)
}

async fn engine_endpoint(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EngineQuery>,
    method: Method,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ws: Option<WebSocketUpgrade>,
    body: Bytes,
) -> Response {
    let remote = ServerState::remote_addr(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    tracing::debug!(
        %method,
        remote = %remote,
        transport = query.transport.as_deref().unwrap_or("-"),
        "incoming request"
    );

    match query.transport.as_deref().and_then(Transport::from_name) {
        None => ProtocolError::TransportUnknown.into_response(),
        Some(Transport::WebSocket) => {
            let Some(ws) = ws else {
                return ProtocolError::BadRequest.into_response();
            };
            let sid = query.sid;
            ws.on_upgrade(move |socket| ws_main(state, socket, sid))
        }
        Some(Transport::Polling) => polling_endpoint(&state, query.sid, &method, &headers, &body).await,
    }
}

// ─── Polling ─────────────────────────────────────────────────────────

async fn polling_endpoint(
    state: &Arc<ServerState>,
    sid: Option<String>,
    method: &Method,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let Some(sid) = sid else {
        if *method != Method::GET {
            return ProtocolError::BadHandshakeMethod.into_response();
        }
        return polling_handshake(state, headers).await;
    };

    let Some(session) = state.registry().get(&sid).await else {
        return ProtocolError::UnknownSid.into_response();
    };

    if *method == Method::POST {
        match session.polling_post(body).await {
            Ok(()) => payload_response(b"ok".to_vec(), headers),
            Err(e) => {
                tracing::debug!(session_id = %sid, "bad polling upload: {e}");
                ProtocolError::BadRequest.into_response()
            }
        }
    } else if *method == Method::GET {
        match session.polling_get().await {
            Ok(payload) => payload_response(payload.encode(), headers),
            Err(e) => {
                tracing::debug!(session_id = %sid, "polling flush failed: {e}");
                ProtocolError::BadRequest.into_response()
            }
        }
    } else {
        (StatusCode::BAD_REQUEST, "bad method").into_response()
    }
}

async fn polling_handshake(state: &Arc<ServerState>, headers: &HeaderMap) -> Response {
    let config = &state.config;
    let session = Arc::new(Session::new(
        Transport::Polling,
        config.ping_interval,
        config.ping_timeout,
    ));
    state.registry().add(session.clone()).await;

    let body = match session.open_on_polling().await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(session_id = %session.id(), "polling open failed: {e}");
            return ProtocolError::BadRequest.into_response();
        }
    };
    state.spawn_handler(session.clone());
    tracing::info!(session_id = %session.id(), transport = %Transport::Polling, "handshake complete");

    let mut response = payload_response(body, headers);
    if let Some(cookie) = config.handshake_cookie(session.id()) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// A polling-transport response body with the protocol's content type,
/// keep-alive, and CORS headers.
fn payload_response(body: Vec<u8>, request_headers: &HeaderMap) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=UTF-8"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    match request_headers.get(header::ORIGIN) {
        Some(origin) => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        None => {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        }
    }
    response
}

// ─── WebSocket ───────────────────────────────────────────────────────

/// One decoded inbound WebSocket frame.
enum Frame {
    Packet(Packet),
    Close,
    Ignore,
}

fn decode_frame(message: Message) -> Result<Frame, CodecError> {
    match message {
        Message::Text(text) => Packet::decode(text.as_bytes()).map(Frame::Packet),
        Message::Binary(bytes) => Packet::decode(&bytes).map(Frame::Packet),
        Message::Close(_) => Ok(Frame::Close),
        Message::Ping(_) | Message::Pong(_) => Ok(Frame::Ignore),
    }
}

/// Per-connection WebSocket entry: resolve the session (direct
/// handshake or upgrade probe), then pump frames into it until the
/// stream ends.
async fn ws_main(state: Arc<ServerState>, socket: WebSocket, sid: Option<String>) {
    let (sink, mut stream) = socket.split();

    let session = match sid {
        None => match ws_handshake(&state, sink).await {
            Some(session) => session,
            None => return,
        },
        Some(sid) => match ws_attach(&state, sink, &mut stream, &sid).await {
            Some(session) => session,
            None => return,
        },
    };

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %session.id(), "websocket read error: {e}");
                break;
            }
        };
        match decode_frame(message) {
            Ok(Frame::Packet(packet)) => session.on_packet(packet).await,
            Ok(Frame::Close) => break,
            Ok(Frame::Ignore) => {}
            Err(e) => {
                tracing::warn!(session_id = %session.id(), "undecodable websocket frame: {e}");
                break;
            }
        }
    }

    if let Err(e) = session.close().await {
        tracing::debug!(session_id = %session.id(), "close after websocket loop: {e}");
    }
}

/// Direct WebSocket handshake: fresh session, OPEN frame, writer task,
/// application handler.
async fn ws_handshake(state: &Arc<ServerState>, mut sink: WsSink) -> Option<Arc<Session>> {
    let config = &state.config;
    let session = Arc::new(Session::new(
        Transport::WebSocket,
        config.ping_interval,
        config.ping_timeout,
    ));
    state.registry().add(session.clone()).await;

    if let Err(e) = session.open_on_websocket(&mut sink).await {
        tracing::warn!(session_id = %session.id(), "websocket open failed: {e}");
        if session.close().await.is_err() {
            tracing::debug!(session_id = %session.id(), "session already closed");
        }
        return None;
    }
    session.spawn_writer(sink);
    state.spawn_handler(session.clone());
    tracing::info!(session_id = %session.id(), transport = %Transport::WebSocket, "handshake complete");
    Some(session)
}

/// Attach a candidate WebSocket to an existing polling session and run
/// the probe protocol until the client commits the upgrade.
///
/// The probe must finish within the configured upgrade timeout, or the
/// candidate stream is dropped and the polling session left untouched.
async fn ws_attach(
    state: &Arc<ServerState>,
    sink: WsSink,
    stream: &mut WsStream,
    sid: &str,
) -> Option<Arc<Session>> {
    let mut sink = sink;

    let Some(session) = state.registry().get(sid).await else {
        tracing::debug!(session_id = %sid, "websocket for unknown session");
        let _ = sink
            .send(Message::Text(ProtocolError::UnknownSid.envelope()))
            .await;
        let _ = sink.close().await;
        return None;
    };

    if !session.bind_ws().await {
        tracing::warn!(session_id = %sid, "websocket already bound, dropping newer stream");
        let _ = sink.close().await;
        return None;
    }

    let deadline = tokio::time::Instant::now() + state.config.upgrade_timeout;
    loop {
        let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                tracing::warn!(session_id = %sid, "upgrade timed out, keeping polling transport");
                session.release_ws().await;
                let _ = sink.close().await;
                return None;
            }
            Ok(None) => {
                session.release_ws().await;
                return None;
            }
            Ok(Some(Err(e))) => {
                tracing::debug!(session_id = %sid, "websocket read error during probe: {e}");
                session.release_ws().await;
                return None;
            }
            Ok(Some(Ok(message))) => message,
        };

        let packet = match decode_frame(frame) {
            Ok(Frame::Packet(packet)) => packet,
            Ok(Frame::Close) => {
                session.release_ws().await;
                let _ = sink.close().await;
                return None;
            }
            Ok(Frame::Ignore) => continue,
            Err(e) => {
                tracing::warn!(session_id = %sid, "undecodable probe frame: {e}");
                session.release_ws().await;
                let _ = sink.close().await;
                return None;
            }
        };

        match packet.packet_type() {
            PacketType::Ping => {
                let pong = Packet::pong(packet.data().to_vec());
                let text = match pong.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(session_id = %sid, "probe data a text frame cannot carry: {e}");
                        session.release_ws().await;
                        let _ = sink.close().await;
                        return None;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    session.release_ws().await;
                    return None;
                }
                if packet.data() == PROBE {
                    // Complete the outstanding long-poll cycle so the
                    // client stops using polling.
                    session.send_packet(Packet::noop()).await;
                }
            }
            PacketType::Upgrade => {
                if let Err(e) = session.complete_upgrade().await {
                    tracing::warn!(session_id = %sid, "upgrade failed: {e}");
                    session.release_ws().await;
                    let _ = sink.close().await;
                    return None;
                }
                session.spawn_writer(sink);
                tracing::info!(session_id = %sid, "transport upgraded to websocket");
                return Some(session);
            }
            other => {
                tracing::debug!(session_id = %sid, packet_type = %other, "ignoring packet before upgrade");
            }
        }
    }
}
