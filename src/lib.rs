//! # Engine.io-compatible messaging server
//!
//! A server implementation of the engine.io bidirectional messaging
//! protocol: a long-lived logical connection between a browser-class
//! client and this server, whose underlying transport starts as HTTP
//! long-polling and may be upgraded to a WebSocket mid-session without
//! losing message continuity.
//!
//! The crate provides:
//!
//! - the packet and payload wire codecs ([`packet`], [`payload`])
//! - the per-session state machine and upgrade engine ([`session`])
//! - the concurrent session registry with periodic reaping ([`registry`])
//! - an [`axum`] router dispatching polling and WebSocket traffic
//!   ([`server`])
//!
//! Applications receive opened sessions through the [`SessionHandler`]
//! callback. An echo server:
//!
//! ```no_run
//! use std::sync::Arc;
//! use engineio_server::{ServerBuilder, Session};
//!
//! let router = ServerBuilder::new(|session: Arc<Session>| async move {
//!     while let Ok(msg) = session.recv().await {
//!         if session.send(msg).await.is_err() {
//!             break;
//!         }
//!     }
//! })
//! .into_router();
//! # drop(router);
//! ```

use core::time::Duration;

pub mod error;
pub mod handler;
pub mod packet;
pub mod payload;
pub mod registry;
pub mod server;
pub mod session;
pub mod sid;

pub use error::{CodecError, ProtocolError, SessionError};
pub use handler::SessionHandler;
pub use packet::{Packet, PacketType};
pub use payload::Payload;
pub use registry::Registry;
pub use server::{router, ServerBuilder, ServerState};
pub use session::{Session, SessionState, Transport};

/// Default base URL path handled by the server.
pub const DEFAULT_BASE_PATH: &str = "/engine.io/";

/// Default name of the cookie set on a successful polling handshake.
pub const DEFAULT_COOKIE_NAME: &str = "io";

/// Default interval at which the client is expected to ping.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);

/// Default time a long-poll GET may idle before a NOOP flush.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Default time allowed for the probe/UPGRADE handshake to complete
/// after a WebSocket is bound to a polling session.
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Interval at which closed sessions are reaped from the registry.
pub const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Transports a session may upgrade to, as advertised in the handshake.
pub const VALID_UPGRADES: &[&str] = &["websocket"];
