//! Shared server state: configuration, registry, and the reaper task.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Weak,
};

use core::time::Duration;

use axum::http::{header::HeaderValue, HeaderMap};

use crate::{handler::SessionHandler, registry::Registry, session::Session, REAP_INTERVAL};

/// Resolved server tunables.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) base_path: String,
    pub(crate) cookie_name: String,
    pub(crate) disable_cookie: bool,
    pub(crate) ping_interval: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) upgrade_timeout: Duration,
}

impl Config {
    /// The `Set-Cookie` value for a fresh session, unless disabled.
    pub(crate) fn handshake_cookie(&self, sid: &str) -> Option<HeaderValue> {
        if self.disable_cookie || self.cookie_name.is_empty() {
            return None;
        }
        HeaderValue::from_str(&format!("{}={sid}", self.cookie_name)).ok()
    }
}

/// State shared by every request handler of one server instance.
pub struct ServerState {
    pub(crate) config: Config,
    registry: Registry,
    handler: Arc<dyn SessionHandler>,
    client_gauge: AtomicUsize,
}

impl ServerState {
    /// Assemble the state and spawn the reaper task.
    pub(crate) fn start(config: Config, handler: Arc<dyn SessionHandler>) -> Arc<Self> {
        let state = Arc::new(Self {
            config,
            registry: Registry::new(),
            handler,
            client_gauge: AtomicUsize::new(0),
        });
        spawn_reaper(Arc::downgrade(&state));
        state
    }

    /// The session registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of registered sessions as of the last reap cycle.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.client_gauge.load(Ordering::Relaxed)
    }

    /// Create a fresh session and hand it to the application handler
    /// on its own task.
    pub(crate) fn spawn_handler(&self, session: Arc<Session>) {
        tokio::spawn(self.handler.handle(session));
    }

    /// Remote address for logging: `X-Forwarded-For` takes precedence
    /// over the socket peer.
    pub(crate) fn remote_addr(headers: &HeaderMap, peer: Option<std::net::SocketAddr>) -> String {
        headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .or_else(|| peer.map(|addr| addr.to_string()))
            .unwrap_or_else(|| "-".to_owned())
    }
}

/// Periodically remove closed sessions and refresh the client gauge.
///
/// The task holds only a weak reference, so it winds down with the
/// server it serves.
fn spawn_reaper(state: Weak<ServerState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            let Some(state) = state.upgrade() else {
                break;
            };
            let reaped = state.registry.reap().await;
            let remaining = state.registry.len().await;
            state.client_gauge.store(remaining, Ordering::Relaxed);
            if reaped > 0 {
                tracing::debug!(reaped, clients = remaining, "reaped closed sessions");
            }
        }
    });
}
