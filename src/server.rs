//! Server construction.
//!
//! Provides the builder that assembles an [`axum::Router`] serving the
//! protocol at a configurable base path.

mod handlers;
mod state;

pub use handlers::router;
pub use state::ServerState;

use std::sync::Arc;

use core::time::Duration;

use crate::{
    handler::SessionHandler,
    DEFAULT_BASE_PATH, DEFAULT_COOKIE_NAME, DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT,
    DEFAULT_UPGRADE_TIMEOUT,
};

use state::Config;

/// Builder for the server.
pub struct ServerBuilder {
    handler: Arc<dyn SessionHandler>,
    config: Config,
}

impl ServerBuilder {
    /// Create a builder around the application handler, with protocol
    /// defaults for every tunable.
    pub fn new<H: SessionHandler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            config: Config {
                base_path: DEFAULT_BASE_PATH.to_owned(),
                cookie_name: DEFAULT_COOKIE_NAME.to_owned(),
                disable_cookie: false,
                ping_interval: DEFAULT_PING_INTERVAL,
                ping_timeout: DEFAULT_PING_TIMEOUT,
                upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            },
        }
    }

    /// Set the base URL path the server handles requests for.
    #[must_use]
    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.config.base_path = path.into();
        self
    }

    /// Set the name of the cookie set on a successful handshake.
    #[must_use]
    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.cookie_name = name.into();
        self
    }

    /// Disable the handshake cookie entirely.
    #[must_use]
    pub const fn disable_cookie(mut self) -> Self {
        self.config.disable_cookie = true;
        self
    }

    /// Set the interval at which clients are told to ping.
    #[must_use]
    pub const fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the idle time after which a long-poll GET is flushed.
    #[must_use]
    pub const fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    /// Set the maximum time a transport upgrade may take.
    #[must_use]
    pub const fn upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.config.upgrade_timeout = timeout;
        self
    }

    /// Build the shared server state and start the reaper task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn build(self) -> Arc<ServerState> {
        ServerState::start(self.config, self.handler)
    }

    /// Build the state and wrap it in the protocol router.
    #[must_use]
    pub fn into_router(self) -> axum::Router {
        router(self.build())
    }
}
