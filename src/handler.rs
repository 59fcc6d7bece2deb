//! Application-level session callback.

use std::{future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};

use crate::session::Session;

/// Callback invoked once per established session, on its own task.
///
/// The handler owns the application side of the connection: it talks to
/// the client exclusively through [`Session::send`] and
/// [`Session::recv`], and terminates by returning or when either call
/// starts failing with [`SessionError::Closed`](crate::SessionError::Closed).
///
/// Any `Fn(Arc<Session>) -> impl Future` closure implements the trait,
/// so an echo server is just:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use engineio_server::{ServerBuilder, Session};
/// let router = ServerBuilder::new(|session: Arc<Session>| async move {
///     while let Ok(msg) = session.recv().await {
///         if session.send(msg).await.is_err() {
///             break;
///         }
///     }
/// })
/// .into_router();
/// # drop(router);
/// ```
pub trait SessionHandler: Send + Sync + 'static {
    /// Handle one opened session.
    fn handle(&self, session: Arc<Session>) -> BoxFuture<'static, ()>;
}

impl<F, Fut> SessionHandler for F
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, session: Arc<Session>) -> BoxFuture<'static, ()> {
        self(session).boxed()
    }
}
