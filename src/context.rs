//! Explicitly passed application context.
//!
//! Components receive an [`AppContext`] at construction instead of reaching
//! for process-wide singletons. It bundles the transport, the event bus and
//! the current-session accessor.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::events::{AppEvent, EventBus};
use crate::http::Transport;
use crate::models::Record;

/// The authenticated session, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSession {
    pub token: Option<String>,
    pub user: Option<Record>,
}

/// Shared accessor for the current session.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<UserSession>>,
}

impl SessionHandle {
    pub fn with_token(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(UserSession { token, user: None })),
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    pub async fn current(&self) -> UserSession {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, session: UserSession) {
        *self.inner.write().await = session;
    }

    pub async fn clear(&self) {
        *self.inner.write().await = UserSession::default();
    }
}

/// Everything a collection or uploader needs from its surroundings.
#[derive(Clone)]
pub struct AppContext {
    transport: Arc<dyn Transport>,
    events: EventBus,
    session: SessionHandle,
}

impl AppContext {
    pub fn new(transport: Arc<dyn Transport>, events: EventBus, session: SessionHandle) -> Self {
        Self {
            transport,
            events,
            session,
        }
    }

    /// Context with a fresh event bus and an anonymous session.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, EventBus::new(), SessionHandle::default())
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Stream of everything emitted on this context's bus.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }
}
