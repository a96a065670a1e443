//! Notifications emitted by collections and uploads.

use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::models::Record;

const DEFAULT_CAPACITY: usize = 256;

/// Events emitted by a [`Collection`](crate::collection::Collection).
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent {
    /// The visible window changed.
    Changed {
        resource: String,
        count: usize,
        offset: usize,
        reset: bool,
    },
}

/// Events emitted by an [`Uploader`](crate::upload::Uploader).
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// A chunk or part was acknowledged.
    ChunkSent {
        session: Uuid,
        /// Payload bytes in the acknowledged chunk.
        bytes: u64,
        /// File offset acknowledged so far.
        acknowledged: u64,
    },
    /// Payload bytes of the in-flight chunk handed to the connection.
    Progress {
        session: Uuid,
        start_byte: u64,
        loaded: u64,
        total: u64,
    },
    /// The upload finished; carries the created file record.
    Complete { session: Uuid, file: Record },
    /// A transfer failed; `resume()` may continue it.
    Error {
        session: Uuid,
        message: String,
        status: Option<u16>,
    },
    /// The upload could not be started; it must be restarted from scratch.
    ErrorStarting {
        session: Uuid,
        message: String,
        identifier: Option<String>,
        status: Option<u16>,
    },
}

impl UploadEvent {
    pub fn session(&self) -> Uuid {
        match self {
            UploadEvent::ChunkSent { session, .. }
            | UploadEvent::Progress { session, .. }
            | UploadEvent::Complete { session, .. }
            | UploadEvent::Error { session, .. }
            | UploadEvent::ErrorStarting { session, .. } => *session,
        }
    }
}

/// Any event on the application bus.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Collection(CollectionEvent),
    Upload(UploadEvent),
}

impl From<CollectionEvent> for AppEvent {
    fn from(event: CollectionEvent) -> Self {
        AppEvent::Collection(event)
    }
}

impl From<UploadEvent> for AppEvent {
    fn from(event: UploadEvent) -> Self {
        AppEvent::Upload(event)
    }
}

/// Broadcast bus shared through the [`AppContext`](crate::context::AppContext).
///
/// Emitting never blocks; events are dropped when nobody subscribes and a
/// lagging subscriber loses the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: impl Into<AppEvent>) {
        let event = event.into();
        trace!("event: {:?}", event);
        // An error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
