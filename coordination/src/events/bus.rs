//! Event bus for document change notifications
//!
//! Pub/sub over a Tokio broadcast channel. The document store publishes
//! after every commit; reactors and tests subscribe.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{ChangeKind, DocumentEvent};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 1024;

/// Error type for event bus operations
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Subscriber lagged, {0} events dropped")]
    Lagged(u64),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<broadcast::error::RecvError> for EventBusError {
    fn from(err: broadcast::error::RecvError) -> Self {
        match err {
            broadcast::error::RecvError::Lagged(n) => EventBusError::Lagged(n),
            broadcast::error::RecvError::Closed => EventBusError::ChannelClosed,
        }
    }
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for document events
pub struct EventBus {
    sender: broadcast::Sender<DocumentEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    /// Create a bus with a custom channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    ///
    /// Having no subscribers is not an error: writes happen whether or not
    /// any reactor is running.
    pub fn publish(&self, event: DocumentEvent) {
        let path = event.path.clone();
        let change = event.change;
        match self.sender.send(event) {
            Ok(count) => debug!(%path, %change, receivers = count, "Event published"),
            Err(_) => debug!(%path, %change, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events under this path prefix
    pub prefix: Option<String>,
    /// Only these kinds of change
    pub changes: Option<Vec<ChangeKind>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by path prefix
    pub fn under(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Filter by change kinds
    pub fn changes(mut self, changes: Vec<ChangeKind>) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &DocumentEvent) -> bool {
        if let Some(ref prefix) = self.prefix {
            if !event.is_under(prefix) {
                return false;
            }
        }

        if let Some(ref changes) = self.changes {
            if !changes.contains(&event.change) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<DocumentEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<DocumentEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> EventBusResult<DocumentEvent> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}
