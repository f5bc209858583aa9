use tokio::sync::broadcast;

use crate::types::SessionEvent;

/// Broadcast event stream type used by UI subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Observable output channel shared by a session and its follow poller.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Create a new channel with room for `event_buffer` undelivered events.
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Clone the event sender.
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.event_tx.clone()
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Emit several events in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = SessionEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new(256)
    }
}
