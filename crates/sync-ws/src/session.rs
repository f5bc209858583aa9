use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sync_core::{
    ChannelState, ConversationApi, ConversationId, ConversationState, ConversationSummary,
    EventStream, OutboundEvent, SessionChannels, SessionEvent, Subscription, SyncError,
    SyncErrorCategory, TimelineEntry,
};
use tracing::{debug, info, warn};

use crate::transport::{TransportEvent, WsTransport};

type ConversationSlot = Arc<Mutex<Option<ConversationState>>>;

/// Owned sync service for the conversation currently on screen.
///
/// Mounting a conversation seeds its timeline from history, then opens the
/// push channel. Every change is published as a [`SessionEvent`] on the
/// session's [`SessionChannels`].
pub struct ConversationSession<A: ConversationApi> {
    api: Arc<A>,
    transport: WsTransport,
    channels: SessionChannels,
    conversation: ConversationSlot,
    _transport_events: Subscription<TransportEvent>,
}

impl<A: ConversationApi> ConversationSession<A> {
    pub fn new(api: Arc<A>, transport: WsTransport, channels: SessionChannels) -> Self {
        let conversation: ConversationSlot = Arc::new(Mutex::new(None));
        let transport_events = transport.subscribe({
            let conversation = Arc::clone(&conversation);
            let channels = channels.clone();
            move |event| route_transport_event(&conversation, &channels, event)
        });

        Self {
            api,
            transport,
            channels,
            conversation,
            _transport_events: transport_events,
        }
    }

    pub fn channels(&self) -> &SessionChannels {
        &self.channels
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    pub fn current_conversation(&self) -> Option<ConversationId> {
        self.slot().as_ref().map(|state| state.id().clone())
    }

    /// Ordered snapshot of the mounted timeline; empty when nothing is mounted.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.slot()
            .as_ref()
            .map(|state| state.timeline().snapshot())
            .unwrap_or_default()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.transport.state()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|state| state.typing().is_peer_typing())
    }

    /// Mount `conversation_id`, replacing whatever was mounted before.
    ///
    /// A history failure leaves nothing mounted. A channel failure leaves the
    /// seeded timeline in place with the channel `Failed`; call
    /// [`Self::reconnect`] to retry.
    pub async fn open(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<ConversationSummary>, SyncError> {
        self.close().await;
        info!(conversation_id = %conversation_id, "mounting conversation");

        let history = self
            .api
            .fetch_history(&conversation_id)
            .await
            .map_err(|err| self.surface(err))?;

        {
            let mut slot = self.slot();
            let mut state = ConversationState::new(conversation_id.clone());
            self.channels.emit_all(state.seed(history.entries));
            *slot = Some(state);
        }

        self.transport
            .open(&conversation_id)
            .await
            .map_err(|err| self.surface(err))?;
        Ok(history.conversation)
    }

    /// Reopen the push channel for the mounted conversation without reseeding.
    pub async fn reconnect(&self) -> Result<(), SyncError> {
        let conversation_id = self.require_open("reconnect")?;
        self.transport
            .open(&conversation_id)
            .await
            .map_err(|err| self.surface(err))
    }

    /// Show `text` immediately as a provisional user entry and push it.
    ///
    /// Returns the provisional entry id. The send is dropped silently when
    /// the channel is not connected; the entry stays provisional.
    pub fn send_user_message(&self, text: &str) -> Result<String, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::new(
                SyncErrorCategory::Config,
                "empty_message",
                "message text is empty",
            ));
        }

        let entry_id = {
            let mut slot = self.slot();
            let Some(state) = slot.as_mut() else {
                return Err(not_open("send_user_message"));
            };
            let (entry_id, events) = state.append_optimistic(text);
            self.channels.emit_all(events);
            entry_id
        };

        self.transport.send(&OutboundEvent::UserMessage {
            content: text.to_owned(),
        });
        Ok(entry_id)
    }

    /// Delete every message server-side, then empty the local timeline.
    pub async fn clear_all(&self) -> Result<(), SyncError> {
        let conversation_id = self.require_open("clear_all")?;
        self.api
            .clear_messages(&conversation_id)
            .await
            .map_err(|err| self.surface(err))?;

        let mut slot = self.slot();
        match slot.as_mut() {
            Some(state) if state.id() == &conversation_id => {
                self.channels.emit_all(state.clear());
            }
            _ => debug!(conversation_id = %conversation_id, "conversation switched during clear"),
        }
        Ok(())
    }

    /// Unmount the current conversation. A no-op when nothing is mounted.
    pub async fn close(&self) {
        self.transport.close().await;
        let previous = self.slot().take();
        if let Some(mut state) = previous {
            info!(conversation_id = %state.id(), "unmounted conversation");
            self.channels.emit_all(state.teardown());
        }
    }

    fn require_open(&self, action: &str) -> Result<ConversationId, SyncError> {
        self.current_conversation().ok_or_else(|| not_open(action))
    }

    fn surface(&self, err: SyncError) -> SyncError {
        warn!(code = %err.code, message = %err.message, "conversation session error");
        self.channels.emit(err.to_event());
        err
    }

    fn slot(&self) -> MutexGuard<'_, Option<ConversationState>> {
        lock_slot(&self.conversation)
    }
}

fn lock_slot(slot: &Mutex<Option<ConversationState>>) -> MutexGuard<'_, Option<ConversationState>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_open(action: &str) -> SyncError {
    SyncError::new(
        SyncErrorCategory::Config,
        "conversation_not_open",
        format!("cannot {action} without a mounted conversation"),
    )
}

/// Events are emitted under the slot lock so snapshots leave in order.
fn route_transport_event(
    conversation: &Mutex<Option<ConversationState>>,
    channels: &SessionChannels,
    event: &TransportEvent,
) {
    match event {
        TransportEvent::StateChanged(state) => {
            channels.emit(SessionEvent::ChannelStateChanged { state: *state });
        }
        TransportEvent::Inbound(inbound) => {
            let mut slot = lock_slot(conversation);
            match slot.as_mut() {
                Some(state) => channels.emit_all(state.apply_inbound(inbound)),
                None => debug!(?inbound, "inbound event with nothing mounted; ignoring"),
            }
        }
    }
}
