use crate::{
    timeline::{TimelineReconciler, now_millis},
    types::{ConversationId, InboundEvent, SessionEvent, TimelineEntry},
    typing::TypingTracker,
};

/// Timeline plus typing state for one mounted conversation.
///
/// Routes inbound events to the reconciler and the typing tracker and turns
/// every visible change into [`SessionEvent`]s for the UI.
#[derive(Debug, Clone)]
pub struct ConversationState {
    id: ConversationId,
    timeline: TimelineReconciler,
    typing: TypingTracker,
}

impl ConversationState {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            timeline: TimelineReconciler::new(),
            typing: TypingTracker::default(),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn timeline(&self) -> &TimelineReconciler {
        &self.timeline
    }

    pub fn typing(&self) -> &TypingTracker {
        &self.typing
    }

    pub fn seed(&mut self, entries: Vec<TimelineEntry>) -> Vec<SessionEvent> {
        self.timeline.seed(entries);
        vec![self.timeline_event()]
    }

    /// Optimistically show a user message. Returns its temporary ID.
    pub fn append_optimistic(&mut self, text: impl Into<String>) -> (String, Vec<SessionEvent>) {
        let id = self.timeline.append_optimistic(text);
        (id, vec![self.timeline_event()])
    }

    pub fn apply_inbound(&mut self, event: &InboundEvent) -> Vec<SessionEvent> {
        self.apply_inbound_at(event, now_millis())
    }

    pub fn apply_inbound_at(&mut self, event: &InboundEvent, now_ms: u64) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.timeline.apply_inbound_at(event, now_ms).is_visible() {
            events.push(self.timeline_event());
        }
        if let Some(is_peer_typing) = self.typing.observe(event) {
            events.push(SessionEvent::TypingChanged { is_peer_typing });
        }
        events
    }

    pub fn clear(&mut self) -> Vec<SessionEvent> {
        self.apply_inbound(&InboundEvent::Clear)
    }

    /// Reset transient state when the conversation is torn down.
    pub fn teardown(&mut self) -> Vec<SessionEvent> {
        self.typing
            .reset()
            .map(|is_peer_typing| SessionEvent::TypingChanged { is_peer_typing })
            .into_iter()
            .collect()
    }

    fn timeline_event(&self) -> SessionEvent {
        SessionEvent::TimelineChanged {
            conversation_id: self.id.clone(),
            entries: self.timeline.snapshot(),
        }
    }
}
