use tracing::trace;

use crate::types::{InboundEvent, TypingState};

/// Derives the "peer is composing" flag from inbound events.
///
/// There is no timer: a missing stop event leaves the state at `PeerTyping`
/// until the next peer message or a reset on teardown.
#[derive(Debug, Clone, Default)]
pub struct TypingTracker {
    state: TypingState,
}

impl TypingTracker {
    pub fn state(&self) -> TypingState {
        self.state
    }

    pub fn is_peer_typing(&self) -> bool {
        self.state == TypingState::PeerTyping
    }

    /// Feed one inbound event. Returns the new flag when it changed.
    pub fn observe(&mut self, event: &InboundEvent) -> Option<bool> {
        match event {
            InboundEvent::Typing { is_typing: true } => self.set(TypingState::PeerTyping),
            // A reply implicitly ends composing.
            InboundEvent::Typing { is_typing: false } | InboundEvent::PeerMessage { .. } => {
                self.set(TypingState::Idle)
            }
            InboundEvent::Ack { .. } | InboundEvent::Clear => None,
        }
    }

    /// Back to `Idle`, for conversation switches and teardown.
    pub fn reset(&mut self) -> Option<bool> {
        self.set(TypingState::Idle)
    }

    fn set(&mut self, next: TypingState) -> Option<bool> {
        if self.state == next {
            return None;
        }
        trace!(from = ?self.state, to = ?next, "typing state changed");
        self.state = next;
        Some(self.is_peer_typing())
    }
}
