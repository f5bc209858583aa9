//! Realtime conversation synchronization core.
//!
//! This crate owns the transport-agnostic half of the companion chat client:
//! the data model, the timeline reconciler that merges history, optimistic
//! writes and live events, the typing and follow-status state machines, and
//! the event plumbing between them. Network collaborators are abstracted
//! behind [`ConversationApi`] and [`FollowApi`].

/// Collaborator traits for REST endpoints.
pub mod api;
/// Observable session event channel.
pub mod channel;
/// Timeline and typing state for one mounted conversation.
pub mod conversation;
/// Synchronous fan-out of transport events.
pub mod dispatcher;
/// Stable error payloads and HTTP status mapping.
pub mod error;
/// Follow-status state machine and poll task.
pub mod follow;
/// Wire frame decoding/encoding.
pub mod normalization;
/// Caller-side reconnect backoff.
pub mod retry;
/// Push-channel lifecycle state machine.
pub mod state_machine;
/// Timeline reconciler.
pub mod timeline;
/// Data model shared with hosts.
pub mod types;
/// Peer typing tracker.
pub mod typing;

pub use api::{ConversationApi, FollowApi};
pub use channel::{EventStream, SessionChannels};
pub use conversation::ConversationState;
pub use dispatcher::{EventDispatcher, Subscription};
pub use error::{SyncError, SyncErrorCategory, http_status_code};
pub use follow::{DEFAULT_FOLLOW_POLL_INTERVAL, FollowPoller};
pub use normalization::{decode_inbound_frame, encode_outbound_frame};
pub use retry::RetryPolicy;
pub use state_machine::ChannelStateMachine;
pub use timeline::{TimelineChange, TimelineReconciler, now_millis};
pub use types::{
    ChannelState, ConversationHistory, ConversationId, ConversationSummary, FollowPhase,
    FollowStatus, InboundEvent, Origin, OutboundEvent, PersonaId, SessionEvent, TimelineEntry,
    TypingState,
};
pub use typing::TypingTracker;
