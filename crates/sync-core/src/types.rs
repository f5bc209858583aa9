use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque conversation identifier. Scopes exactly one channel and one timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Persona identifier used as the subject of follow requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(String);

impl PersonaId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Author side of a timeline entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Written by the local user.
    User,
    /// Written by the persona on the other end.
    Peer,
}

impl Origin {
    /// Prefix used for locally generated entry IDs.
    pub fn id_tag(self) -> &'static str {
        match self {
            Self::User => "local",
            Self::Peer => "ws",
        }
    }
}

/// Canonical chat line rendered by every timeline consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Unique within one timeline.
    pub id: String,
    /// Who wrote the line.
    pub origin: Origin,
    /// Display text.
    pub text: String,
    /// Creation time in milliseconds since Unix epoch.
    pub created_at_ms: u64,
    /// `true` until the server confirms the entry.
    pub provisional: bool,
}

impl TimelineEntry {
    /// Build an authoritative entry, as delivered by history or the server.
    pub fn confirmed(
        id: impl Into<String>,
        origin: Origin,
        text: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            origin,
            text: text.into(),
            created_at_ms,
            provisional: false,
        }
    }
}

/// Push-channel connection state. Owned by the transport, observed by everyone else.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// No connection, either never opened or closed.
    #[default]
    Disconnected,
    /// `open` is in flight.
    Connecting,
    /// Ready to send and receive.
    Connected,
    /// Open failed or the live connection dropped with an error.
    Failed,
}

/// Peer composing state derived from inbound typing events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TypingState {
    #[default]
    Idle,
    PeerTyping,
}

/// Logical inbound event after wire normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum InboundEvent {
    /// Generated reply from the persona.
    PeerMessage { content: String },
    /// Typing start (`true`) or stop (`false`).
    Typing { is_typing: bool },
    /// Server confirmation of a user message already shown optimistically.
    Ack { content: Option<String> },
    /// Drop the whole timeline.
    Clear,
}

/// Logical outbound event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboundEvent {
    UserMessage { content: String },
}

/// Server-side follow phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowPhase {
    /// Request accepted, awaiting confirmation.
    Pending,
    /// Follow is active.
    Confirmed,
    /// No follow relationship exists.
    None,
}

impl FollowPhase {
    /// Whether no further transition is expected from this phase.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Server-confirmed follow status for one persona.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowStatus {
    /// Persona the status refers to.
    #[serde(rename = "personaId", alias = "subject")]
    pub subject: PersonaId,
    /// Request phase.
    #[serde(rename = "status", alias = "phase")]
    pub phase: FollowPhase,
    /// Whether the user currently follows the persona.
    pub is_following: bool,
}

/// Conversation metadata returned with the history fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub persona_id: PersonaId,
    pub persona_name: Option<String>,
    pub message_count: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Result of the one-shot history fetch used to seed a timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationHistory {
    /// Historical entries in server order.
    pub entries: Vec<TimelineEntry>,
    /// Conversation metadata, when the server sent it.
    pub conversation: Option<ConversationSummary>,
}

/// Observable output consumed by UI hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// Full ordered timeline snapshot after any change.
    TimelineChanged {
        conversation_id: ConversationId,
        entries: Vec<TimelineEntry>,
    },
    /// Transport state transition.
    ChannelStateChanged { state: ChannelState },
    /// Peer composing indicator changed.
    TypingChanged { is_peer_typing: bool },
    /// Follow status adopted from a server response.
    FollowStatusChanged(FollowStatus),
    /// Network-facing failure surfaced for user-visible handling.
    Error {
        /// Stable error code.
        code: String,
        /// Human-readable message.
        message: String,
        /// Whether a caller-initiated retry may recover.
        recoverable: bool,
    },
}
