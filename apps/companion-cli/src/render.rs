use std::collections::HashMap;

use sync_core::{ChannelState, ConversationId, FollowPhase, Origin, SessionEvent};

/// Turns session events into terminal lines, printing each timeline entry once.
#[derive(Debug, Default)]
pub struct Renderer {
    conversation: Option<ConversationId>,
    // entry id -> still provisional
    printed: HashMap<String, bool>,
}

impl Renderer {
    pub fn render(&mut self, event: &SessionEvent) -> Vec<String> {
        match event {
            SessionEvent::TimelineChanged {
                conversation_id,
                entries,
            } => {
                let mut lines = Vec::new();
                if self.conversation.as_ref() != Some(conversation_id) {
                    self.conversation = Some(conversation_id.clone());
                    self.printed.clear();
                    lines.push(format!("== conversation {conversation_id} =="));
                }
                if entries.is_empty() && !self.printed.is_empty() {
                    self.printed.clear();
                    lines.push("-- conversation cleared --".to_owned());
                }
                for entry in entries {
                    match self.printed.insert(entry.id.clone(), entry.provisional) {
                        None => {
                            let who = match entry.origin {
                                Origin::User => "you",
                                Origin::Peer => "peer",
                            };
                            let suffix = if entry.provisional { " (sending)" } else { "" };
                            lines.push(format!("[{who}] {}{suffix}", entry.text));
                        }
                        Some(true) if !entry.provisional => {
                            lines.push(format!("  delivered: {}", entry.text));
                        }
                        Some(_) => {}
                    }
                }
                lines
            }
            SessionEvent::ChannelStateChanged { state } => {
                let label = match state {
                    ChannelState::Disconnected => "disconnected (/reconnect to retry)",
                    ChannelState::Connecting => "connecting",
                    ChannelState::Connected => "connected",
                    ChannelState::Failed => "failed (/reconnect to retry)",
                };
                vec![format!("* channel {label}")]
            }
            SessionEvent::TypingChanged { is_peer_typing } => {
                if *is_peer_typing {
                    vec!["* peer is typing...".to_owned()]
                } else {
                    Vec::new()
                }
            }
            SessionEvent::FollowStatusChanged(status) => {
                let phase = match status.phase {
                    FollowPhase::Pending => "pending",
                    FollowPhase::Confirmed => "confirmed",
                    FollowPhase::None => "not following",
                };
                vec![format!("* follow {}: {phase}", status.subject)]
            }
            SessionEvent::Error {
                code,
                message,
                recoverable,
            } => {
                let hint = if *recoverable { ", retryable" } else { "" };
                vec![format!("! {code}: {message}{hint}")]
            }
        }
    }
}
