use std::future::Future;

use crate::{
    error::SyncError,
    types::{ConversationHistory, ConversationId, FollowStatus, PersonaId},
};

/// REST collaborators a conversation session depends on.
pub trait ConversationApi: Send + Sync + 'static {
    /// One-shot history fetch used to seed the timeline on mount.
    fn fetch_history(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<ConversationHistory, SyncError>> + Send;

    /// Destructive delete of every message in the conversation.
    fn clear_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Follow create/status endpoints.
pub trait FollowApi: Send + Sync + 'static {
    fn create_follow(
        &self,
        subject: &PersonaId,
    ) -> impl Future<Output = Result<FollowStatus, SyncError>> + Send;

    fn follow_status(
        &self,
        subject: &PersonaId,
    ) -> impl Future<Output = Result<FollowStatus, SyncError>> + Send;
}
