//! Error types for souq-store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("User {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: String,
        user_id: String,
    },

    #[error("A user cannot open a conversation with themselves")]
    SelfConversation,

    #[error("Message of {len} characters exceeds the limit of {max}")]
    MessageTooLong { len: usize, max: usize },
}
