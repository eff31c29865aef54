//! Error types for souq-chat

use souq_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A read against the backend failed. Nothing was changed locally;
    /// retrying is safe.
    #[error("Backend error: {0}")]
    Backend(#[source] StoreError),

    /// The send transaction failed. The optimistic summary has already
    /// been rolled back by the time this is returned; a session that
    /// delegated the send restores the draft on seeing it.
    #[error("Message send failed: {0}")]
    Send(#[source] StoreError),

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}
