//! Client-side conversation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use souq_directory::Profile;
use souq_store::ConversationRecord;

/// A conversation as rendered in the inbox: the store record seen by the
/// current user, decorated with the other party's display profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_sender_id: Option<String>,
    /// The current user's private read cursor.
    pub last_read_at: Option<DateTime<Utc>>,
    /// Resolved profile of the other party. Transient decoration:
    /// recomputed from the directory, never persisted with the
    /// conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_participant: Option<Profile>,
}

impl Conversation {
    pub fn from_record(record: ConversationRecord) -> Self {
        Self {
            id: record.id,
            participant_ids: record.participant_ids,
            last_message_text: record.last_message_text,
            last_message_at: record.last_message_at,
            last_message_sender_id: record.last_message_sender_id,
            last_read_at: record.last_read_at,
            other_participant: None,
        }
    }

    /// Uid of the participant other than `user_id`.
    pub fn other_participant_id(&self, user_id: &str) -> Option<&str> {
        self.participant_ids
            .iter()
            .map(String::as_str)
            .find(|id| *id != user_id)
    }

    /// Whether this conversation counts as unread for `user_id`: there
    /// is a last message, someone else sent it, and it postdates the
    /// user's read cursor. The user's own messages never produce an
    /// unread state.
    pub fn is_unread(&self, user_id: &str) -> bool {
        match (self.last_message_at, self.last_message_sender_id.as_deref()) {
            (Some(at), Some(sender)) if sender != user_id => {
                self.last_read_at.map_or(true, |read| at > read)
            }
            _ => false,
        }
    }
}
