//! One open conversation: transcript, live appends, draft handling,
//! and automatic read marks.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use souq_store::{MessageFeed, MessageRecord};

use crate::client::ClientCore;
use crate::error::ChatError;

/// Events published by a session to its view.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended(MessageRecord),
}

/// An open conversation bound to the current user.
///
/// The transcript is kept in send order and deduplicated by message id:
/// the user's own send arrives both as the send result and as its feed
/// echo, and must appear exactly once. An inbound message from the
/// other side marks the conversation read the moment it is appended,
/// once per message, since the conversation is demonstrably on screen.
pub struct ChatSession {
    conversation_id: String,
    core: Arc<ClientCore>,
    messages: Arc<Mutex<Vec<MessageRecord>>>,
    draft: Mutex<String>,
    events_tx: broadcast::Sender<SessionEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    pub(crate) fn open(
        core: Arc<ClientCore>,
        conversation_id: String,
        transcript: Vec<MessageRecord>,
        feed: MessageFeed,
    ) -> Self {
        let messages = Arc::new(Mutex::new(transcript));
        let (events_tx, _) = broadcast::channel(256);
        let pump = spawn_pump(
            core.clone(),
            conversation_id.clone(),
            messages.clone(),
            events_tx.clone(),
            feed,
        );
        Self {
            conversation_id,
            core,
            messages,
            draft: Mutex::new(String::new()),
            events_tx,
            pump: Mutex::new(Some(pump)),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Transcript snapshot in send order.
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.messages.lock().unwrap().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Current draft text. Survives failed sends so the user can edit
    /// and resubmit.
    pub fn draft(&self) -> String {
        self.draft.lock().unwrap().clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        *self.draft.lock().unwrap() = text.into();
    }

    /// Send the draft. An empty or whitespace-only draft is rejected
    /// locally and the input left untouched. Otherwise the draft is
    /// cleared up front; if the backend rejects the write it is put
    /// back exactly as typed.
    pub async fn send_draft(&self) -> Result<MessageRecord, ChatError> {
        let original = {
            let mut draft = self.draft.lock().unwrap();
            if draft.trim().is_empty() {
                return Err(ChatError::EmptyMessage);
            }
            std::mem::take(&mut *draft)
        };

        match self.core.send_message(&self.conversation_id, &original).await {
            Ok(record) => {
                if append_unique(&self.messages, record.clone()) {
                    let _ = self
                        .events_tx
                        .send(SessionEvent::MessageAppended(record.clone()));
                }
                Ok(record)
            }
            Err(err) => {
                *self.draft.lock().unwrap() = original;
                Err(err)
            }
        }
    }

    /// Mark the conversation read now. Typically called right after
    /// opening; inbound messages re-mark automatically while the
    /// session lives.
    pub async fn mark_read(&self) {
        self.core.mark_read(&self.conversation_id).await;
    }

    /// Stop the live feed pump. The transcript snapshot stays readable.
    pub fn close(&self) {
        if let Some(task) = self.pump.lock().unwrap().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("conversation_id", &self.conversation_id)
            .finish_non_exhaustive()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(task) = self.pump.lock().unwrap().take() {
            task.abort();
        }
    }
}

fn spawn_pump(
    core: Arc<ClientCore>,
    conversation_id: String,
    messages: Arc<Mutex<Vec<MessageRecord>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    mut feed: MessageFeed,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = feed.recv().await {
            let inbound = record.sender_id != core.user_id;
            if append_unique(&messages, record.clone()) {
                let _ = events_tx.send(SessionEvent::MessageAppended(record));
                if inbound {
                    core.mark_read(&conversation_id).await;
                }
            }
        }
        debug!("message feed for {} ended", conversation_id);
    })
}

/// Append if the id is new, keeping send order. Returns whether the
/// record was actually added.
fn append_unique(messages: &Mutex<Vec<MessageRecord>>, record: MessageRecord) -> bool {
    let mut messages = messages.lock().unwrap();
    if messages.iter().any(|m| m.id == record.id) {
        return false;
    }
    messages.push(record);
    messages.sort_by_key(|m| m.created_at);
    true
}
