//! Change feeds for conversations and messages.
//!
//! The store pushes thin notices: a conversation feed carries only the id
//! of the row that changed, and the subscriber refetches it through the
//! repository. Message feeds carry the full record since a message never
//! changes after insert.
//!
//! Scoping happens here, on the server side of the boundary. A
//! conversation feed is keyed by user id and only receives notices for
//! conversations that user participates in; a message feed is keyed by
//! conversation id and handed out only after a participant check.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::MessageRecord;

/// Notice that a conversation row changed. Deliberately thin: receivers
/// refetch through the repository instead of trusting a pushed payload.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    pub conversation_id: String,
}

/// Per-user feed of conversation change notices.
pub struct ConversationFeed {
    receiver: mpsc::UnboundedReceiver<ChangeNotice>,
}

impl ConversationFeed {
    /// Next notice, or `None` once the store has closed the feed.
    pub async fn recv(&mut self) -> Option<ChangeNotice> {
        self.receiver.recv().await
    }
}

/// Per-conversation feed of newly stored messages.
#[derive(Debug)]
pub struct MessageFeed {
    receiver: mpsc::UnboundedReceiver<MessageRecord>,
}

impl MessageFeed {
    pub async fn recv(&mut self) -> Option<MessageRecord> {
        self.receiver.recv().await
    }
}

#[derive(Default)]
struct NotifierInner {
    conversation_feeds: HashMap<String, Vec<mpsc::UnboundedSender<ChangeNotice>>>,
    message_feeds: HashMap<String, Vec<mpsc::UnboundedSender<MessageRecord>>>,
}

/// Fan-out hub owned by the repository.
#[derive(Default)]
pub(crate) struct ChangeNotifier {
    inner: Mutex<NotifierInner>,
}

impl ChangeNotifier {
    pub(crate) fn subscribe_conversations(&self, user_id: &str) -> ConversationFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .conversation_feeds
            .entry(user_id.to_owned())
            .or_default()
            .push(sender);
        ConversationFeed { receiver }
    }

    pub(crate) fn subscribe_messages(&self, conversation_id: &str) -> MessageFeed {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .message_feeds
            .entry(conversation_id.to_owned())
            .or_default()
            .push(sender);
        MessageFeed { receiver }
    }

    /// Push a change notice to every feed of every listed user, pruning
    /// feeds whose receivers are gone.
    pub(crate) fn notify_conversation(&self, user_ids: &[String], conversation_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        for user_id in user_ids {
            if let Some(senders) = inner.conversation_feeds.get_mut(user_id) {
                senders.retain(|sender| {
                    sender
                        .send(ChangeNotice {
                            conversation_id: conversation_id.to_owned(),
                        })
                        .is_ok()
                });
                if senders.is_empty() {
                    inner.conversation_feeds.remove(user_id);
                }
            }
        }
    }

    pub(crate) fn notify_message(&self, conversation_id: &str, record: &MessageRecord) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(senders) = inner.message_feeds.get_mut(conversation_id) {
            senders.retain(|sender| sender.send(record.clone()).is_ok());
            if senders.is_empty() {
                inner.message_feeds.remove(conversation_id);
            }
        }
    }

    /// Drop every open feed. Receivers observe end-of-stream on their
    /// next `recv`.
    pub(crate) fn close_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.conversation_feeds.clear();
        inner.message_feeds.clear();
    }
}
