//! In-memory conversation list shared by the UI, the realtime loop, and
//! optimistic local writes.
//!
//! Three writers feed this store: page fetches, realtime refetches, and
//! optimistic local sends/reads. All of them go through one merge
//! policy, so precedence depends on the values carried, never on which
//! path delivered them: the last-message summary follows the greater
//! `last_message_at` (ties go to the incoming side, which makes
//! authoritative confirmations overwrite their optimistic twins), and
//! the read cursor only moves forward.
//!
//! Every operation that merges remote data carries the user id the data
//! was fetched for. Results that raced a user switch are dropped here
//! instead of bleeding into the next user's list.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tracing::debug;

use souq_store::PageCursor;

use crate::models::Conversation;

/// Events published to UI consumers.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Order, membership, or a record in the list changed. Consumers
    /// re-read [`ConversationStore::conversations`].
    ListChanged,
    /// The realtime feed went live or dropped. While not live the list
    /// stays usable and catches up on the next resync.
    SyncStatus { live: bool },
}

struct StoreInner {
    conversations: Vec<Conversation>,
    next_cursor: Option<PageCursor>,
    has_more: bool,
}

/// Reconciled conversation list for one signed-in user.
pub struct ConversationStore {
    user_id: String,
    inner: Mutex<StoreInner>,
    unread_tx: watch::Sender<usize>,
    events_tx: broadcast::Sender<ChatEvent>,
}

impl ConversationStore {
    pub fn new(user_id: impl Into<String>) -> Self {
        let (unread_tx, _) = watch::channel(0);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            user_id: user_id.into(),
            inner: Mutex::new(StoreInner {
                conversations: Vec::new(),
                next_cursor: None,
                has_more: false,
            }),
            unread_tx,
            events_tx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Snapshot of the list, newest activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.lock().unwrap().conversations.clone()
    }

    /// Continuation state for paging: the cursor of the next page and
    /// whether the backend reported more rows.
    pub fn page_state(&self) -> (Option<PageCursor>, bool) {
        let inner = self.inner.lock().unwrap();
        (inner.next_cursor, inner.has_more)
    }

    /// Number of conversations currently unread by this user.
    pub fn unread_count(&self) -> usize {
        *self.unread_tx.borrow()
    }

    /// Reactive view of the unread count; changes whenever the derived
    /// value does.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.unread_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events_tx.subscribe()
    }

    /// Merge a fetched page and adopt its continuation state. `for_user`
    /// is the id the fetch was issued for; a mismatch means the response
    /// raced a user switch and is dropped.
    pub fn apply_page(
        &self,
        for_user: &str,
        items: Vec<Conversation>,
        next_cursor: Option<PageCursor>,
        has_more: bool,
    ) {
        if !self.owned_by(for_user) {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            for item in items {
                upsert(&mut inner.conversations, item);
            }
            sort_conversations(&mut inner.conversations);
            inner.next_cursor = next_cursor;
            inner.has_more = has_more;
        }
        self.publish();
    }

    /// Merge refetched rows without touching the continuation state.
    /// Used by resyncs, which re-read the first page while the user may
    /// have paged further.
    pub fn apply_refresh(&self, for_user: &str, items: Vec<Conversation>) {
        if !self.owned_by(for_user) {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            for item in items {
                upsert(&mut inner.conversations, item);
            }
            sort_conversations(&mut inner.conversations);
        }
        self.publish();
    }

    /// Merge one authoritative record, from a realtime refetch or a
    /// point read.
    pub fn apply_update(&self, for_user: &str, item: Conversation) {
        if !self.owned_by(for_user) {
            return;
        }
        {
            let mut inner = self.inner.lock().unwrap();
            upsert(&mut inner.conversations, item);
            sort_conversations(&mut inner.conversations);
        }
        self.publish();
    }

    /// Optimistically fold a just-sent message into the summary and
    /// return the pre-mutation record so a failed send can be reverted.
    /// Returns `None` when the conversation is not in the list or an
    /// existing summary is already newer than `sent_at`.
    pub fn apply_local_send(
        &self,
        conversation_id: &str,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> Option<Conversation> {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            let pos = inner
                .conversations
                .iter()
                .position(|c| c.id == conversation_id)?;
            if inner.conversations[pos].last_message_at > Some(sent_at) {
                return None;
            }
            let snapshot = inner.conversations[pos].clone();
            let conv = &mut inner.conversations[pos];
            conv.last_message_text = Some(text.to_owned());
            conv.last_message_at = Some(sent_at);
            conv.last_message_sender_id = Some(self.user_id.clone());
            sort_conversations(&mut inner.conversations);
            snapshot
        };
        self.publish();
        Some(snapshot)
    }

    /// Undo a failed optimistic send. The snapshot is restored only if
    /// the failed write is still the newest value for the record;
    /// authoritative data that arrived in between wins and is left
    /// alone. The restored snapshot can still predate updates that
    /// merged while the send was in flight, so callers re-read the
    /// record after a rollback to fold those back in.
    pub fn revert_send(
        &self,
        conversation_id: &str,
        failed_at: DateTime<Utc>,
        snapshot: Conversation,
    ) {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(pos) = inner
                .conversations
                .iter()
                .position(|c| c.id == conversation_id)
            else {
                return;
            };
            if inner.conversations[pos].last_message_at != Some(failed_at) {
                debug!(
                    "skipping rollback of {}: summary was superseded meanwhile",
                    conversation_id
                );
                return;
            }
            // A read cursor moved while the send was in flight survives
            // the rollback
            let read = inner.conversations[pos].last_read_at.max(snapshot.last_read_at);
            inner.conversations[pos] = snapshot;
            inner.conversations[pos].last_read_at = read;
            sort_conversations(&mut inner.conversations);
        }
        self.publish();
    }

    /// Optimistically advance this user's read cursor. Never moves it
    /// backwards.
    pub fn apply_local_read(&self, conversation_id: &str, read_at: DateTime<Utc>) {
        {
            let mut inner = self.inner.lock().unwrap();
            let Some(conv) = inner
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
            else {
                return;
            };
            if conv.last_read_at >= Some(read_at) {
                return;
            }
            conv.last_read_at = Some(read_at);
        }
        self.publish();
    }

    pub(crate) fn publish_sync_status(&self, live: bool) {
        let _ = self.events_tx.send(ChatEvent::SyncStatus { live });
    }

    fn owned_by(&self, for_user: &str) -> bool {
        if for_user == self.user_id {
            return true;
        }
        debug!(
            "dropping result fetched for {} (list belongs to {})",
            for_user, self.user_id
        );
        false
    }

    fn publish(&self) {
        let unread = {
            let inner = self.inner.lock().unwrap();
            inner
                .conversations
                .iter()
                .filter(|c| c.is_unread(&self.user_id))
                .count()
        };
        self.unread_tx.send_if_modified(|current| {
            if *current == unread {
                false
            } else {
                *current = unread;
                true
            }
        });
        let _ = self.events_tx.send(ChatEvent::ListChanged);
    }
}

/// Insert or merge a record by id.
fn upsert(list: &mut Vec<Conversation>, incoming: Conversation) {
    match list.iter_mut().find(|c| c.id == incoming.id) {
        Some(existing) => merge_into(existing, incoming),
        None => list.push(incoming),
    }
}

/// Field-wise last-write-wins by value. The summary trio travels
/// together and follows the greater `last_message_at`, with ties going
/// to `incoming`; a record with no summary never erases one. The read
/// cursor takes the maximum. A missing profile decoration never
/// clobbers a present one.
fn merge_into(existing: &mut Conversation, incoming: Conversation) {
    if incoming.last_message_at >= existing.last_message_at {
        existing.last_message_text = incoming.last_message_text;
        existing.last_message_at = incoming.last_message_at;
        existing.last_message_sender_id = incoming.last_message_sender_id;
    }
    if incoming.last_read_at > existing.last_read_at {
        existing.last_read_at = incoming.last_read_at;
    }
    if incoming.other_participant.is_some() {
        existing.other_participant = incoming.other_participant;
    }
}

/// Newest activity first; conversations without any message sort after
/// all dated ones. The sort is stable, so equal keys keep their order.
fn sort_conversations(list: &mut [Conversation]) {
    list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}
