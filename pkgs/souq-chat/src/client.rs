//! Chat client facade
//!
//! Owns the reconciled conversation list for one signed-in user, the
//! realtime loop keeping it current, and the optimistic write paths.
//! Everything a view layer needs goes through this type or the
//! [`ChatSession`]s it opens.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use souq_directory::ProfileDirectory;
use souq_store::{ConversationRecord, ConversationRepository, MessageRecord, PageCursor};

use crate::error::ChatError;
use crate::models::Conversation;
use crate::profiles::ProfileResolver;
use crate::session::ChatSession;
use crate::store::{ChatEvent, ConversationStore};
use crate::sync::{sync_loop, SyncContext};
use crate::ChatConfig;

/// Internals shared between the client and its sessions.
pub(crate) struct ClientCore {
    pub(crate) user_id: String,
    pub(crate) repository: Arc<ConversationRepository>,
    pub(crate) profiles: Arc<ProfileResolver>,
    pub(crate) store: Arc<ConversationStore>,
}

impl ClientCore {
    /// Optimistic send: the summary is folded into the list before the
    /// backend write, and rolled back by value if the write fails.
    pub(crate) async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<MessageRecord, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let sent_at = Utc::now();
        let snapshot = self.store.apply_local_send(conversation_id, text, sent_at);

        match self
            .repository
            .send_message(conversation_id, &self.user_id, text)
            .await
        {
            Ok(record) => Ok(record),
            Err(err) => {
                if let Some(snapshot) = snapshot {
                    self.store.revert_send(conversation_id, sent_at, snapshot);
                    // The snapshot predates anything that merged while
                    // the send was in flight; a point refetch folds
                    // those changes back in
                    self.refresh_conversation(conversation_id).await;
                }
                Err(ChatError::Send(err))
            }
        }
    }

    /// Re-read one conversation and merge it by value. Failures are
    /// only logged; the next notice or resync covers the same ground.
    async fn refresh_conversation(&self, conversation_id: &str) {
        match self
            .repository
            .get_by_id(conversation_id, &self.user_id)
            .await
        {
            Ok(Some(record)) => {
                let conversation = Conversation::from_record(record);
                self.store.apply_update(&self.user_id, conversation);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    "refetch of conversation {} after failed send also failed: {}",
                    conversation_id, err
                );
            }
        }
    }

    /// Best-effort read mark: the local cursor moves immediately and a
    /// failed remote write is only logged. The next mark, or the next
    /// resync, brings the backend back in line.
    pub(crate) async fn mark_read(&self, conversation_id: &str) {
        self.store.apply_local_read(conversation_id, Utc::now());
        if let Err(err) = self
            .repository
            .mark_read(conversation_id, &self.user_id)
            .await
        {
            warn!("mark read for {} failed: {}", conversation_id, err);
        }
    }
}

/// Conversation client for one signed-in user.
pub struct ChatClient {
    core: Arc<ClientCore>,
    config: ChatConfig,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    pub fn new(
        user_id: impl Into<String>,
        repository: Arc<ConversationRepository>,
        directory: Arc<dyn ProfileDirectory>,
        config: ChatConfig,
    ) -> Self {
        let user_id = user_id.into();
        let core = Arc::new(ClientCore {
            store: Arc::new(ConversationStore::new(user_id.clone())),
            profiles: Arc::new(ProfileResolver::new(directory)),
            repository,
            user_id,
        });
        Self {
            core,
            config,
            sync_task: Mutex::new(None),
        }
    }

    /// Load the first page and start the realtime loop. The change feed
    /// is opened before the page fetch so no update lands in the gap
    /// between them.
    pub async fn start(&self) -> Result<(), ChatError> {
        let feed = self.core.repository.subscribe(&self.core.user_id);
        self.load_page(None).await?;

        let ctx = SyncContext {
            user_id: self.core.user_id.clone(),
            repository: self.core.repository.clone(),
            profiles: self.core.profiles.clone(),
            store: self.core.store.clone(),
            backoff_initial: Duration::from_secs(self.config.backoff_initial_secs),
            backoff_max: Duration::from_secs(self.config.backoff_max_secs),
        };
        let task = tokio::spawn(sync_loop(ctx, Some(feed)));
        if let Some(previous) = self.sync_task.lock().unwrap().replace(task) {
            previous.abort();
        }

        info!("Chat client started for {}", self.core.user_id);
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        &self.core.user_id
    }

    /// Snapshot of the conversation list, newest activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.core.store.conversations()
    }

    /// Number of conversations currently unread.
    pub fn unread_count(&self) -> usize {
        self.core.store.unread_count()
    }

    /// Reactive unread counter for badges.
    pub fn watch_unread(&self) -> watch::Receiver<usize> {
        self.core.store.watch_unread()
    }

    /// List-changed and sync-status events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.core.store.subscribe_events()
    }

    /// Fetch the next page into the list. Returns `false` when the last
    /// page was already reached.
    pub async fn load_more(&self) -> Result<bool, ChatError> {
        let (cursor, has_more) = self.core.store.page_state();
        if !has_more {
            return Ok(false);
        }
        self.load_page(cursor).await?;
        Ok(true)
    }

    /// Open (or create) the conversation with `recipient_id` and return
    /// a session on it. Safe to call from several places at once; every
    /// caller lands on the same conversation.
    pub async fn open_chat(&self, recipient_id: &str) -> Result<ChatSession, ChatError> {
        let record = self
            .core
            .repository
            .find_or_create(&self.core.user_id, recipient_id)
            .await
            .map_err(ChatError::Backend)?;
        self.open_record(record).await
    }

    /// Open a session on an existing conversation. Fails when the id is
    /// unknown or the current user is not a participant.
    pub async fn open_conversation(&self, conversation_id: &str) -> Result<ChatSession, ChatError> {
        let record = self
            .core
            .repository
            .get_by_id(conversation_id, &self.core.user_id)
            .await
            .map_err(ChatError::Backend)?
            .ok_or_else(|| ChatError::ConversationNotFound(conversation_id.to_owned()))?;
        self.open_record(record).await
    }

    /// Send into a conversation from the list, without opening a
    /// session.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChatError> {
        self.core.send_message(conversation_id, text).await.map(|_| ())
    }

    /// Mark a conversation read. Best effort; see
    /// [`ChatSession::mark_read`] for the session-side variant.
    pub async fn mark_read(&self, conversation_id: &str) {
        self.core.mark_read(conversation_id).await;
    }

    /// Stop the realtime loop. The list stays readable; a later
    /// [`start`](Self::start) resumes syncing with a fresh resync.
    pub fn close(&self) {
        if let Some(task) = self.sync_task.lock().unwrap().take() {
            task.abort();
        }
        info!("Chat client for {} closed", self.core.user_id);
    }

    async fn load_page(&self, cursor: Option<PageCursor>) -> Result<(), ChatError> {
        let page = self
            .core
            .repository
            .fetch_page(&self.core.user_id, cursor)
            .await
            .map_err(ChatError::Backend)?;

        let items: Vec<Conversation> = page
            .items
            .into_iter()
            .map(Conversation::from_record)
            .collect();
        let items = self
            .core
            .profiles
            .attach_other_participant(items, &self.core.user_id)
            .await;

        self.core
            .store
            .apply_page(&self.core.user_id, items, page.next_cursor, page.has_more);
        Ok(())
    }

    async fn open_record(&self, record: ConversationRecord) -> Result<ChatSession, ChatError> {
        let mut conversation = Conversation::from_record(record);
        if let Some(uid) = conversation
            .other_participant_id(&self.core.user_id)
            .map(str::to_owned)
        {
            conversation.other_participant = self.core.profiles.resolve_one(&uid).await;
        }
        // A conversation opened from a listing page may not be in the
        // paged list yet; merging it makes it visible immediately
        self.core
            .store
            .apply_update(&self.core.user_id, conversation.clone());

        // Feed first, then transcript, so a message between the two
        // shows up via the feed instead of being lost
        let feed = self
            .core
            .repository
            .subscribe_messages(&conversation.id, &self.core.user_id)
            .await
            .map_err(ChatError::Backend)?;
        let transcript = self
            .core
            .repository
            .fetch_messages(&conversation.id, &self.core.user_id)
            .await
            .map_err(ChatError::Backend)?;

        Ok(ChatSession::open(
            self.core.clone(),
            conversation.id,
            transcript,
            feed,
        ))
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use souq_directory::MemoryDirectory;
    use souq_store::MESSAGE_MAX_LEN;
    use tempfile::NamedTempFile;

    async fn open_core(user_id: &str) -> (ClientCore, NamedTempFile) {
        let temp_file = NamedTempFile::new().expect("failed to create temp file");
        let repository = Arc::new(
            ConversationRepository::open(temp_file.path().to_path_buf())
                .await
                .expect("failed to open repository"),
        );
        let core = ClientCore {
            user_id: user_id.to_owned(),
            repository,
            profiles: Arc::new(ProfileResolver::new(Arc::new(MemoryDirectory::new()))),
            store: Arc::new(ConversationStore::new(user_id)),
        };
        (core, temp_file)
    }

    #[tokio::test]
    async fn test_failed_send_rollback_rereads_changes_missed_meanwhile() {
        let (core, _temp) = open_core("buyer-1").await;
        let conversation = core
            .repository
            .find_or_create("buyer-1", "seller-1")
            .await
            .expect("creation should succeed");

        // List loaded before the seller's message lands
        let page = core
            .repository
            .fetch_page("buyer-1", None)
            .await
            .expect("fetch should succeed");
        let items = page
            .items
            .into_iter()
            .map(Conversation::from_record)
            .collect();
        core.store
            .apply_page("buyer-1", items, page.next_cursor, page.has_more);

        core.repository
            .send_message(&conversation.id, "seller-1", "deal at noon")
            .await
            .expect("send should succeed");

        let err = core
            .send_message(&conversation.id, &"x".repeat(MESSAGE_MAX_LEN + 1))
            .await
            .expect_err("oversized send must fail");
        assert!(matches!(err, ChatError::Send(_)));

        // The rollback must not resurrect the stale pre-send view
        let current = core.store.conversations()[0].clone();
        assert_eq!(current.last_message_text.as_deref(), Some("deal at noon"));
        assert_eq!(current.last_message_sender_id.as_deref(), Some("seller-1"));
    }
}
