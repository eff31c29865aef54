//! Conversation repository - paging, creation, sends, and read cursors
//!
//! All mutations go through transactions so a failure leaves no partial
//! rows behind, and every committed change is pushed to the relevant
//! change feeds. Timestamps are stored as epoch milliseconds and exposed
//! as `DateTime<Utc>`.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::{conversations, messages, participants};
use crate::error::StoreError;
use crate::notifier::{ChangeNotifier, ConversationFeed, MessageFeed};

/// Conversations returned per page.
pub const PAGE_SIZE: u64 = 15;

/// Longest accepted message body, in characters. Also enforced by a
/// check constraint on the messages table.
pub const MESSAGE_MAX_LEN: usize = 4000;

/// Opaque continuation token for [`ConversationRepository::fetch_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    offset: u64,
}

/// One page of a user's inbox, newest conversation first.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub items: Vec<ConversationRecord>,
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

/// A conversation as seen by one participant: shared summary fields plus
/// that participant's own read cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_sender_id: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A stored chat message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation repository
pub struct ConversationRepository {
    db: DatabaseConnection,
    notifier: ChangeNotifier,
}

impl ConversationRepository {
    /// Open (or create) the database at `db_path` and run migrations.
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        let db_path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db: DatabaseConnection = Database::connect(db_url.as_str()).await?;
        crate::migration::Migrator::up(&db, None).await?;

        info!("Conversation repository initialized at {}", db_path.display());

        Ok(Self::with_connection(db))
    }

    /// Wrap an existing, already migrated connection.
    pub fn with_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            notifier: ChangeNotifier::default(),
        }
    }

    /// Fetch one page of `user_id`'s conversations, newest activity
    /// first and conversations without messages after all dated ones.
    /// `None` asks for the first page; pass the returned cursor to
    /// continue. A cursor past the end yields an empty page.
    pub async fn fetch_page(
        &self,
        user_id: &str,
        cursor: Option<PageCursor>,
    ) -> Result<ConversationPage, StoreError> {
        let offset = cursor.map_or(0, |c| c.offset);

        // One extra row decides has_more without a second count query
        let mut rows = conversations::Entity::find()
            .find_also_related(participants::Entity)
            .filter(participants::Column::UserId.eq(user_id))
            .order_by_desc(conversations::Column::LastMessageAt)
            .order_by_desc(conversations::Column::CreatedAt)
            .offset(offset)
            .limit(PAGE_SIZE + 1)
            .all(&self.db)
            .await?;

        let has_more = rows.len() as u64 > PAGE_SIZE;
        rows.truncate(PAGE_SIZE as usize);

        let ids: Vec<String> = rows.iter().map(|(conv, _)| conv.id.clone()).collect();
        let mut members_by_conversation = self.participants_for(&ids).await?;

        let items = rows
            .into_iter()
            .map(|(conv, viewer)| {
                let participant_ids = members_by_conversation.remove(&conv.id).unwrap_or_default();
                assemble_record(conv, viewer.and_then(|p| p.last_read_at), participant_ids)
            })
            .collect();

        Ok(ConversationPage {
            items,
            next_cursor: has_more.then_some(PageCursor {
                offset: offset + PAGE_SIZE,
            }),
            has_more,
        })
    }

    /// Return the conversation between the two users, creating it (and
    /// both participant rows) if it does not exist yet. Concurrent calls
    /// for the same pair all land on one row: the unique `pair_key`
    /// index rejects duplicate inserts and the loser re-reads the
    /// winner's row.
    pub async fn find_or_create(
        &self,
        creator_id: &str,
        recipient_id: &str,
    ) -> Result<ConversationRecord, StoreError> {
        if creator_id == recipient_id {
            return Err(StoreError::SelfConversation);
        }

        let key = pair_key(creator_id, recipient_id);
        if let Some(existing) = self.find_by_pair_key(&key, creator_id).await? {
            return Ok(existing);
        }

        let now = Utc::now().timestamp_millis();
        let txn = self.db.begin().await?;

        let conversation = conversations::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            pair_key: Set(key.clone()),
            last_message_text: Set(None),
            last_message_at: Set(None),
            last_message_sender_id: Set(None),
            created_at: Set(now),
        };

        match conversation.insert(&txn).await {
            Ok(model) => {
                for user_id in [creator_id, recipient_id] {
                    let member = participants::ActiveModel {
                        conversation_id: Set(model.id.clone()),
                        user_id: Set(user_id.to_owned()),
                        last_read_at: Set(None),
                    };
                    member.insert(&txn).await?;
                }
                txn.commit().await?;

                info!("Created conversation {} for pair {}", model.id, key);
                let user_ids = vec![creator_id.to_owned(), recipient_id.to_owned()];
                self.notifier.notify_conversation(&user_ids, &model.id);
                Ok(assemble_record(model, None, user_ids))
            }
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => {
                // Another task created the pair concurrently; its row wins
                txn.rollback().await?;
                info!("Conversation for pair {} already exists, reusing it", key);
                self.find_by_pair_key(&key, creator_id)
                    .await?
                    .ok_or(StoreError::Database(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch a single conversation as seen by `viewer_id`. Returns
    /// `None` when the row is missing or the viewer is not a
    /// participant.
    pub async fn get_by_id(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let Some(conversation) = conversations::Entity::find_by_id(conversation_id)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let record = self.load_record(conversation, viewer_id).await?;
        if !record.participant_ids.iter().any(|id| id == viewer_id) {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Store a message and advance the conversation summary in one
    /// transaction, then notify the message feed and both participants'
    /// conversation feeds.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<MessageRecord, StoreError> {
        let len = content.chars().count();
        if len > MESSAGE_MAX_LEN {
            return Err(StoreError::MessageTooLong {
                len,
                max: MESSAGE_MAX_LEN,
            });
        }

        let txn = self.db.begin().await?;

        let members = participants::Entity::find()
            .filter(participants::Column::ConversationId.eq(conversation_id))
            .all(&txn)
            .await?;
        if members.is_empty() {
            return Err(StoreError::ConversationNotFound(conversation_id.to_owned()));
        }
        if !members.iter().any(|m| m.user_id == sender_id) {
            return Err(StoreError::NotParticipant {
                conversation_id: conversation_id.to_owned(),
                user_id: sender_id.to_owned(),
            });
        }

        let now_ms = Utc::now().timestamp_millis();
        let message = messages::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            conversation_id: Set(conversation_id.to_owned()),
            sender_id: Set(sender_id.to_owned()),
            content: Set(content.to_owned()),
            created_at: Set(now_ms),
        };
        let stored = message.insert(&txn).await?;

        let conversation = conversations::Entity::find_by_id(conversation_id)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_owned()))?;

        // The summary only moves forward; a slow commit must not shadow
        // a newer message that landed first
        if conversation.last_message_at.map_or(true, |t| t <= now_ms) {
            let mut active: conversations::ActiveModel = conversation.into();
            active.last_message_text = Set(Some(content.to_owned()));
            active.last_message_at = Set(Some(now_ms));
            active.last_message_sender_id = Set(Some(sender_id.to_owned()));
            active.update(&txn).await?;
        }

        txn.commit().await?;

        let record = message_to_record(stored);
        let user_ids: Vec<String> = members.into_iter().map(|m| m.user_id).collect();
        self.notifier.notify_message(conversation_id, &record);
        self.notifier.notify_conversation(&user_ids, conversation_id);

        debug!(
            "Stored message {} in conversation {}",
            record.id, conversation_id
        );
        Ok(record)
    }

    /// Move `user_id`'s read cursor to now. Returns the stored instant.
    /// Only the marking user's own feeds are notified; read cursors are
    /// invisible to the other side.
    pub async fn mark_read(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<DateTime<Utc>, StoreError> {
        let now_ms = Utc::now().timestamp_millis();

        let result = participants::Entity::update_many()
            .col_expr(participants::Column::LastReadAt, Expr::value(now_ms))
            .filter(participants::Column::ConversationId.eq(conversation_id))
            .filter(participants::Column::UserId.eq(user_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotParticipant {
                conversation_id: conversation_id.to_owned(),
                user_id: user_id.to_owned(),
            });
        }

        self.notifier
            .notify_conversation(&[user_id.to_owned()], conversation_id);
        Ok(millis_to_datetime(now_ms))
    }

    /// Full transcript of a conversation in send order. The viewer must
    /// be a participant.
    pub async fn fetch_messages(
        &self,
        conversation_id: &str,
        viewer_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.require_participant(conversation_id, viewer_id).await?;

        let rows = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .order_by_asc(messages::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(rows.into_iter().map(message_to_record).collect())
    }

    /// Open a change feed carrying notices for every conversation
    /// `user_id` participates in, including ones created later.
    pub fn subscribe(&self, user_id: &str) -> ConversationFeed {
        self.notifier.subscribe_conversations(user_id)
    }

    /// Open a feed of new messages in one conversation. The subscriber
    /// must be a participant.
    pub async fn subscribe_messages(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<MessageFeed, StoreError> {
        self.require_participant(conversation_id, user_id).await?;
        Ok(self.notifier.subscribe_messages(conversation_id))
    }

    /// Close every open feed; subscribers see end-of-stream and are
    /// expected to resubscribe with a resync.
    pub fn close_feeds(&self) {
        self.notifier.close_all();
    }

    async fn find_by_pair_key(
        &self,
        key: &str,
        viewer_id: &str,
    ) -> Result<Option<ConversationRecord>, StoreError> {
        let Some(conversation) = conversations::Entity::find()
            .filter(conversations::Column::PairKey.eq(key))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(self.load_record(conversation, viewer_id).await?))
    }

    async fn load_record(
        &self,
        conversation: conversations::Model,
        viewer_id: &str,
    ) -> Result<ConversationRecord, StoreError> {
        let members = participants::Entity::find()
            .filter(participants::Column::ConversationId.eq(&conversation.id))
            .all(&self.db)
            .await?;

        let viewer_read = members
            .iter()
            .find(|m| m.user_id == viewer_id)
            .and_then(|m| m.last_read_at);
        let participant_ids = members.into_iter().map(|m| m.user_id).collect();

        Ok(assemble_record(conversation, viewer_read, participant_ids))
    }

    async fn participants_for(
        &self,
        conversation_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, StoreError> {
        if conversation_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let members = participants::Entity::find()
            .filter(participants::Column::ConversationId.is_in(conversation_ids.to_vec()))
            .all(&self.db)
            .await?;

        let mut by_conversation: HashMap<String, Vec<String>> = HashMap::new();
        for member in members {
            by_conversation
                .entry(member.conversation_id)
                .or_default()
                .push(member.user_id);
        }
        Ok(by_conversation)
    }

    async fn require_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let member = participants::Entity::find_by_id((
            conversation_id.to_owned(),
            user_id.to_owned(),
        ))
        .one(&self.db)
        .await?;

        if member.is_none() {
            return Err(StoreError::NotParticipant {
                conversation_id: conversation_id.to_owned(),
                user_id: user_id.to_owned(),
            });
        }
        Ok(())
    }
}

/// Storage key enforcing one conversation per user pair: the two uids
/// joined in lexical order, so both request directions map to one row.
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

fn assemble_record(
    model: conversations::Model,
    viewer_read: Option<i64>,
    mut participant_ids: Vec<String>,
) -> ConversationRecord {
    participant_ids.sort();
    ConversationRecord {
        id: model.id,
        participant_ids,
        last_message_text: model.last_message_text,
        last_message_at: opt_millis_to_datetime(model.last_message_at),
        last_message_sender_id: model.last_message_sender_id,
        last_read_at: opt_millis_to_datetime(viewer_read),
        created_at: millis_to_datetime(model.created_at),
    }
}

fn message_to_record(model: messages::Model) -> MessageRecord {
    MessageRecord {
        id: model.id,
        conversation_id: model.conversation_id,
        sender_id: model.sender_id,
        content: model.content,
        created_at: millis_to_datetime(model.created_at),
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn opt_millis_to_datetime(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|t| Utc.timestamp_millis_opt(t).single())
}
