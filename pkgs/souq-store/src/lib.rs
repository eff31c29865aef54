//! Souq Store - Conversation persistence for marketplace chat
//!
//! This crate provides SQLite-based persistent storage for buyer/seller
//! conversations using Sea-ORM, together with in-process change feeds
//! that push updates to subscribed clients.
//!
//! # Architecture
//!
//! - **ConversationRepository**: Paged inbox reads, idempotent
//!   conversation creation, transactional sends, and per-user read
//!   cursors
//! - **ChangeNotifier** (internal): Fan-out of change notices to
//!   per-user conversation feeds and per-conversation message feeds
//!
//! # Database Schema
//!
//! - `conversations`: One row per buyer/seller pair with a denormalized
//!   last-message summary; `pair_key` carries a unique index so
//!   concurrent creation collapses to one row
//! - `participants`: Join table from conversations to users, holding
//!   each user's private `last_read_at` cursor
//! - `messages`: Message bodies, append-only
//!
//! # Key Properties
//!
//! - **Atomic sends**: Message insert and summary update share one
//!   transaction; feeds are notified only after commit
//! - **Scoped feeds**: A conversation feed only carries notices for
//!   conversations its user participates in; message feeds require a
//!   participant check
//! - **Thin notices**: Feeds push conversation ids, not payloads, and
//!   receivers refetch through the repository
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use souq_store::ConversationRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = ConversationRepository::open("souq.db".into()).await?;
//!
//! let conversation = repository.find_or_create("buyer-1", "seller-1").await?;
//! repository
//!     .send_message(&conversation.id, "buyer-1", "Is the lamp still available?")
//!     .await?;
//!
//! let page = repository.fetch_page("buyer-1", None).await?;
//! assert_eq!(page.items.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod error;
pub mod migration;
pub mod notifier;
pub mod repository;

pub use error::StoreError;
pub use notifier::{ChangeNotice, ConversationFeed, MessageFeed};
pub use repository::{
    pair_key, ConversationPage, ConversationRecord, ConversationRepository, MessageRecord,
    PageCursor, MESSAGE_MAX_LEN, PAGE_SIZE,
};
