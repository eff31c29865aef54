//! Souq Chat - Conversation sync engine for the marketplace client
//!
//! This crate keeps one signed-in user's conversation list correct and
//! current across three write paths: paged fetches from the store,
//! realtime change feeds, and the user's own optimistic sends and read
//! marks. All three converge on a single value-based merge, so the list
//! reaches the same state no matter which path delivers first.
//!
//! # Architecture
//!
//! - **ChatClient**: Facade owning the list, the realtime loop, and the
//!   write paths; opens [`ChatSession`]s
//! - **ConversationStore**: Reconciled in-memory list with the merge
//!   policy, derived unread count, and UI events
//! - **ProfileResolver**: Batched, cached lookup of display profiles
//!   from the separate profile directory
//! - **ChatSession**: One open conversation; transcript, live appends,
//!   draft handling, and automatic read marks
//! - **sync** (internal): Feed drain loop with backoff reconnect and
//!   first-page resync
//!
//! # Key Properties
//!
//! - The list is always ordered by last activity, conversations without
//!   messages last
//! - Unread state is derived per user from the shared summary and the
//!   user's private read cursor, never stored
//! - Optimistic writes are reconciled by value: whichever side carries
//!   the newer `last_message_at` wins, so a rollback never erases
//!   authoritative data that arrived meanwhile
//! - Results fetched for a previous user are dropped, not merged
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use souq_chat::{ChatClient, ChatConfig, MemoryDirectory, Profile};
//! use souq_store::ConversationRepository;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = Arc::new(ConversationRepository::open("souq.db".into()).await?);
//! let directory = Arc::new(MemoryDirectory::new());
//! directory.insert(Profile::new("seller-1", "Amina's Lamps"));
//!
//! let client = ChatClient::new("buyer-1", repository, directory, ChatConfig::default());
//! client.start().await?;
//!
//! let session = client.open_chat("seller-1").await?;
//! session.set_draft("Is the lamp still available?");
//! session.send_draft().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
pub mod profiles;
pub mod session;
pub mod store;

mod sync;

pub use client::ChatClient;
pub use error::ChatError;
pub use models::Conversation;
pub use profiles::ProfileResolver;
pub use session::{ChatSession, SessionEvent};
pub use store::{ChatEvent, ConversationStore};

// Re-exports so view layers only need this crate
pub use souq_directory::{
    DirectoryError, FileDirectory, MemoryDirectory, Profile, ProfileDirectory,
};
pub use souq_store::{ConversationRepository, MessageRecord, PageCursor, StoreError};

/// Tuning knobs for the realtime loop.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Delay before the first reconnect attempt after the feed drops.
    pub backoff_initial_secs: u64,
    /// Cap for the doubling reconnect delay.
    pub backoff_max_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backoff_initial_secs: 1,
            backoff_max_secs: 30,
        }
    }
}
