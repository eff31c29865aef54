// Copyright 2025 Souq Team.
//
// Integration tests for ConversationRepository

use std::time::Duration;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use souq_store::entities::conversations;
use souq_store::migration::{Migrator, MigratorTrait};
use souq_store::{ConversationRepository, StoreError, MESSAGE_MAX_LEN, PAGE_SIZE};
use tempfile::NamedTempFile;
use tokio::time::timeout;

async fn create_test_repository() -> (ConversationRepository, NamedTempFile) {
    let temp_file = NamedTempFile::new().expect("failed to create temp file");
    let repository = ConversationRepository::open(temp_file.path().to_path_buf())
        .await
        .expect("failed to open repository");
    (repository, temp_file)
}

async fn create_test_db(path: &NamedTempFile) -> DatabaseConnection {
    let db = sea_orm::Database::connect(&format!(
        "sqlite:{}?mode=rwc",
        path.path().to_str().unwrap().replace("\\", "/")
    ))
    .await
    .expect("failed to connect to database");
    <Migrator as MigratorTrait>::up(&db, None)
        .await
        .expect("failed to run migrations");
    db
}

/// Seeds `count` conversations for `user_id`, each with one message, in
/// ascending recency order.
async fn seed_conversations(repository: &ConversationRepository, user_id: &str, count: usize) {
    for i in 0..count {
        let peer = format!("seller-{i:02}");
        let conversation = repository
            .find_or_create(user_id, &peer)
            .await
            .expect("failed to create conversation");
        repository
            .send_message(&conversation.id, user_id, &format!("hello {peer}"))
            .await
            .expect("failed to send message");
        // Keep millisecond timestamps strictly increasing
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_find_or_create_is_idempotent_across_directions() {
    let (repository, _temp) = create_test_repository().await;

    let first = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");
    let again = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("repeat lookup should succeed");
    let reversed = repository
        .find_or_create("seller-1", "buyer-1")
        .await
        .expect("reversed lookup should succeed");

    assert_eq!(first.id, again.id);
    assert_eq!(first.id, reversed.id);
    assert_eq!(
        first.participant_ids,
        vec!["buyer-1".to_owned(), "seller-1".to_owned()]
    );
    assert!(first.last_message_at.is_none());
}

#[tokio::test]
async fn test_concurrent_creation_collapses_to_one_conversation() {
    let (repository, _temp) = create_test_repository().await;

    let (a, b) = tokio::join!(
        repository.find_or_create("buyer-1", "seller-1"),
        repository.find_or_create("seller-1", "buyer-1"),
    );

    let a = a.expect("first creation should succeed");
    let b = b.expect("second creation should succeed");
    assert_eq!(a.id, b.id);

    let page = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("fetch should succeed");
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_self_conversation_is_rejected() {
    let (repository, _temp) = create_test_repository().await;

    let err = repository
        .find_or_create("buyer-1", "buyer-1")
        .await
        .expect_err("self conversation must be rejected");
    assert!(matches!(err, StoreError::SelfConversation));
}

#[tokio::test]
async fn test_empty_inbox_yields_empty_page() {
    let (repository, _temp) = create_test_repository().await;

    let page = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("fetch should succeed");

    assert!(page.items.is_empty());
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_pages_are_newest_first_and_cursor_walks_the_rest() {
    let (repository, _temp) = create_test_repository().await;
    seed_conversations(&repository, "buyer-1", 20).await;

    let first = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("first page should succeed");
    assert_eq!(first.items.len(), PAGE_SIZE as usize);
    assert!(first.has_more);

    // Most recently active pair comes first
    assert_eq!(
        first.items[0].last_message_text.as_deref(),
        Some("hello seller-19")
    );
    for window in first.items.windows(2) {
        assert!(window[0].last_message_at >= window[1].last_message_at);
    }

    let cursor = first.next_cursor.expect("first page should have a cursor");
    let second = repository
        .fetch_page("buyer-1", Some(cursor))
        .await
        .expect("second page should succeed");
    assert_eq!(second.items.len(), 5);
    assert!(!second.has_more);
    assert!(second.next_cursor.is_none());
    assert_eq!(
        second.items[4].last_message_text.as_deref(),
        Some("hello seller-00")
    );

    // No row is duplicated or skipped across the boundary
    let mut seen: Vec<&str> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|c| c.id.as_str())
        .collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn test_inbox_of_exactly_one_page_reports_no_more() {
    let (repository, _temp) = create_test_repository().await;
    seed_conversations(&repository, "buyer-1", PAGE_SIZE as usize).await;

    let page = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("fetch should succeed");

    assert_eq!(page.items.len(), PAGE_SIZE as usize);
    assert!(!page.has_more);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_conversations_without_messages_sort_after_dated_ones() {
    let (repository, _temp) = create_test_repository().await;

    let quiet = repository
        .find_or_create("buyer-1", "seller-quiet")
        .await
        .expect("creation should succeed");
    let active = repository
        .find_or_create("buyer-1", "seller-active")
        .await
        .expect("creation should succeed");
    repository
        .send_message(&active.id, "buyer-1", "ping")
        .await
        .expect("send should succeed");

    let page = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("fetch should succeed");
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, active.id);
    assert_eq!(page.items[1].id, quiet.id);
}

#[tokio::test]
async fn test_pages_only_contain_the_callers_conversations() {
    let (repository, _temp) = create_test_repository().await;
    seed_conversations(&repository, "buyer-1", 3).await;
    seed_conversations(&repository, "buyer-2", 2).await;

    let page = repository
        .fetch_page("buyer-2", None)
        .await
        .expect("fetch should succeed");

    assert_eq!(page.items.len(), 2);
    assert!(page
        .items
        .iter()
        .all(|c| c.participant_ids.contains(&"buyer-2".to_owned())));
}

#[tokio::test]
async fn test_send_updates_summary_and_reorders_inbox() {
    let (repository, _temp) = create_test_repository().await;
    seed_conversations(&repository, "buyer-1", 2).await;

    let page = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("fetch should succeed");
    let oldest = page.items.last().expect("expected two conversations").clone();

    let record = repository
        .send_message(&oldest.id, "buyer-1", "one more thing")
        .await
        .expect("send should succeed");
    assert_eq!(record.conversation_id, oldest.id);
    assert_eq!(record.sender_id, "buyer-1");

    let page = repository
        .fetch_page("buyer-1", None)
        .await
        .expect("fetch should succeed");
    assert_eq!(page.items[0].id, oldest.id);
    assert_eq!(
        page.items[0].last_message_text.as_deref(),
        Some("one more thing")
    );
    assert_eq!(
        page.items[0].last_message_sender_id.as_deref(),
        Some("buyer-1")
    );
    assert_eq!(page.items[0].last_message_at, Some(record.created_at));
}

#[tokio::test]
async fn test_summary_never_moves_backwards() {
    let temp_file = NamedTempFile::new().expect("failed to create temp file");
    let db = create_test_db(&temp_file).await;
    let repository = ConversationRepository::with_connection(db.clone());

    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");
    repository
        .send_message(&conversation.id, "seller-1", "reserved for you")
        .await
        .expect("send should succeed");
    tokio::time::sleep(Duration::from_millis(2)).await;

    // A competing writer committed a newer summary while this send was
    // still in flight
    let ahead = Utc::now().timestamp_millis() + 60_000;
    let row = conversations::Entity::find_by_id(conversation.id.clone())
        .one(&db)
        .await
        .expect("lookup should succeed")
        .expect("conversation row should exist");
    let mut active: conversations::ActiveModel = row.into();
    active.last_message_text = Set(Some("sold, sorry".to_owned()));
    active.last_message_at = Set(Some(ahead));
    active.last_message_sender_id = Set(Some("seller-1".to_owned()));
    active.update(&db).await.expect("update should succeed");

    repository
        .send_message(&conversation.id, "buyer-1", "still available?")
        .await
        .expect("send should succeed");

    // The slower write keeps its transcript row but must not drag the
    // summary backwards
    let view = repository
        .get_by_id(&conversation.id, "buyer-1")
        .await
        .expect("lookup should succeed")
        .expect("conversation should exist");
    assert_eq!(view.last_message_text.as_deref(), Some("sold, sorry"));
    assert_eq!(
        view.last_message_at.map(|t| t.timestamp_millis()),
        Some(ahead)
    );
    assert_eq!(view.last_message_sender_id.as_deref(), Some("seller-1"));

    let transcript = repository
        .fetch_messages(&conversation.id, "buyer-1")
        .await
        .expect("transcript should succeed");
    assert_eq!(transcript.len(), 2);
    assert_eq!(
        transcript.last().map(|m| m.content.as_str()),
        Some("still available?")
    );
}

#[tokio::test]
async fn test_outsiders_cannot_send_or_read() {
    let (repository, _temp) = create_test_repository().await;
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");

    let err = repository
        .send_message(&conversation.id, "stranger", "let me in")
        .await
        .expect_err("non-participant send must fail");
    assert!(matches!(err, StoreError::NotParticipant { .. }));

    let err = repository
        .fetch_messages(&conversation.id, "stranger")
        .await
        .expect_err("non-participant transcript read must fail");
    assert!(matches!(err, StoreError::NotParticipant { .. }));

    let hidden = repository
        .get_by_id(&conversation.id, "stranger")
        .await
        .expect("lookup should succeed");
    assert!(hidden.is_none());
}

#[tokio::test]
async fn test_send_to_unknown_conversation_fails() {
    let (repository, _temp) = create_test_repository().await;

    let err = repository
        .send_message("no-such-id", "buyer-1", "hello?")
        .await
        .expect_err("send to unknown conversation must fail");
    assert!(matches!(err, StoreError::ConversationNotFound(_)));
}

#[tokio::test]
async fn test_lookup_of_an_unknown_id_returns_none() {
    let (repository, _temp) = create_test_repository().await;

    let missing = repository
        .get_by_id("no-such-id", "buyer-1")
        .await
        .expect("lookup should succeed");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_oversized_message_is_rejected_before_storage() {
    let (repository, _temp) = create_test_repository().await;
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");

    let long = "x".repeat(MESSAGE_MAX_LEN + 1);
    let err = repository
        .send_message(&conversation.id, "buyer-1", &long)
        .await
        .expect_err("oversized message must fail");
    assert!(matches!(err, StoreError::MessageTooLong { .. }));

    let transcript = repository
        .fetch_messages(&conversation.id, "buyer-1")
        .await
        .expect("transcript should succeed");
    assert!(transcript.is_empty());
}

#[tokio::test]
async fn test_read_cursor_is_stored_per_user() {
    let (repository, _temp) = create_test_repository().await;
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");
    repository
        .send_message(&conversation.id, "seller-1", "lamp is yours")
        .await
        .expect("send should succeed");

    let marked_at = repository
        .mark_read(&conversation.id, "buyer-1")
        .await
        .expect("mark read should succeed");

    let buyer_view = repository
        .get_by_id(&conversation.id, "buyer-1")
        .await
        .expect("lookup should succeed")
        .expect("conversation should exist");
    assert_eq!(buyer_view.last_read_at, Some(marked_at));

    // The seller's cursor is untouched
    let seller_view = repository
        .get_by_id(&conversation.id, "seller-1")
        .await
        .expect("lookup should succeed")
        .expect("conversation should exist");
    assert!(seller_view.last_read_at.is_none());

    let err = repository
        .mark_read(&conversation.id, "stranger")
        .await
        .expect_err("non-participant mark read must fail");
    assert!(matches!(err, StoreError::NotParticipant { .. }));
}

#[tokio::test]
async fn test_transcript_is_in_send_order() {
    let (repository, _temp) = create_test_repository().await;
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");

    for text in ["first", "second", "third"] {
        repository
            .send_message(&conversation.id, "buyer-1", text)
            .await
            .expect("send should succeed");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let transcript = repository
        .fetch_messages(&conversation.id, "seller-1")
        .await
        .expect("transcript should succeed");
    let contents: Vec<&str> = transcript.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_change_feeds_reach_both_participants() {
    let (repository, _temp) = create_test_repository().await;
    let mut buyer_feed = repository.subscribe("buyer-1");
    let mut seller_feed = repository.subscribe("seller-1");

    // Subscriptions opened before creation still hear about the new pair
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");

    let notice = timeout(Duration::from_secs(2), buyer_feed.recv())
        .await
        .expect("buyer notice should arrive")
        .expect("feed should stay open");
    assert_eq!(notice.conversation_id, conversation.id);

    let notice = timeout(Duration::from_secs(2), seller_feed.recv())
        .await
        .expect("seller notice should arrive")
        .expect("feed should stay open");
    assert_eq!(notice.conversation_id, conversation.id);

    repository
        .send_message(&conversation.id, "buyer-1", "hi")
        .await
        .expect("send should succeed");

    let notice = timeout(Duration::from_secs(2), seller_feed.recv())
        .await
        .expect("send notice should arrive")
        .expect("feed should stay open");
    assert_eq!(notice.conversation_id, conversation.id);
}

#[tokio::test]
async fn test_read_cursor_notices_stay_private() {
    let (repository, _temp) = create_test_repository().await;
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");

    let mut buyer_feed = repository.subscribe("buyer-1");
    let mut seller_feed = repository.subscribe("seller-1");

    repository
        .mark_read(&conversation.id, "buyer-1")
        .await
        .expect("mark read should succeed");

    let notice = timeout(Duration::from_secs(2), buyer_feed.recv())
        .await
        .expect("marking user should be notified")
        .expect("feed should stay open");
    assert_eq!(notice.conversation_id, conversation.id);

    // The other side must not learn about it
    let silent = timeout(Duration::from_millis(200), seller_feed.recv()).await;
    assert!(silent.is_err());
}

#[tokio::test]
async fn test_message_feed_requires_membership_and_carries_records() {
    let (repository, _temp) = create_test_repository().await;
    let conversation = repository
        .find_or_create("buyer-1", "seller-1")
        .await
        .expect("creation should succeed");

    let err = repository
        .subscribe_messages(&conversation.id, "stranger")
        .await
        .expect_err("non-participant subscription must fail");
    assert!(matches!(err, StoreError::NotParticipant { .. }));

    let mut feed = repository
        .subscribe_messages(&conversation.id, "seller-1")
        .await
        .expect("participant subscription should succeed");

    repository
        .send_message(&conversation.id, "buyer-1", "fresh stock today")
        .await
        .expect("send should succeed");

    let record = timeout(Duration::from_secs(2), feed.recv())
        .await
        .expect("record should arrive")
        .expect("feed should stay open");
    assert_eq!(record.content, "fresh stock today");
    assert_eq!(record.sender_id, "buyer-1");
}

#[tokio::test]
async fn test_closing_feeds_ends_subscriptions() {
    let (repository, _temp) = create_test_repository().await;
    let mut feed = repository.subscribe("buyer-1");

    repository.close_feeds();

    let ended = timeout(Duration::from_secs(2), feed.recv())
        .await
        .expect("recv should resolve");
    assert!(ended.is_none());
}
