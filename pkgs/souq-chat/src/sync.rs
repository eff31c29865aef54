//! Realtime loop: drains the conversation feed into the store and
//! recovers from feed loss.
//!
//! Notices are thin, so every one triggers a point refetch of the
//! changed conversation, which is then decorated and merged. When the
//! feed ends the loop reports the list as not live, waits with a
//! doubling backoff, and resubscribes; every resubscription starts with
//! a first-page resync so changes that happened while the feed was down
//! are folded in before new notices apply.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use souq_store::{ChangeNotice, ConversationFeed, ConversationRepository};

use crate::error::ChatError;
use crate::models::Conversation;
use crate::profiles::ProfileResolver;
use crate::store::ConversationStore;

pub(crate) struct SyncContext {
    pub user_id: String,
    pub repository: Arc<ConversationRepository>,
    pub profiles: Arc<ProfileResolver>,
    pub store: Arc<ConversationStore>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// Runs until aborted. `initial_feed` carries a subscription the caller
/// opened before its own first page load; when present the first
/// iteration skips the resync that would duplicate that load.
pub(crate) async fn sync_loop(ctx: SyncContext, initial_feed: Option<ConversationFeed>) {
    let mut pending = initial_feed;
    let mut backoff = ctx.backoff_initial;

    loop {
        let mut feed = match pending.take() {
            Some(feed) => feed,
            None => {
                let feed = ctx.repository.subscribe(&ctx.user_id);
                if let Err(err) = resync(&ctx).await {
                    ctx.store.publish_sync_status(false);
                    warn!(
                        "resync for {} failed, retrying in {:?}: {}",
                        ctx.user_id, backoff, err
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff, ctx.backoff_max);
                    continue;
                }
                feed
            }
        };

        backoff = ctx.backoff_initial;
        ctx.store.publish_sync_status(true);

        while let Some(notice) = feed.recv().await {
            apply_notice(&ctx, notice).await;
        }

        ctx.store.publish_sync_status(false);
        debug!(
            "conversation feed for {} ended, reconnecting in {:?}",
            ctx.user_id, backoff
        );
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, ctx.backoff_max);
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Re-read the first page and merge it without touching pagination
/// state. Rows past the first page are refreshed lazily as notices
/// arrive for them.
async fn resync(ctx: &SyncContext) -> Result<(), ChatError> {
    let page = ctx
        .repository
        .fetch_page(&ctx.user_id, None)
        .await
        .map_err(ChatError::Backend)?;
    let items: Vec<Conversation> = page
        .items
        .into_iter()
        .map(Conversation::from_record)
        .collect();
    let items = ctx
        .profiles
        .attach_other_participant(items, &ctx.user_id)
        .await;
    ctx.store.apply_refresh(&ctx.user_id, items);
    Ok(())
}

async fn apply_notice(ctx: &SyncContext, notice: ChangeNotice) {
    match ctx
        .repository
        .get_by_id(&notice.conversation_id, &ctx.user_id)
        .await
    {
        Ok(Some(record)) => {
            let mut conversation = Conversation::from_record(record);
            if let Some(uid) = conversation
                .other_participant_id(&ctx.user_id)
                .map(str::to_owned)
            {
                conversation.other_participant = ctx.profiles.resolve_one(&uid).await;
            }
            ctx.store.apply_update(&ctx.user_id, conversation);
        }
        Ok(None) => {
            debug!(
                "change notice for conversation {} outside {}'s scope",
                notice.conversation_id, ctx.user_id
            );
        }
        Err(err) => {
            // The next notice or resync will retry; the list just stays
            // slightly stale until then
            warn!(
                "refetch of conversation {} failed: {}",
                notice.conversation_id, err
            );
        }
    }
}
