//! Batched resolution of participant display profiles.
//!
//! The directory caps how many uids one lookup may carry, so requests
//! are deduplicated, served from cache where possible, and the misses
//! chunked into concurrent batch fetches. Resolution is best effort: a
//! failed chunk is logged and its uids are simply absent from the
//! result, leaving the affected conversations rendered without a
//! profile rather than failing the whole operation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, warn};

use souq_directory::{Profile, ProfileDirectory};

use crate::models::Conversation;

/// Read-through profile cache over the document store. Entries never
/// expire on their own; [`refresh`](ProfileResolver::refresh) is the
/// only invalidation.
pub struct ProfileResolver {
    directory: Arc<dyn ProfileDirectory>,
    cache: Mutex<HashMap<String, Profile>>,
}

impl ProfileResolver {
    pub fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self {
            directory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve profiles for `uids`. Duplicates collapse to one lookup,
    /// cached entries are served without touching the directory, and
    /// uids the directory does not know stay absent from the map.
    pub async fn resolve_many<I>(&self, uids: I) -> HashMap<String, Profile>
    where
        I: IntoIterator<Item = String>,
    {
        let wanted: BTreeSet<String> = uids.into_iter().collect();

        let mut resolved = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.cache.lock().unwrap();
            for uid in wanted {
                match cache.get(&uid) {
                    Some(profile) => {
                        resolved.insert(uid, profile.clone());
                    }
                    None => missing.push(uid),
                }
            }
        }
        if missing.is_empty() {
            return resolved;
        }

        debug!("resolving {} profiles from the directory", missing.len());
        let max = self.directory.max_batch().max(1);
        let fetches = missing.chunks(max).map(|chunk| self.directory.fetch_profiles(chunk));
        for outcome in join_all(fetches).await {
            match outcome {
                Ok(profiles) => {
                    let mut cache = self.cache.lock().unwrap();
                    for profile in profiles {
                        cache.insert(profile.uid.clone(), profile.clone());
                        resolved.insert(profile.uid.clone(), profile);
                    }
                }
                Err(err) => {
                    warn!("profile batch failed, entries will be missing: {}", err);
                }
            }
        }
        resolved
    }

    pub async fn resolve_one(&self, uid: &str) -> Option<Profile> {
        self.resolve_many([uid.to_owned()]).await.remove(uid)
    }

    /// Drop the cached entries for `uids` and fetch them anew.
    pub async fn refresh<I>(&self, uids: I) -> HashMap<String, Profile>
    where
        I: IntoIterator<Item = String>,
    {
        let uids: Vec<String> = uids.into_iter().collect();
        {
            let mut cache = self.cache.lock().unwrap();
            for uid in &uids {
                cache.remove(uid);
            }
        }
        self.resolve_many(uids).await
    }

    /// Decorate each conversation with the other party's profile,
    /// resolving the whole batch in one pass. Conversations whose
    /// profile cannot be resolved keep `other_participant = None` and
    /// stay fully usable.
    pub async fn attach_other_participant(
        &self,
        mut conversations: Vec<Conversation>,
        current_user_id: &str,
    ) -> Vec<Conversation> {
        let uids: Vec<String> = conversations
            .iter()
            .filter_map(|c| c.other_participant_id(current_user_id).map(str::to_owned))
            .collect();
        let profiles = self.resolve_many(uids).await;

        for conversation in &mut conversations {
            conversation.other_participant = conversation
                .other_participant_id(current_user_id)
                .and_then(|uid| profiles.get(uid).cloned());
        }
        conversations
    }
}
