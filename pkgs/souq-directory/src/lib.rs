//! Profile directory client for Souq marketplace chat.
//!
//! Conversations live in the relational store, but user display data
//! (names, avatars) lives in a separate document collection keyed by uid.
//! This crate is the read side of that collection: a [`ProfileDirectory`]
//! trait plus two implementations, an in-memory one for tests and demos
//! and a JSON-file one for local tooling.
//!
//! Directory lookups are batched. Document stores cap the number of keys
//! a single query may carry, so every implementation advertises its bound
//! through [`ProfileDirectory::max_batch`] and rejects oversized requests;
//! callers are expected to chunk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Key-count bound for a single batched lookup, matching the common
/// document-store limit on `in`-style queries.
pub const DEFAULT_MAX_BATCH: usize = 10;

/// Display profile of a marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub uid: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl Profile {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            photo_url: None,
        }
    }

    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// Errors from directory lookups
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("batch of {requested} uids exceeds the directory bound of {max}")]
    BatchTooLarge { requested: usize, max: usize },

    #[error("directory unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read access to the profile document collection.
///
/// Unknown uids are skipped rather than reported, so a result may be
/// shorter than the request. Order of the returned profiles is not
/// specified.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Largest uid set a single [`fetch_profiles`](Self::fetch_profiles)
    /// call accepts.
    fn max_batch(&self) -> usize {
        DEFAULT_MAX_BATCH
    }

    /// Fetch the profiles for up to [`max_batch`](Self::max_batch) uids.
    async fn fetch_profiles(&self, uids: &[String]) -> Result<Vec<Profile>, DirectoryError>;
}

fn check_batch(requested: usize, max: usize) -> Result<(), DirectoryError> {
    if requested > max {
        return Err(DirectoryError::BatchTooLarge { requested, max });
    }
    Ok(())
}

/// In-memory directory for tests and demos.
#[derive(Default)]
pub struct MemoryDirectory {
    profiles: Mutex<HashMap<String, Profile>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.uid.clone(), profile);
    }

    pub fn remove(&self, uid: &str) {
        self.profiles.lock().unwrap().remove(uid);
    }
}

#[async_trait]
impl ProfileDirectory for MemoryDirectory {
    async fn fetch_profiles(&self, uids: &[String]) -> Result<Vec<Profile>, DirectoryError> {
        check_batch(uids.len(), self.max_batch())?;
        let profiles = self.profiles.lock().unwrap();
        Ok(uids
            .iter()
            .filter_map(|uid| profiles.get(uid).cloned())
            .collect())
    }
}

/// Directory backed by a JSON document on disk: a single object mapping
/// uid to profile. The file is re-read on every fetch so edits made by
/// other processes are picked up without a restart.
pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<HashMap<String, Profile>, DirectoryError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl ProfileDirectory for FileDirectory {
    async fn fetch_profiles(&self, uids: &[String]) -> Result<Vec<Profile>, DirectoryError> {
        check_batch(uids.len(), self.max_batch())?;
        let documents = self.load().await?;
        debug!(
            "loaded {} profile documents from {}",
            documents.len(),
            self.path.display()
        );
        Ok(uids
            .iter()
            .filter_map(|uid| documents.get(uid).cloned())
            .collect())
    }
}
