use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use log::debug;
use serde_json::Value;

use crate::PrimaryKey;

/// How long a cached entry lives after it was last written
pub const CONVERSATION_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Short-lived state about a conversation that is only needed between two
/// requests, like the audio a user just uploaded.
pub struct ConversationCache {
    entries: DashMap<PrimaryKey, CacheEntry>,
    ttl: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedConversation {
    /// The last audio file uploaded for this conversation
    pub last_audio_path: Option<PathBuf>,
    /// The chat history sent along with the last analysis
    pub last_chat_history: Option<Value>,
}

struct CacheEntry {
    value: CachedConversation,
    written_at: Instant,
}

impl ConversationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached state, if it exists and hasn't expired
    pub fn get(&self, conversation_id: PrimaryKey) -> Option<CachedConversation> {
        {
            let entry = self.entries.get(&conversation_id)?;

            if entry.written_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
        }

        // The read guard must be gone before removing
        self.entries.remove(&conversation_id);
        None
    }

    pub fn set_audio(&self, conversation_id: PrimaryKey, path: PathBuf) {
        self.update(conversation_id, |value| value.last_audio_path = Some(path));
    }

    pub fn set_chat_history(&self, conversation_id: PrimaryKey, chat_history: Value) {
        self.update(conversation_id, |value| {
            value.last_chat_history = Some(chat_history)
        });
    }

    pub fn remove(&self, conversation_id: PrimaryKey) {
        self.entries.remove(&conversation_id);
    }

    /// Drops every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.written_at.elapsed() < self.ttl);

        let purged = before.saturating_sub(self.entries.len());

        if purged > 0 {
            debug!("Purged {} expired conversation cache entries", purged);
        }

        purged
    }

    fn update(&self, conversation_id: PrimaryKey, apply: impl FnOnce(&mut CachedConversation)) {
        let mut entry = self
            .entries
            .entry(conversation_id)
            .or_insert_with(|| CacheEntry {
                value: Default::default(),
                written_at: Instant::now(),
            });

        // Expired state must not leak into the fresh entry
        if entry.written_at.elapsed() >= self.ttl {
            entry.value = Default::default();
        }

        apply(&mut entry.value);
        entry.written_at = Instant::now();
    }
}

impl Default for ConversationCache {
    fn default() -> Self {
        Self::new(CONVERSATION_CACHE_TTL)
    }
}
