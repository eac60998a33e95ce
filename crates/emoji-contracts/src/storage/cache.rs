use tracing::{info, warn};

use crate::entries::EmojiList;

use super::{KeyValueStore, StorageError};

pub const CACHE_KEY: &str = "cachedEmojis";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLoad {
    /// A list was already persisted.
    Cached(EmojiList),
    /// Nothing was persisted; the seed URLs were adopted and written back.
    Seeded(EmojiList),
    /// Nothing persisted and no seed; the caller has to populate the store.
    ColdStart,
}

/// The emoji list persisted wholesale under [`CACHE_KEY`].
#[derive(Debug, Clone)]
pub struct EmojiCache<S> {
    store: S,
}

impl<S: KeyValueStore> EmojiCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read failures are logged and reported as a cold start.
    pub fn load(&mut self, seed_urls: &[String]) -> CacheLoad {
        match self.read() {
            Ok(Some(list)) => return CacheLoad::Cached(list),
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "emoji cache unreadable, treating as cold start");
                return CacheLoad::ColdStart;
            }
        }

        if seed_urls.is_empty() {
            return CacheLoad::ColdStart;
        }

        let seeded = EmojiList::from_urls(seed_urls.iter().cloned());
        if let Err(err) = self.save(&seeded) {
            warn!(error = %err, "failed to persist seed emoji list");
        }
        info!(count = seeded.len(), "adopted seed emoji list");
        CacheLoad::Seeded(seeded)
    }

    pub fn read(&mut self) -> Result<Option<EmojiList>, StorageError> {
        let Some(raw) = self.store.get(CACHE_KEY)? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(StorageError::Decode)
    }

    pub fn save(&mut self, list: &EmojiList) -> Result<(), StorageError> {
        let raw = serde_json::to_vec(list).map_err(StorageError::Encode)?;
        self.store.set(CACHE_KEY, &raw)
    }
}
