mod cache;
mod kv;

use std::path::PathBuf;

pub use cache::{CacheLoad, EmojiCache, CACHE_KEY};
pub use kv::{FileStore, KeyValueStore, MemoryStore};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file is corrupt ({}): {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("value for '{key}' is neither JSON nor UTF-8 text")]
    NotUtf8 { key: String },
    #[error("failed to encode stored value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("stored emoji list is unreadable: {0}")]
    Decode(#[source] serde_json::Error),
}
