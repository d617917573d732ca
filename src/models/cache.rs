//! Runtime cache snapshot types
//!
//! The runtime stores downloaded model bytes in its own cache. Each entry
//! records how many bytes are stored and the size the origin declared, so a
//! partially written entry can be told apart from a complete one.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Metadata recorded by the runtime when it caches a download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    /// Size declared by the origin
    pub original_size: u64,
    /// URL the entry was downloaded from
    #[serde(rename = "originalURL")]
    pub original_url: String,
}

/// One entry of the runtime cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub name: String,
    /// Bytes stored
    pub size: u64,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Entry holds every byte the origin declared
    pub fn is_complete(&self) -> bool {
        self.size == self.metadata.original_size
    }
}

/// URLs whose cache entry is complete
pub fn fully_cached_urls(entries: &[CacheEntry]) -> HashSet<&str> {
    entries
        .iter()
        .filter(|e| e.is_complete())
        .map(|e| e.metadata.original_url.as_str())
        .collect()
}
