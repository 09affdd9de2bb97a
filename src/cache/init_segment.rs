//! LRU cache for DASH init segments.
//!
//! Init segments are immutable per representation and refetched by players
//! for every media segment routed through the decrypt endpoint; caching them
//! saves one upstream round trip per segment.

use bytes::Bytes;
use lru::LruCache;
use std::{
    collections::hash_map::DefaultHasher,
    collections::HashMap,
    hash::{Hash, Hasher},
    num::NonZeroUsize,
    sync::Mutex,
};

use crate::{proxy::RoutingClient, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    url: String,
    headers_hash: u64,
}

impl CacheKey {
    fn new(url: &str, headers: &HashMap<String, String>) -> Self {
        let mut sorted: Vec<_> = headers.iter().collect();
        sorted.sort();
        let mut hasher = DefaultHasher::new();
        for (k, v) in sorted {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }
        Self {
            url: url.to_string(),
            headers_hash: hasher.finish(),
        }
    }
}

pub struct InitSegmentCache {
    cache: Mutex<LruCache<CacheKey, Bytes>>,
}

impl InitSegmentCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_entries).expect("max_entries must be > 0"),
            )),
        }
    }

    pub async fn get_or_fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        client: &RoutingClient,
    ) -> Result<Bytes> {
        let key = CacheKey::new(url, headers);

        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(cached) = cache.get(&key) {
                tracing::debug!(url, "init segment cache hit");
                return Ok(cached.clone());
            }
        }

        tracing::debug!(url, "init segment cache miss");
        let bytes = client.fetch_bytes(url, headers).await?;

        self.cache.lock().unwrap().put(key, bytes.clone());
        Ok(bytes)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InitSegmentCache {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_order_independent() {
        let mut h1 = HashMap::new();
        h1.insert("A".to_string(), "1".to_string());
        h1.insert("B".to_string(), "2".to_string());

        let mut h2 = HashMap::new();
        h2.insert("B".to_string(), "2".to_string());
        h2.insert("A".to_string(), "1".to_string());

        assert_eq!(
            CacheKey::new("https://x/init.mp4", &h1),
            CacheKey::new("https://x/init.mp4", &h2)
        );
    }

    #[test]
    fn test_cache_key_differs_by_headers() {
        let mut h1 = HashMap::new();
        h1.insert("Referer".to_string(), "a".to_string());
        let mut h2 = HashMap::new();
        h2.insert("Referer".to_string(), "b".to_string());

        assert_ne!(
            CacheKey::new("https://x/init.mp4", &h1),
            CacheKey::new("https://x/init.mp4", &h2)
        );
    }
}
