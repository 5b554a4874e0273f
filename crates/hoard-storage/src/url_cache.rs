//! Presigned URL cache owned by the router.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use hoard_core::Clock;
use lru::LruCache;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 1024;

/// Entries are handed out only while at least this much lifetime remains.
const MIN_REMAINING_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct CachedUrl {
    url: String,
    expires_at: DateTime<Utc>,
}

/// LRU of presigned URLs keyed by (channel, object key).
pub struct UrlCache {
    entries: Mutex<LruCache<(Uuid, String), CachedUrl>>,
    clock: Arc<dyn Clock>,
}

impl UrlCache {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    pub fn get(&self, channel_id: Uuid, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let cache_key = (channel_id, key.to_string());
        match entries.get(&cache_key) {
            Some(entry) if entry.expires_at - now > Duration::seconds(MIN_REMAINING_SECS) => {
                Some(entry.url.clone())
            }
            Some(_) => {
                entries.pop(&cache_key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, channel_id: Uuid, key: &str, url: String, ttl: std::time::Duration) {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(0));
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.put((channel_id, key.to_string()), CachedUrl { url, expires_at });
    }

    /// Drop every entry signed for `channel_id`.
    pub fn invalidate_channel(&self, channel_id: Uuid) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let stale: Vec<(Uuid, String)> = entries
            .iter()
            .filter(|((channel, _), _)| *channel == channel_id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoard_core::ManualClock;

    fn cache() -> (UrlCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (UrlCache::new(8, clock.clone()), clock)
    }

    #[test]
    fn entries_expire_with_the_clock() {
        let (cache, clock) = cache();
        let channel = Uuid::new_v4();
        cache.insert(channel, "a", "https://signed/a".into(), std::time::Duration::from_secs(600));

        assert_eq!(cache.get(channel, "a").as_deref(), Some("https://signed/a"));

        clock.advance(Duration::seconds(590));
        assert_eq!(cache.get(channel, "a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidation_is_per_channel() {
        let (cache, _) = cache();
        let (one, two) = (Uuid::new_v4(), Uuid::new_v4());
        let ttl = std::time::Duration::from_secs(600);
        cache.insert(one, "a", "1a".into(), ttl);
        cache.insert(one, "b", "1b".into(), ttl);
        cache.insert(two, "a", "2a".into(), ttl);

        assert_eq!(cache.invalidate_channel(one), 2);
        assert_eq!(cache.get(one, "a"), None);
        assert_eq!(cache.get(two, "a").as_deref(), Some("2a"));
    }

    #[test]
    fn capacity_is_bounded() {
        let (cache, _) = cache();
        let channel = Uuid::new_v4();
        for i in 0..20 {
            cache.insert(channel, &i.to_string(), i.to_string(), std::time::Duration::from_secs(600));
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.get(channel, "0"), None);
        assert!(cache.get(channel, "19").is_some());
    }
}
