use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::storage::{KvStore, StoreError};

/// Selected event/funnel definitions per data source. Never expires.
pub const SELECTED_ITEMS_KEY: &str = "attribution_selected_items_v4";
/// Date range, filters and pagination of the last query.
pub const QUERY_STATE_KEY: &str = "attribution_query_state_v1";
/// Full result set of the last query.
pub const DATA_CACHE_KEY: &str = "attribution_data_cache_v1";

/// 24 hours in milliseconds.
pub const TTL_MS: i64 = 24 * 60 * 60 * 1000;
/// Serialized entries above this size are not cached.
pub const MAX_CACHE_BYTES: usize = 5 * 1024 * 1024;

const EXPIRING_KEYS: [&str; 2] = [QUERY_STATE_KEY, DATA_CACHE_KEY];

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    timestamp: i64,
    payload: T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    timestamp: i64,
}

/// An entry is fresh while it is strictly younger than the TTL.
pub fn is_fresh(timestamp: i64, now: i64) -> bool {
    now - timestamp < TTL_MS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The entry was not stored and any previous value under the key was dropped.
    TooLarge { bytes: usize },
}

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp_millis())
}

/// Timestamped JSON entries over a [`KvStore`]. Stale or unreadable entries are removed
/// when read and reported as a miss.
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn KvStore>,
    clock: Clock,
}

impl TtlCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        TtlCache { store, clock: system_clock() }
    }

    pub fn with_clock(store: Arc<dyn KvStore>, clock: Clock) -> Self {
        TtlCache { store, clock }
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn read_fresh<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope<T>>(&raw) {
            Ok(entry) if is_fresh(entry.timestamp, self.now()) => Ok(Some(entry.payload)),
            Ok(_) => {
                log::debug!("Cache entry '{}' expired", key);
                self.store.remove(key)?;
                Ok(None)
            }
            Err(e) => {
                log::warn!("Dropping unreadable cache entry '{}': {}", key, e);
                self.store.remove(key)?;
                Ok(None)
            }
        }
    }

    /// Stores `payload` stamped with the current time, unless its serialized size exceeds `max_bytes`.
    pub fn write<T: Serialize>(&self, key: &str, payload: &T, max_bytes: Option<usize>) -> Result<PutOutcome, StoreError> {
        let raw = serde_json::to_string(&Envelope { timestamp: self.now(), payload })?;
        if let Some(limit) = max_bytes {
            if raw.len() > limit {
                log::warn!("Cache entry '{}' is {} bytes, over the {} byte cap", key, raw.len(), limit);
                self.store.remove(key)?;
                return Ok(PutOutcome::TooLarge { bytes: raw.len() });
            }
        }
        self.store.set(key, &raw)?;
        Ok(PutOutcome::Stored)
    }

    /// Reads an entry that never expires. Unreadable entries are removed.
    pub fn read_plain<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("Dropping unreadable entry '{}': {}", key, e);
                self.store.remove(key)?;
                Ok(None)
            }
        }
    }

    pub fn write_plain<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.store.set(key, &serde_json::to_string(value)?)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(key)
    }

    /// Removes stale or unreadable entries under the expiring keys. Returns how many went.
    pub fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = self.now();
        let mut evicted = 0;
        for key in EXPIRING_KEYS {
            let Some(raw) = self.store.get(key)? else {
                continue;
            };
            let keep = serde_json::from_str::<EnvelopeHeader>(&raw)
                .map(|header| is_fresh(header.timestamp, now))
                .unwrap_or(false);
            if !keep {
                self.store.remove(key)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::storage::MemoryStore;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn cache_at(start: i64) -> (TtlCache, Arc<AtomicI64>, Arc<MemoryStore>) {
        let now = Arc::new(AtomicI64::new(start));
        let store = Arc::new(MemoryStore::new());
        let clock_now = now.clone();
        let cache = TtlCache::with_clock(store.clone(), Arc::new(move || clock_now.load(Ordering::SeqCst)));
        (cache, now, store)
    }

    #[test]
    fn exactly_24h_old_is_stale() {
        assert!(is_fresh(0, TTL_MS - 1));
        assert!(!is_fresh(0, TTL_MS));
    }

    #[test]
    fn stale_entries_are_evicted_on_read() {
        let (cache, now, store) = cache_at(1_000);
        cache.write(DATA_CACHE_KEY, &vec![1, 2, 3], Some(MAX_CACHE_BYTES)).unwrap();

        now.store(1_000 + TTL_MS - 1, Ordering::SeqCst);
        assert_eq!(cache.read_fresh::<Vec<i32>>(DATA_CACHE_KEY).unwrap(), Some(vec![1, 2, 3]));

        now.store(1_000 + TTL_MS, Ordering::SeqCst);
        assert_eq!(cache.read_fresh::<Vec<i32>>(DATA_CACHE_KEY).unwrap(), None);
        assert_eq!(store.get(DATA_CACHE_KEY).unwrap(), None);
    }

    #[test]
    fn corrupt_entries_count_as_a_miss() {
        let (cache, _, store) = cache_at(0);
        store.set(QUERY_STATE_KEY, "{not json").unwrap();
        assert_eq!(cache.read_fresh::<serde_json::Value>(QUERY_STATE_KEY).unwrap(), None);
        assert_eq!(store.get(QUERY_STATE_KEY).unwrap(), None);
    }

    #[test]
    fn oversized_entries_replace_nothing() {
        let (cache, _, store) = cache_at(0);
        assert_eq!(cache.write(DATA_CACHE_KEY, &"small", Some(64)).unwrap(), PutOutcome::Stored);
        let outcome = cache.write(DATA_CACHE_KEY, &"x".repeat(100), Some(64)).unwrap();
        assert!(matches!(outcome, PutOutcome::TooLarge { bytes } if bytes > 64));
        assert_eq!(store.get(DATA_CACHE_KEY).unwrap(), None);
    }

    #[test]
    fn sweep_removes_only_expired_keys() {
        let (cache, now, store) = cache_at(0);
        cache.write(QUERY_STATE_KEY, &"old", None).unwrap();
        cache.write_plain(SELECTED_ITEMS_KEY, &"forever").unwrap();
        now.store(TTL_MS / 2, Ordering::SeqCst);
        cache.write(DATA_CACHE_KEY, &"new", None).unwrap();

        now.store(TTL_MS, Ordering::SeqCst);
        assert_eq!(cache.evict_expired().unwrap(), 1);
        assert_eq!(store.get(QUERY_STATE_KEY).unwrap(), None);
        assert!(store.get(DATA_CACHE_KEY).unwrap().is_some());
        assert_eq!(cache.read_plain::<String>(SELECTED_ITEMS_KEY).unwrap().as_deref(), Some("forever"));
    }
}
