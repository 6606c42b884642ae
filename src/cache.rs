//! Short-lived session cache for resolved identity snapshots.
//!
//! Entries are stored as JSON `{value, written_at_millis}` in a
//! [`SessionStorage`] and are only valid while younger than the cache TTL.
//! Storage failures never surface: a failed read is a miss and a failed
//! write is a no-op, because every cached value can be re-derived from the
//! ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::chain::{Address, normalize_address};
use crate::error::StorageError;

/// Ephemeral string key/value storage, cleared wholesale on logout.
pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Process-local session storage with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size of keys plus values.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
                + key.len()
                + value.len();
            if used > quota {
                return Err(StorageError::QuotaExceeded { used, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.lock().clear();
        Ok(())
    }
}

/// Millisecond wall clock used to stamp and expire entries.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-advanced clock for expiry tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(i64::try_from(by.as_millis()).unwrap_or(i64::MAX), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    value: T,
    written_at_millis: i64,
}

/// TTL cache over session storage.
pub struct SessionCache {
    storage: Arc<dyn SessionStorage>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(storage: Arc<dyn SessionStorage>, ttl: Duration) -> Self {
        Self::with_clock(storage, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn SessionStorage>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value for `key`, or `None` if absent, expired or unreadable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.storage.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "session cache read failed; treating as miss");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(key, error = %e, "session cache entry unreadable; treating as miss");
                return None;
            }
        };

        let age = self.clock.now_millis().saturating_sub(entry.written_at_millis);
        let ttl = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if age < 0 || age >= ttl {
            tracing::debug!(key, age_ms = age, "session cache entry expired");
            return None;
        }
        Some(entry.value)
    }

    /// Store `value` under `key`, stamped with the current time.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let entry = CacheEntry {
            value,
            written_at_millis: self.clock.now_millis(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "session cache value not serializable; skipping");
                return;
            }
        };
        if let Err(e) = self.storage.set_item(key, &raw) {
            tracing::warn!(key, error = %e, "session cache write failed; skipping");
        }
    }

    /// Drop every entry. Called once during logout.
    pub fn invalidate_all(&self) {
        if let Err(e) = self.storage.clear() {
            tracing::warn!(error = %e, "session cache clear failed");
        }
    }
}

/// Cache key for an identity status snapshot.
pub fn status_key(address: &Address) -> String {
    format!("identity-status:{}", normalize_address(address))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStorage;

    impl SessionStorage for BrokenStorage {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }

        fn clear(&self) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }
    }

    fn cache(ttl: Duration) -> (SessionCache, Arc<MemorySessionStorage>, Arc<ManualClock>) {
        let storage = Arc::new(MemorySessionStorage::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = SessionCache::with_clock(storage.clone(), ttl, clock.clone());
        (cache, storage, clock)
    }

    #[test]
    fn set_then_get_returns_value() {
        let (cache, _, _) = cache(Duration::from_secs(30));
        cache.set("role", &"inspector".to_string());
        assert_eq!(cache.get::<String>("role").as_deref(), Some("inspector"));
        assert_eq!(cache.get::<String>("absent"), None);
    }

    #[test]
    fn expired_entry_is_a_miss_while_still_stored() {
        let (cache, storage, clock) = cache(Duration::from_secs(30));
        cache.set("flags", &vec![true, false]);

        clock.advance(Duration::from_millis(29_999));
        assert_eq!(cache.get::<Vec<bool>>("flags"), Some(vec![true, false]));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get::<Vec<bool>>("flags"), None);
        assert!(storage.contains_key("flags"));
    }

    #[test]
    fn invalidate_all_clears_storage() {
        let (cache, storage, _) = cache(Duration::from_secs(30));
        cache.set("a", &1u32);
        cache.set("b", &2u32);
        cache.invalidate_all();
        assert!(storage.is_empty());
        assert_eq!(cache.get::<u32>("a"), None);
    }

    #[test]
    fn storage_failures_are_silent() {
        let cache = SessionCache::new(Arc::new(BrokenStorage), Duration::from_secs(30));
        cache.set("key", &"value");
        assert_eq!(cache.get::<String>("key"), None);
        cache.invalidate_all();
    }

    #[test]
    fn quota_overflow_is_a_no_op() {
        let storage = Arc::new(MemorySessionStorage::with_quota(64));
        let cache = SessionCache::new(storage.clone(), Duration::from_secs(30));
        cache.set("big", &"x".repeat(128));
        assert_eq!(cache.get::<String>("big"), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn wrong_shape_is_a_miss() {
        let (cache, _, _) = cache(Duration::from_secs(30));
        cache.set("n", &"not a number");
        assert_eq!(cache.get::<u64>("n"), None);
    }

    #[test]
    fn status_key_is_case_normalized() {
        let upper: Address = "0x52908400098527886E0F7030069857D2E4169EE7".parse().unwrap();
        assert_eq!(
            status_key(&upper),
            "identity-status:0x52908400098527886e0f7030069857d2e4169ee7"
        );
    }
}
