use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use profilematch_logging::{pm_debug, pm_warn};

use crate::{Clock, MemoryStorage, Storage, SystemClock};

/// Prefix that keeps cache entries apart from other data in the same medium.
pub const DEFAULT_NAMESPACE: &str = "profilematch_cache_";
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub namespace: String,
    pub default_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Serialize)]
struct EntryRef<'a, T> {
    value: &'a T,
    /// Unix millis after which the entry reads as absent.
    expiry: i64,
}

#[derive(Deserialize)]
struct Entry {
    value: Value,
    expiry: i64,
}

/// Key/value cache with per-entry TTL over a shared [`Storage`] medium.
///
/// Expiry is lazy: stale entries are deleted when read, never in the
/// background. The cache never fails its caller; medium and decode errors are
/// logged and read as misses. Concurrent misses on one key are not
/// coalesced, each one runs its producer.
#[derive(Clone)]
pub struct ExpiringCache {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
}

impl ExpiringCache {
    pub fn new(storage: Arc<dyn Storage>, settings: CacheSettings) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock), settings)
    }

    pub fn with_clock(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            storage,
            clock,
            settings,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), CacheSettings::default())
    }

    pub fn namespace(&self) -> &str {
        &self.settings.namespace
    }

    pub fn default_ttl(&self) -> Duration {
        self.settings.default_ttl
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.namespace, key)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        self.set_with_ttl(key, value, self.settings.default_ttl);
    }

    pub fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = EntryRef {
            value,
            expiry: self.clock.now_millis().saturating_add(ttl_millis),
        };
        let text = match serde_json::to_string(&entry) {
            Ok(text) => text,
            Err(err) => {
                pm_warn!("Failed to serialize cache entry {}: {}", key, err);
                return;
            }
        };
        if let Err(err) = self.storage.set_item(&self.storage_key(key), &text) {
            pm_warn!("Failed to set cache {}: {}", key, err);
        }
    }

    /// Fresh value for `key`, or `None` when missing, expired or undecodable.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.fresh_value(key)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(err) => {
                pm_warn!("Cached value for {} has unexpected shape: {}", key, err);
                None
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.fresh_value(key).is_some()
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = self.storage.remove_item(&self.storage_key(key)) {
            pm_warn!("Failed to remove cache {}: {}", key, err);
        }
    }

    /// Remove every entry in this cache's namespace and nothing else.
    pub fn clear(&self) {
        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(err) => {
                pm_warn!("Failed to clear cache: {}", err);
                return;
            }
        };
        for storage_key in keys
            .iter()
            .filter(|k| k.starts_with(&self.settings.namespace))
        {
            if let Err(err) = self.storage.remove_item(storage_key) {
                pm_warn!("Failed to clear cache entry {}: {}", storage_key, err);
            }
        }
    }

    /// Keys (without namespace) currently stored, fresh or not.
    pub fn keys(&self) -> Vec<String> {
        match self.storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| {
                    k.strip_prefix(self.settings.namespace.as_str())
                        .map(str::to_string)
                })
                .collect(),
            Err(err) => {
                pm_warn!("Failed to list cache keys: {}", err);
                Vec::new()
            }
        }
    }

    /// Cached value if fresh, otherwise the producer's value (stored on success).
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(key) {
            pm_debug!("Cache hit {}", key);
            return Ok(cached);
        }
        pm_debug!("Cache miss {}", key);
        let value = producer().await?;
        self.set_with_ttl(key, &value, ttl);
        Ok(value)
    }

    fn fresh_value(&self, key: &str) -> Option<Value> {
        let text = match self.storage.get_item(&self.storage_key(key)) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(err) => {
                pm_warn!("Failed to get cache {}: {}", key, err);
                return None;
            }
        };
        let entry: Entry = match serde_json::from_str(&text) {
            Ok(entry) => entry,
            Err(err) => {
                pm_warn!("Failed to decode cache entry {}: {}", key, err);
                return None;
            }
        };
        if self.clock.now_millis() > entry.expiry {
            pm_debug!("Cache entry {} expired", key);
            self.remove(key);
            return None;
        }
        Some(entry.value)
    }
}
