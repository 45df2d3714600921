//! Typed access to the cache for request handlers.
//!
//! Failures never reach the caller: an unreadable or undecodable entry is a
//! miss, and a failed write is logged.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{CacheCoordinator, SetOptions};

pub async fn get_typed<T: DeserializeOwned>(cache: &dyn CacheCoordinator, key: &str) -> Option<T> {
    let value = match cache.get(key).await {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(target: "cache", "read failed for '{key}', treating as miss: {e}");
            return None;
        }
    };

    match serde_json::from_value(value) {
        Ok(decoded) => {
            tracing::debug!(target: "cache", "hit: {key}");
            Some(decoded)
        }
        Err(e) => {
            tracing::warn!(target: "cache", "stale entry shape for '{key}', treating as miss: {e}");
            None
        }
    }
}

pub async fn set_typed<T: Serialize + ?Sized>(
    cache: &dyn CacheCoordinator,
    key: &str,
    value: &T,
    options: SetOptions,
) {
    let value = match serde_json::to_value(value) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(target: "cache", "could not encode '{key}': {e}");
            return;
        }
    };
    if let Err(e) = cache.set(key, value, options).await {
        tracing::warn!(target: "cache", "write failed for '{key}': {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, CacheHealth, CacheResult, CacheStatistics, InvalidationStrategy, TwoLevelCache};
    use async_trait::async_trait;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: usize,
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheCoordinator for BrokenCache {
        async fn get(&self, _key: &str) -> CacheResult<Option<serde_json::Value>> {
            Err(CacheError::Io(std::io::Error::other("disk gone")))
        }
        async fn set(&self, _key: &str, _value: serde_json::Value, _options: SetOptions) -> CacheResult<()> {
            Err(CacheError::Io(std::io::Error::other("disk gone")))
        }
        async fn invalidate(&self, _keys: &[String], _strategy: InvalidationStrategy) -> CacheResult<usize> {
            Ok(0)
        }
        async fn invalidate_by_pattern(&self, _pattern: &str, _strategy: InvalidationStrategy) -> CacheResult<usize> {
            Ok(0)
        }
        async fn clear(&self) -> CacheResult<usize> {
            Ok(0)
        }
        async fn statistics(&self) -> CacheStatistics {
            CacheStatistics::default()
        }
        async fn health(&self) -> CacheHealth {
            crate::cache::compute_health(&CacheStatistics::default())
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_cache() {
        let cache = TwoLevelCache::in_memory(4, None);
        let payload = Payload {
            name: "UserService".to_string(),
            count: 3,
        };
        set_typed(&cache, "k", &payload, SetOptions::default()).await;
        assert_eq!(get_typed::<Payload>(&cache, "k").await, Some(payload));
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_a_miss() {
        let cache = TwoLevelCache::in_memory(4, None);
        set_typed(&cache, "k", &vec![1, 2, 3], SetOptions::default()).await;
        assert_eq!(get_typed::<Payload>(&cache, "k").await, None);
    }

    #[tokio::test]
    async fn test_cache_failures_are_absorbed() {
        let cache = BrokenCache;
        set_typed(&cache, "k", &1, SetOptions::default()).await;
        assert_eq!(get_typed::<i32>(&cache, "k").await, None);
    }
}
