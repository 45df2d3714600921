use std::sync::Arc;

use codesearch::cache::HealthStatus;
use codesearch::{CacheCoordinator, InvalidationStrategy, SetOptions, TwoLevelCache};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn disk_level_survives_a_new_instance() {
    let temp = TempDir::new().unwrap();
    {
        let cache = TwoLevelCache::with_disk(16, temp.path(), 1 << 20, None).await.unwrap();
        cache
            .set("resolve:ws:UserService", json!({"candidates": 3}), SetOptions::default())
            .await
            .unwrap();
    }

    let reopened = TwoLevelCache::with_disk(16, temp.path(), 1 << 20, None).await.unwrap();
    assert_eq!(
        reopened.get("resolve:ws:UserService").await.unwrap(),
        Some(json!({"candidates": 3}))
    );
    // Promoted on the first read
    reopened.get("resolve:ws:UserService").await.unwrap();
    let stats = reopened.statistics().await;
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.memory_hits, 1);
    assert_eq!(stats.memory_entries, 1);
}

#[tokio::test]
async fn invalidated_keys_miss_on_both_levels() {
    let temp = TempDir::new().unwrap();
    let cache = TwoLevelCache::with_disk(16, temp.path(), 1 << 20, None).await.unwrap();
    cache.set("graph:ws:A", json!(1), SetOptions::default()).await.unwrap();

    let removed = cache
        .invalidate(&["graph:ws:A".to_string()], InvalidationStrategy::Immediate)
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(cache.get("graph:ws:A").await.unwrap().is_none());
    assert_eq!(cache.statistics().await.disk_entries, 0);
}

#[tokio::test]
async fn pattern_invalidation_is_scoped_to_matching_keys() {
    let temp = TempDir::new().unwrap();
    let cache = TwoLevelCache::with_disk(16, temp.path(), 1 << 20, None).await.unwrap();
    for key in [
        "resolve:/repo:UserService",
        "resolve:/repo:OrderService",
        "resolve:/other:UserService",
        "trace:/repo:UserService:up:3:false",
    ] {
        cache.set(key, json!(key), SetOptions::default()).await.unwrap();
    }

    let removed = cache
        .invalidate_by_pattern("resolve:/repo:*", InvalidationStrategy::Immediate)
        .await
        .unwrap();

    assert_eq!(removed, 2);
    assert!(cache.get("resolve:/repo:UserService").await.unwrap().is_none());
    assert!(cache.get("resolve:/other:UserService").await.unwrap().is_some());
    assert!(cache.get("trace:/repo:UserService:up:3:false").await.unwrap().is_some());
    assert_eq!(cache.statistics().await.invalidations, 2);
}

#[tokio::test]
async fn memory_level_evicts_lowest_priority_first() {
    use codesearch::cache::Priority;

    let cache = TwoLevelCache::in_memory(2, None);
    cache
        .set("pinned", json!(1), SetOptions::default().priority(Priority::High))
        .await
        .unwrap();
    cache
        .set("cheap", json!(2), SetOptions::default().priority(Priority::Low))
        .await
        .unwrap();
    cache.set("new", json!(3), SetOptions::default()).await.unwrap();

    assert!(cache.get("cheap").await.unwrap().is_none());
    assert!(cache.get("pinned").await.unwrap().is_some());
    assert!(cache.get("new").await.unwrap().is_some());
    assert_eq!(cache.statistics().await.evictions, 1);
}

#[tokio::test]
async fn clear_empties_the_cache() {
    let cache = TwoLevelCache::in_memory(16, None);
    cache.set("a", json!(1), SetOptions::default()).await.unwrap();
    cache.set("b", json!(2), SetOptions::default()).await.unwrap();

    assert_eq!(cache.clear().await.unwrap(), 2);
    assert!(cache.get("a").await.unwrap().is_none());
    assert_eq!(cache.statistics().await.memory_entries, 0);
}

#[tokio::test]
async fn health_tracks_hit_ratio() {
    let cache = TwoLevelCache::in_memory(100, None);
    let fresh = cache.health().await;
    assert_eq!(fresh.score, 100);
    assert_eq!(fresh.status, HealthStatus::Healthy);
    assert!(fresh.issues.is_empty());

    for i in 0..10 {
        cache.get(&format!("missing:{i}")).await.unwrap();
    }
    let cold = cache.health().await;
    assert!(cold.score < fresh.score);
    assert!(cold.issues.iter().any(|issue| issue.starts_with("Low hit ratio")));
    assert_eq!(cache.statistics().await.hit_ratio, 0.0);
}

#[tokio::test]
async fn concurrent_writers_and_readers() {
    let temp = TempDir::new().unwrap();
    let cache = Arc::new(TwoLevelCache::with_disk(64, temp.path(), 1 << 20, None).await.unwrap());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..16 {
        let cache = Arc::clone(&cache);
        tasks.spawn(async move {
            let key = format!("resolve:ws:Symbol{i}");
            cache.set(&key, json!(i), SetOptions::default()).await.unwrap();
            cache.get(&key).await.unwrap()
        });
    }

    let mut values = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        values.push(joined.unwrap().unwrap());
    }
    assert_eq!(values.len(), 16);

    let stats = cache.statistics().await;
    assert_eq!(stats.sets, 16);
    assert_eq!(stats.disk_entries, 16);
}
