//! Response cache shared by the resolver, graph analyzer and tracer.
//!
//! Values are opaque JSON blobs keyed by a normalized request string such as
//! `resolve:{workspace}:{name}:...`. Two implementations:
//! - [`TwoLevelCache`]: bounded in-memory level in front of an on-disk level
//! - [`NoopCache`]: used when caching is disabled
//!
//! Call sites go through [`typed`], which turns every cache failure into a
//! miss (reads) or a warning (writes).

pub mod disk;
pub mod error;
pub mod memory;
pub mod two_level;
pub mod typed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub use error::{CacheError, CacheResult};
pub use two_level::TwoLevelCache;

/// Eviction order in the memory level: lowest priority goes first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    /// Only removed by expiry or invalidation
    NeverRemove,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLevels {
    #[default]
    Both,
    MemoryOnly,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    /// `None` uses the coordinator's default TTL
    pub ttl: Option<Duration>,
    pub priority: Priority,
    pub levels: CacheLevels,
}

impl SetOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.levels = CacheLevels::MemoryOnly;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub priority: Priority,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
        priority: Priority,
    ) -> Self {
        let created_at = Utc::now();
        let absolute_expiration = ttl
            .and_then(|ttl| chrono::TimeDelta::from_std(ttl).ok())
            .and_then(|ttl| created_at.checked_add_signed(ttl));
        Self {
            key: key.into(),
            value,
            created_at,
            absolute_expiration,
            priority,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.absolute_expiration.is_some_and(|expires| now >= expires)
    }
}

/// Whether an invalidation call waits for removal to finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    /// Remove before returning
    #[default]
    Immediate,
    /// Remove in the background after the configured delay
    Delayed,
    /// Record a tombstone; applied on the next cache access
    Lazy,
}

impl FromStr for InvalidationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "delayed" => Ok(Self::Delayed),
            "lazy" => Ok(Self::Lazy),
            other => Err(format!("unknown invalidation strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub errors: u64,
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub disk_capacity_bytes: u64,
    pub pending_invalidations: usize,
    pub hit_ratio: f64,
}

impl CacheStatistics {
    pub fn lookups(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.misses
    }

    pub fn compute_hit_ratio(&mut self) {
        let lookups = self.lookups();
        self.hit_ratio = if lookups == 0 {
            0.0
        } else {
            (self.memory_hits + self.disk_hits) as f64 / lookups as f64
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHealth {
    pub score: u8,
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

fn usage(used: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        0.0
    } else {
        (used / capacity).clamp(0.0, 1.0)
    }
}

/// Advisory 0-100 score over hit ratio, level usage and invalidation backlog.
pub fn compute_health(stats: &CacheStatistics) -> CacheHealth {
    let hit_component = if stats.lookups() == 0 {
        50.0
    } else {
        50.0 * stats.hit_ratio
    };
    let memory_usage = usage(stats.memory_entries as f64, stats.memory_capacity as f64);
    let disk_usage = usage(stats.disk_bytes as f64, stats.disk_capacity_bytes as f64);
    let backlog = (stats.pending_invalidations as f64 / 100.0).min(1.0);

    let raw = hit_component + 20.0 * (1.0 - memory_usage) + 15.0 * (1.0 - disk_usage)
        + 15.0 * (1.0 - backlog);
    let score = raw.round().clamp(0.0, 100.0) as u8;

    let mut issues = Vec::new();
    if stats.lookups() > 0 && stats.hit_ratio < 0.5 {
        issues.push(format!("Low hit ratio: {:.0}%", stats.hit_ratio * 100.0));
    }
    if memory_usage > 0.9 {
        issues.push("Memory cache is near capacity".to_string());
    }
    if disk_usage > 0.9 {
        issues.push("Disk cache is near capacity".to_string());
    }
    if stats.pending_invalidations > 0 {
        issues.push(format!("{} invalidation(s) pending", stats.pending_invalidations));
    }
    if stats.errors > 0 {
        issues.push(format!("{} cache error(s) since start", stats.errors));
    }

    let status = match score {
        80..=100 => HealthStatus::Healthy,
        50..=79 => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    };

    CacheHealth {
        score,
        status,
        issues,
    }
}

#[async_trait]
pub trait CacheCoordinator: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value, options: SetOptions) -> CacheResult<()>;

    /// Returns entries removed; deferred strategies return 0.
    async fn invalidate(&self, keys: &[String], strategy: InvalidationStrategy) -> CacheResult<usize>;

    /// Glob over logical keys, e.g. `resolve:/repo:*`.
    async fn invalidate_by_pattern(
        &self,
        pattern: &str,
        strategy: InvalidationStrategy,
    ) -> CacheResult<usize>;

    async fn clear(&self) -> CacheResult<usize>;

    async fn statistics(&self) -> CacheStatistics;

    async fn health(&self) -> CacheHealth {
        compute_health(&self.statistics().await)
    }
}

/// Cache that stores nothing. Every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl CacheCoordinator for NoopCache {
    async fn get(&self, _key: &str) -> CacheResult<Option<serde_json::Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: serde_json::Value, _options: SetOptions) -> CacheResult<()> {
        Ok(())
    }

    async fn invalidate(&self, _keys: &[String], _strategy: InvalidationStrategy) -> CacheResult<usize> {
        Ok(0)
    }

    async fn invalidate_by_pattern(
        &self,
        pattern: &str,
        _strategy: InvalidationStrategy,
    ) -> CacheResult<usize> {
        glob::Pattern::new(pattern).map_err(|e| CacheError::invalid_pattern(pattern, e))?;
        Ok(0)
    }

    async fn clear(&self) -> CacheResult<usize> {
        Ok(0)
    }

    async fn statistics(&self) -> CacheStatistics {
        CacheStatistics::default()
    }

    async fn health(&self) -> CacheHealth {
        let mut health = compute_health(&CacheStatistics::default());
        health.issues.push("Caching is disabled".to_string());
        health
    }
}
