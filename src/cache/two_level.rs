//! Memory level in front of an optional disk level.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use super::disk::DiskLevel;
use super::memory::MemoryLevel;
use super::{
    CacheCoordinator, CacheEntry, CacheError, CacheLevels, CacheResult, CacheStatistics,
    InvalidationStrategy, SetOptions,
};
use crate::config::CacheConfig;

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Invalidations recorded by the lazy strategy, applied on next access.
#[derive(Debug, Default)]
struct Tombstones {
    keys: HashSet<String>,
    patterns: Vec<glob::Pattern>,
}

impl Tombstones {
    fn len(&self) -> usize {
        self.keys.len() + self.patterns.len()
    }
}

#[derive(Debug)]
enum DelayedWork {
    Keys(Vec<String>),
    Pattern(glob::Pattern),
}

impl DelayedWork {
    fn units(&self) -> usize {
        match self {
            Self::Keys(keys) => keys.len(),
            Self::Pattern(_) => 1,
        }
    }
}

#[derive(Debug)]
struct Inner {
    memory: MemoryLevel,
    disk: Option<DiskLevel>,
    default_ttl: Option<Duration>,
    counters: Counters,
    tombstones: Mutex<Tombstones>,
    /// Delayed invalidations scheduled but not yet applied
    delayed_pending: AtomicUsize,
    /// Bumped before invalidation or clear removes anything. A read or write
    /// that saw an older value must not put its entry into memory.
    generation: AtomicU64,
}

impl Inner {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Insert into memory unless an invalidation ran since `seen`.
    fn admit(&self, entry: CacheEntry, seen: u64) {
        match self.memory.insert_if(entry, || self.generation() == seen) {
            Some(evicted) => Counters::bump(&self.counters.evictions, evicted as u64),
            None => tracing::debug!(target: "cache", "entry skipped memory after a concurrent invalidation"),
        }
    }

    async fn remove_keys(&self, keys: &[String]) -> CacheResult<usize> {
        self.bump_generation();
        let mut removed = 0;
        for key in keys {
            let in_memory = self.memory.remove(key);
            let on_disk = match &self.disk {
                Some(disk) => disk.remove(key).await?,
                None => false,
            };
            if in_memory || on_disk {
                removed += 1;
            }
        }
        Counters::bump(&self.counters.invalidations, removed as u64);
        Ok(removed)
    }

    async fn remove_pattern(&self, pattern: &glob::Pattern) -> CacheResult<usize> {
        self.bump_generation();
        let mut keys: HashSet<String> = self.memory.remove_matching(pattern).into_iter().collect();
        if let Some(disk) = &self.disk {
            keys.extend(disk.remove_matching(pattern).await?);
        }
        Counters::bump(&self.counters.invalidations, keys.len() as u64);
        Ok(keys.len())
    }

    async fn apply_tombstones(&self) -> CacheResult<()> {
        let pending = {
            let mut tombstones = self.tombstones.lock();
            if tombstones.len() == 0 {
                return Ok(());
            }
            std::mem::take(&mut *tombstones)
        };

        let keys: Vec<String> = pending.keys.into_iter().collect();
        self.remove_keys(&keys).await?;
        for pattern in &pending.patterns {
            self.remove_pattern(pattern).await?;
        }
        tracing::debug!(target: "cache", "applied {} lazy invalidation(s)", keys.len() + pending.patterns.len());
        Ok(())
    }

    fn record_error(&self, err: &CacheError) {
        Counters::bump(&self.counters.errors, 1);
        tracing::warn!(target: "cache", "disk level error: {err}");
    }
}

/// Two-level response cache.
///
/// `get` checks memory, then disk, promoting disk hits into memory. `set`
/// writes both levels unless the caller asks for memory only.
#[derive(Debug, Clone)]
pub struct TwoLevelCache {
    inner: Arc<Inner>,
    delay: Duration,
}

impl TwoLevelCache {
    /// Memory-only cache.
    pub fn in_memory(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self::build(MemoryLevel::new(capacity), None, default_ttl, Duration::from_millis(500))
    }

    /// Memory level backed by a disk level at `dir`.
    pub async fn with_disk(
        capacity: usize,
        dir: impl Into<PathBuf>,
        disk_capacity_bytes: u64,
        default_ttl: Option<Duration>,
    ) -> CacheResult<Self> {
        let disk = DiskLevel::open(dir, disk_capacity_bytes).await?;
        Ok(Self::build(
            MemoryLevel::new(capacity),
            Some(disk),
            default_ttl,
            Duration::from_millis(500),
        ))
    }

    /// Build from configuration; `disk_dir` is the resolved disk cache path.
    pub async fn from_config(config: &CacheConfig, disk_dir: PathBuf) -> CacheResult<Self> {
        if !config.enabled {
            return Err(CacheError::Disabled);
        }
        let ttl = (config.default_ttl_secs > 0).then(|| Duration::from_secs(config.default_ttl_secs));
        let disk = if config.disk_enabled {
            Some(DiskLevel::open(disk_dir, config.disk_capacity_bytes).await?)
        } else {
            None
        };
        Ok(Self::build(
            MemoryLevel::new(config.memory_capacity),
            disk,
            ttl,
            Duration::from_millis(config.delayed_invalidation_ms),
        ))
    }

    fn build(
        memory: MemoryLevel,
        disk: Option<DiskLevel>,
        default_ttl: Option<Duration>,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory,
                disk,
                default_ttl,
                counters: Counters::default(),
                tombstones: Mutex::new(Tombstones::default()),
                delayed_pending: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
            }),
            delay,
        }
    }

    /// Delay used by [`InvalidationStrategy::Delayed`].
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn has_disk(&self) -> bool {
        self.inner.disk.is_some()
    }

    fn pending(&self) -> usize {
        self.inner.tombstones.lock().len() + self.inner.delayed_pending.load(Ordering::Relaxed)
    }

    async fn apply_tombstones(&self) {
        if let Err(e) = self.inner.apply_tombstones().await {
            self.inner.record_error(&e);
        }
    }

    fn schedule(&self, work: DelayedWork) {
        let inner = Arc::clone(&self.inner);
        let delay = self.delay;
        let units = work.units();
        inner.delayed_pending.fetch_add(units, Ordering::Relaxed);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = match &work {
                DelayedWork::Keys(keys) => inner.remove_keys(keys).await,
                DelayedWork::Pattern(pattern) => inner.remove_pattern(pattern).await,
            };
            match result {
                Ok(removed) => {
                    tracing::debug!(target: "cache", "delayed invalidation removed {removed} entr(y/ies)")
                }
                Err(e) => inner.record_error(&e),
            }
            inner.delayed_pending.fetch_sub(units, Ordering::Relaxed);
        });
    }
}

#[async_trait]
impl CacheCoordinator for TwoLevelCache {
    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>> {
        self.apply_tombstones().await;
        let generation = self.inner.generation();
        let now = Utc::now();
        let counters = &self.inner.counters;

        if let Some(entry) = self.inner.memory.get(key, now) {
            Counters::bump(&counters.memory_hits, 1);
            return Ok(Some(entry.value));
        }

        let Some(disk) = &self.inner.disk else {
            Counters::bump(&counters.misses, 1);
            return Ok(None);
        };

        match disk.get(key, now).await {
            Ok(Some(entry)) => {
                Counters::bump(&counters.disk_hits, 1);
                let value = entry.value.clone();
                self.inner.admit(entry, generation);
                Ok(Some(value))
            }
            Ok(None) => {
                Counters::bump(&counters.misses, 1);
                Ok(None)
            }
            Err(e) => {
                Counters::bump(&counters.misses, 1);
                self.inner.record_error(&e);
                Err(e)
            }
        }
    }

    async fn set(&self, key: &str, value: serde_json::Value, options: SetOptions) -> CacheResult<()> {
        self.apply_tombstones().await;
        let generation = self.inner.generation();
        let counters = &self.inner.counters;
        let entry = CacheEntry::new(
            key,
            value,
            options.ttl.or(self.inner.default_ttl),
            options.priority,
        );

        let disk = match options.levels {
            CacheLevels::Both => self.inner.disk.as_ref(),
            CacheLevels::MemoryOnly => None,
        };
        if let Some(disk) = disk {
            match disk.put(&entry).await {
                Ok(evicted) => Counters::bump(&counters.evictions, evicted as u64),
                Err(e) => {
                    // Memory still gets the value; the caller only logs the failure
                    self.inner.record_error(&e);
                    self.inner.admit(entry, generation);
                    return Err(e);
                }
            }
        }

        self.inner.admit(entry, generation);
        Counters::bump(&counters.sets, 1);
        Ok(())
    }

    async fn invalidate(&self, keys: &[String], strategy: InvalidationStrategy) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        match strategy {
            InvalidationStrategy::Immediate => {
                self.apply_tombstones().await;
                self.inner.remove_keys(keys).await
            }
            InvalidationStrategy::Delayed => {
                self.schedule(DelayedWork::Keys(keys.to_vec()));
                Ok(0)
            }
            InvalidationStrategy::Lazy => {
                self.inner.tombstones.lock().keys.extend(keys.iter().cloned());
                Ok(0)
            }
        }
    }

    async fn invalidate_by_pattern(
        &self,
        pattern: &str,
        strategy: InvalidationStrategy,
    ) -> CacheResult<usize> {
        let compiled =
            glob::Pattern::new(pattern).map_err(|e| CacheError::invalid_pattern(pattern, e))?;
        match strategy {
            InvalidationStrategy::Immediate => {
                self.apply_tombstones().await;
                self.inner.remove_pattern(&compiled).await
            }
            InvalidationStrategy::Delayed => {
                self.schedule(DelayedWork::Pattern(compiled));
                Ok(0)
            }
            InvalidationStrategy::Lazy => {
                self.inner.tombstones.lock().patterns.push(compiled);
                Ok(0)
            }
        }
    }

    async fn clear(&self) -> CacheResult<usize> {
        *self.inner.tombstones.lock() = Tombstones::default();
        self.inner.bump_generation();
        let mut removed = self.inner.memory.clear();
        if let Some(disk) = &self.inner.disk {
            removed += disk.clear().await?;
        }
        tracing::info!(target: "cache", "cleared {removed} entr(y/ies)");
        Ok(removed)
    }

    async fn statistics(&self) -> CacheStatistics {
        let counters = &self.inner.counters;
        let (disk_usage, disk_capacity_bytes) = match &self.inner.disk {
            Some(disk) => match disk.usage().await {
                Ok(usage) => (usage, disk.capacity_bytes()),
                Err(e) => {
                    self.inner.record_error(&e);
                    (Default::default(), disk.capacity_bytes())
                }
            },
            None => (Default::default(), 0),
        };

        let mut stats = CacheStatistics {
            memory_hits: counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: counters.disk_hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            sets: counters.sets.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            invalidations: counters.invalidations.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            memory_entries: self.inner.memory.len(),
            memory_capacity: self.inner.memory.capacity(),
            disk_entries: disk_usage.entries,
            disk_bytes: disk_usage.bytes,
            disk_capacity_bytes,
            pending_invalidations: self.pending(),
            hit_ratio: 0.0,
        };
        stats.compute_hit_ratio();
        stats
    }
}
