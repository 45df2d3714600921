//! Bounded in-memory cache level.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{CacheEntry, Priority};

#[derive(Debug)]
pub struct MemoryLevel {
    capacity: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryLevel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Live entry for `key`; an expired entry is dropped and reported as absent.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.clone()),
            None => None,
        }
    }

    /// Insert or replace; returns how many entries were evicted to make room.
    pub fn insert(&self, entry: CacheEntry) -> usize {
        self.insert_if(entry, || true).unwrap_or(0)
    }

    /// Like [`insert`](Self::insert), but only when `admit` holds while the
    /// level is locked. Returns `None` when the entry was refused.
    pub fn insert_if(&self, entry: CacheEntry, admit: impl FnOnce() -> bool) -> Option<usize> {
        let mut entries = self.entries.lock();
        if !admit() {
            return None;
        }
        let mut evicted = 0;

        if !entries.contains_key(&entry.key) {
            let now = Utc::now();
            let before = entries.len();
            entries.retain(|_, existing| !existing.is_expired(now));
            evicted += before - entries.len();

            while entries.len() >= self.capacity {
                // Lowest priority first, oldest within a priority
                let victim = entries
                    .values()
                    .filter(|e| e.priority != Priority::NeverRemove)
                    .min_by(|a, b| {
                        a.priority
                            .cmp(&b.priority)
                            .then_with(|| a.created_at.cmp(&b.created_at))
                    })
                    .map(|e| e.key.clone());

                match victim {
                    Some(key) => {
                        entries.remove(&key);
                        evicted += 1;
                    }
                    None => {
                        tracing::debug!(target: "cache", "memory level full of pinned entries, growing past capacity");
                        break;
                    }
                }
            }
        }

        entries.insert(entry.key.clone(), entry);
        Some(evicted)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Removes every entry whose key matches; returns the removed keys.
    pub fn remove_matching(&self, pattern: &glob::Pattern) -> Vec<String> {
        let mut entries = self.entries.lock();
        let keys: Vec<String> = entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        keys
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(key: &str, priority: Priority) -> CacheEntry {
        CacheEntry::new(key, serde_json::json!(key), None, priority)
    }

    #[test]
    fn test_evicts_lowest_priority_then_oldest() {
        let level = MemoryLevel::new(3);
        level.insert(entry("normal-old", Priority::Normal));
        std::thread::sleep(Duration::from_millis(2));
        level.insert(entry("low", Priority::Low));
        std::thread::sleep(Duration::from_millis(2));
        level.insert(entry("normal-new", Priority::Normal));

        assert_eq!(level.insert(entry("a", Priority::High)), 1);
        assert!(level.get("low", Utc::now()).is_none());

        assert_eq!(level.insert(entry("b", Priority::High)), 1);
        assert!(level.get("normal-old", Utc::now()).is_none());
        assert!(level.get("normal-new", Utc::now()).is_some());
        assert_eq!(level.len(), 3);
    }

    #[test]
    fn test_pinned_entries_are_never_evicted() {
        let level = MemoryLevel::new(1);
        level.insert(entry("pinned", Priority::NeverRemove));
        assert_eq!(level.insert(entry("other", Priority::High)), 0);
        assert!(level.get("pinned", Utc::now()).is_some());
        assert_eq!(level.len(), 2);
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let level = MemoryLevel::new(1);
        level.insert(entry("k", Priority::Normal));
        assert_eq!(level.insert(entry("k", Priority::Normal)), 0);
        assert_eq!(level.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let level = MemoryLevel::new(4);
        level.insert(CacheEntry::new(
            "short",
            serde_json::json!(1),
            Some(Duration::from_millis(1)),
            Priority::Normal,
        ));
        let later = Utc::now() + chrono::TimeDelta::seconds(1);
        assert!(level.get("short", later).is_none());
        assert!(level.is_empty());
    }

    #[test]
    fn test_remove_matching() {
        let level = MemoryLevel::new(10);
        level.insert(entry("resolve:/a:Foo", Priority::Normal));
        level.insert(entry("resolve:/b:Foo", Priority::Normal));
        level.insert(entry("trace:/a:Foo", Priority::Normal));

        let pattern = glob::Pattern::new("resolve:*").unwrap();
        let mut removed = level.remove_matching(&pattern);
        removed.sort();
        assert_eq!(removed, vec!["resolve:/a:Foo", "resolve:/b:Foo"]);
        assert_eq!(level.len(), 1);
    }
}
