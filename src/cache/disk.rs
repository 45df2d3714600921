//! On-disk cache level.
//!
//! One JSON file per entry, named by the SHA-256 of the logical key. The
//! file carries the full [`CacheEntry`], key included, so pattern
//! invalidation can match logical keys without a separate manifest. When the
//! directory grows past its byte budget the oldest files are removed first.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{CacheEntry, CacheResult};

const EXTENSION: &str = "json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct DiskLevel {
    dir: PathBuf,
    capacity_bytes: u64,
    /// Serializes writers so capacity enforcement sees a stable directory
    write_lock: tokio::sync::Mutex<()>,
}

fn file_name(key: &str) -> String {
    format!("{:x}.{EXTENSION}", Sha256::digest(key.as_bytes()))
}

async fn remove_file_if_present(path: &Path) -> CacheResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl DiskLevel {
    /// Create the cache directory if needed.
    pub async fn open(dir: impl Into<PathBuf>, capacity_bytes: u64) -> CacheResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            capacity_bytes,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key))
    }

    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> CacheResult<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        if entry.key != key {
            return Ok(None);
        }
        if entry.is_expired(now) {
            remove_file_if_present(&path).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Write `entry`, then trim the directory to the byte budget.
    ///
    /// Returns the number of files evicted.
    pub async fn put(&self, entry: &CacheEntry) -> CacheResult<usize> {
        let _guard = self.write_lock.lock().await;

        let path = self.path_for(&entry.key);
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(entry)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        self.enforce_capacity(&path).await
    }

    async fn enforce_capacity(&self, just_written: &Path) -> CacheResult<usize> {
        let mut files = self.list_files().await?;
        let mut total: u64 = files.iter().map(|(_, size, _)| size).sum();
        if total <= self.capacity_bytes {
            return Ok(0);
        }

        files.sort_by(|a, b| a.2.cmp(&b.2));
        let mut evicted = 0;
        for (path, size, _) in files {
            if total <= self.capacity_bytes {
                break;
            }
            if path == just_written {
                continue;
            }
            if remove_file_if_present(&path).await? {
                total = total.saturating_sub(size);
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// `(path, size, modified)` for every entry file.
    async fn list_files(&self) -> CacheResult<Vec<(PathBuf, u64, SystemTime)>> {
        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let metadata = match item.metadata().await {
                Ok(metadata) => metadata,
                // Removed concurrently
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, metadata.len(), modified));
        }
        Ok(files)
    }

    pub async fn remove(&self, key: &str) -> CacheResult<bool> {
        remove_file_if_present(&self.path_for(key)).await
    }

    /// Removes entries whose logical key matches; returns the removed keys.
    ///
    /// Unreadable files are skipped rather than failing the sweep.
    pub async fn remove_matching(&self, pattern: &glob::Pattern) -> CacheResult<Vec<String>> {
        let mut removed = Vec::new();
        for (path, _, _) in self.list_files().await? {
            let entry: CacheEntry = match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!(target: "cache", "skipping unreadable entry {}: {e}", path.display());
                        continue;
                    }
                },
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if pattern.matches(&entry.key) && remove_file_if_present(&path).await? {
                removed.push(entry.key);
            }
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> CacheResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for (path, _, _) in self.list_files().await? {
            if remove_file_if_present(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn usage(&self) -> CacheResult<DiskUsage> {
        let files = self.list_files().await?;
        Ok(DiskUsage {
            entries: files.len(),
            bytes: files.iter().map(|(_, size, _)| size).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Priority;
    use std::time::Duration;
    use tempfile::TempDir;

    fn entry(key: &str, value: serde_json::Value) -> CacheEntry {
        CacheEntry::new(key, value, Some(Duration::from_secs(60)), Priority::Normal)
    }

    #[test]
    fn test_file_name_is_stable_hex() {
        let name = file_name("resolve:/repo:Foo");
        assert_eq!(name, file_name("resolve:/repo:Foo"));
        assert_ne!(name, file_name("resolve:/repo:Bar"));
        assert_eq!(name.len(), 64 + 1 + EXTENSION.len());
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let temp = TempDir::new().unwrap();
        let level = DiskLevel::open(temp.path().join("cache"), 1 << 20).await.unwrap();

        level.put(&entry("k1", serde_json::json!({"a": 1}))).await.unwrap();
        let loaded = level.get("k1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(loaded.value, serde_json::json!({"a": 1}));

        assert!(level.remove("k1").await.unwrap());
        assert!(!level.remove("k1").await.unwrap());
        assert!(level.get("k1", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed_on_read() {
        let temp = TempDir::new().unwrap();
        let level = DiskLevel::open(temp.path(), 1 << 20).await.unwrap();
        level.put(&entry("k", serde_json::json!(1))).await.unwrap();

        let later = Utc::now() + chrono::TimeDelta::minutes(5);
        assert!(level.get("k", later).await.unwrap().is_none());
        assert_eq!(level.usage().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_files() {
        let temp = TempDir::new().unwrap();
        let payload = serde_json::json!("x".repeat(200));
        let one_entry = serde_json::to_vec(&entry("k0", payload.clone())).unwrap().len() as u64;
        let level = DiskLevel::open(temp.path(), one_entry * 2 + one_entry / 2).await.unwrap();

        level.put(&entry("k0", payload.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        level.put(&entry("k1", payload.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let evicted = level.put(&entry("k2", payload)).await.unwrap();

        assert_eq!(evicted, 1);
        assert!(level.get("k0", Utc::now()).await.unwrap().is_none());
        assert!(level.get("k2", Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_matching_uses_logical_keys() {
        let temp = TempDir::new().unwrap();
        let level = DiskLevel::open(temp.path(), 1 << 20).await.unwrap();
        level.put(&entry("deps:/a:Foo", serde_json::json!(1))).await.unwrap();
        level.put(&entry("deps:/b:Foo", serde_json::json!(2))).await.unwrap();
        level.put(&entry("resolve:/a:Foo", serde_json::json!(3))).await.unwrap();

        let pattern = glob::Pattern::new("deps:*").unwrap();
        let removed = level.remove_matching(&pattern).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(level.usage().await.unwrap().entries, 1);
        assert_eq!(level.clear().await.unwrap(), 1);
    }
}
