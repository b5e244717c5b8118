use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{AppError, Context, Result};

/// On-disk wrapper around a cached payload. Pretty JSON keeps entries
/// self-describing, so a truncated or hand-edited file fails to parse and is
/// discarded as a miss instead of crashing the reader.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// A value read back from the store, with enough metadata for the cache
/// manager to distinguish a fresh hit from stale offline-serving material.
#[derive(Debug)]
pub struct StoredValue<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub is_expired: bool,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    expires_at: DateTime<Utc>,
    size: u64,
    last_access: DateTime<Utc>,
}

/// Durable key-value store under a single directory, one JSON file per key.
///
/// Reads are snapshot reads guided by an in-memory index behind a `RwLock`;
/// writes take the single writer lock. Expired entries are still returned
/// (flagged) so the manager can serve them while offline. When the directory
/// grows past its byte budget, lowest-recency entries are evicted first.
pub struct PersistentStore {
    dir: PathBuf,
    byte_budget: u64,
    index: RwLock<HashMap<String, IndexEntry>>,
}

impl PersistentStore {
    /// Open (or create) the store directory and run the startup sweep:
    /// expired and corrupt files are deleted before the index is built.
    pub fn open(dir: impl Into<PathBuf>, byte_budget: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {:?}", dir))?;

        let mut index = HashMap::new();
        let now = Utc::now();

        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(|s| s.to_string())
            else {
                continue;
            };

            match read_entry_meta(&path) {
                Some(expires_at) if expires_at > now => {
                    let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
                    index.insert(
                        key,
                        IndexEntry {
                            expires_at,
                            size,
                            last_access: now,
                        },
                    );
                }
                Some(_) => {
                    debug!("startup sweep: removing expired entry {}", key);
                    let _ = fs::remove_file(&path);
                }
                None => {
                    warn!("startup sweep: {}, removing", AppError::CorruptCacheEntry(key));
                    let _ = fs::remove_file(&path);
                }
            }
        }

        Ok(Self {
            dir,
            byte_budget,
            index: RwLock::new(index),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Read a value. A missing key returns `None`; a corrupt payload is
    /// deleted and reported as a miss, never as an error. Expired entries are
    /// returned with `is_expired` set.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<StoredValue<T>> {
        {
            let index = self.index.read().unwrap();
            index.get(key)?;
        }

        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => {
                // Index said present but the file is gone; heal the index.
                self.index.write().unwrap().remove(key);
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    "{}: {}, discarding",
                    AppError::CorruptCacheEntry(key.to_string()),
                    err
                );
                let _ = fs::remove_file(&path);
                self.index.write().unwrap().remove(key);
                return None;
            }
        };

        let now = Utc::now();
        if let Some(meta) = self.index.write().unwrap().get_mut(key) {
            meta.last_access = now;
        }

        Some(StoredValue {
            data: entry.data,
            cached_at: entry.cached_at,
            is_expired: now >= entry.expires_at,
        })
    }

    /// Write a value with the given TTL, then enforce the byte budget by
    /// evicting lowest-recency entries (never the key just written).
    pub fn put<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(ttl.as_secs() as i64);
        let entry = CacheEntry {
            data,
            cached_at: now,
            expires_at,
        };
        let json = serde_json::to_string_pretty(&entry)
            .with_context(|| format!("Failed to serialize cache entry {}", key))?;

        let mut index = self.index.write().unwrap();
        let path = self.entry_path(key);
        fs::write(&path, &json).with_context(|| format!("Failed to write cache entry {}", key))?;

        index.insert(
            key.to_string(),
            IndexEntry {
                expires_at,
                size: json.len() as u64,
                last_access: now,
            },
        );

        self.enforce_budget(&mut index, key);
        Ok(())
    }

    fn enforce_budget(&self, index: &mut HashMap<String, IndexEntry>, just_written: &str) {
        loop {
            let total: u64 = index.values().map(|entry| entry.size).sum();
            if total <= self.byte_budget {
                return;
            }

            let victim = index
                .iter()
                .filter(|(key, _)| key.as_str() != just_written)
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());

            let Some(victim) = victim else {
                // Only the fresh entry remains; a single oversized value is
                // allowed to exceed the budget.
                return;
            };

            debug!("evicting {} to stay under byte budget", victim);
            let _ = fs::remove_file(self.entry_path(&victim));
            index.remove(&victim);
        }
    }

    /// Delete every entry whose expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut index = self.index.write().unwrap();
        let expired: Vec<String> = index
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            let _ = fs::remove_file(self.entry_path(key));
            index.remove(key);
        }
        expired.len()
    }

    pub fn remove(&self, key: &str) {
        let mut index = self.index.write().unwrap();
        if index.remove(key).is_some() {
            let _ = fs::remove_file(self.entry_path(key));
        }
    }

    pub fn clear(&self) {
        let mut index = self.index.write().unwrap();
        for key in index.keys() {
            let _ = fs::remove_file(self.entry_path(key));
        }
        index.clear();
    }

    pub fn size_bytes(&self) -> u64 {
        self.index
            .read()
            .unwrap()
            .values()
            .map(|entry| entry.size)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.index.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse just enough of an entry to learn its expiry; `None` means corrupt.
fn read_entry_meta(path: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(path).ok()?;
    let entry: CacheEntry<serde_json::Value> = serde_json::from_str(&content).ok()?;
    Some(entry.expires_at)
}
