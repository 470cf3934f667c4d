// src/response_cache.rs

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;

const MAX_KEY_LEN: usize = 100;

/// Deterministic key for a cacheable request, built from its semantic parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// `resource` plus parameters; parameter order does not matter.
    pub fn new(resource: &str, params: &[(&str, &str)]) -> Self {
        let mut key = sanitize(resource);

        if !params.is_empty() {
            key.push_str("__PARAMS_");
            let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
            sorted.sort();
            for (k, v) in sorted {
                key.push_str(&sanitize(k));
                key.push('_');
                key.push_str(&sanitize(v));
                key.push(';');
            }
        }

        // Keep prefix + hash so long keys stay usable as file names
        if key.len() > MAX_KEY_LEN {
            key = format!("{}_{}", &key[..MAX_KEY_LEN / 2], short_digest(&key));
        }

        Fingerprint(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First 8 bytes of the SHA-256 of `raw`, hex encoded. Fixed length, safe in file names.
pub fn short_digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

pub(crate) fn sanitize(raw: &str) -> String {
    raw.replace(|c: char| !c.is_ascii_alphanumeric(), "_")
}

/// Stored response plus fetch timestamp. Never handed out of the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    fingerprint: String,
    payload: serde_json::Value,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        now.signed_duration_since(self.fetched_at) < ttl
    }
}

type Slot = Arc<Mutex<Option<CacheEntry>>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub fetches: u64,
    pub forced: u64,
}

/// Fingerprint -> response cache with TTL expiry, forced refresh and
/// per-fingerprint single-flight fetching.
///
/// Each fingerprint owns an async mutex; a caller holds it for the whole
/// lookup-fetch-store sequence, so concurrent callers for the same
/// fingerprint queue up and are served the stored result instead of
/// fetching again. Unrelated fingerprints never contend.
pub struct ResponseCache {
    slots: StdMutex<HashMap<Fingerprint, Slot>>,
    clock: Arc<dyn Clock>,
    disk_dir: Option<PathBuf>,
    hits: AtomicU64,
    fetches: AtomicU64,
    forced: AtomicU64,
}

impl ResponseCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
            clock,
            disk_dir: None,
            hits: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            forced: AtomicU64::new(0),
        }
    }

    /// Mirrors entries to `{dir}/{fingerprint}.json` so they survive restarts.
    pub fn with_disk_mirror(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create cache directory {:?}: {}. Disk mirror disabled.", dir, e);
            return self;
        }
        self.disk_dir = Some(dir);
        self
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            forced: self.forced.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        slots
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Returns the cached payload when fresh, otherwise calls `fetch_fn` and stores its result.
    ///
    /// A failed fetch leaves the existing entry untouched and propagates the error.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        fetch_fn: F,
        ttl: Duration,
        force_refresh: bool,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.slot(fingerprint);
        let mut guard = slot.lock().await;

        if force_refresh {
            debug!("Cache BYPASS (force refresh) for key: {}", fingerprint);
            self.forced.fetch_add(1, Ordering::Relaxed);
        } else {
            let now = self.clock.now();
            if guard.is_none() {
                *guard = self.load_from_disk(fingerprint);
            }
            if let Some(entry) = guard.as_ref() {
                if entry.is_fresh(now, ttl) {
                    match serde_json::from_value::<T>(entry.payload.clone()) {
                        Ok(value) => {
                            debug!("Cache HIT for key: {}", fingerprint);
                            self.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok(value);
                        }
                        Err(e) => {
                            warn!(
                                "Cached payload for {} does not decode: {}. Treating as miss.",
                                fingerprint, e
                            );
                        }
                    }
                } else {
                    debug!("Cache STALE for key: {}", fingerprint);
                }
            } else {
                debug!("Cache MISS for key: {}", fingerprint);
            }
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let value = fetch_fn().await?;

        match serde_json::to_value(&value) {
            Ok(payload) => {
                let entry = CacheEntry {
                    fingerprint: fingerprint.to_string(),
                    payload,
                    fetched_at: self.clock.now(),
                };
                self.save_to_disk(fingerprint, &entry);
                *guard = Some(entry);
                debug!("Saved response to cache for key: {}", fingerprint);
            }
            Err(e) => {
                // Don't fail the request on cache save failure, just log it.
                error!("Failed to encode response for cache key {}: {}", fingerprint, e);
            }
        }

        Ok(value)
    }

    /// Drops one entry. Waits for an in-flight fetch of the same fingerprint to finish first.
    pub async fn invalidate(&self, fingerprint: &Fingerprint) {
        let slot = self.slot(fingerprint);
        let mut guard = slot.lock().await;
        if guard.take().is_some() {
            info!("Cache INVALIDATED for key: {}", fingerprint);
        }
        self.remove_from_disk(fingerprint);
    }

    /// Drops every entry whose fingerprint starts with `prefix`. Returns how many were cached.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let matching: Vec<(Fingerprint, Slot)> = {
            let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots
                .iter()
                .filter(|(fp, _)| fp.starts_with(prefix))
                .map(|(fp, slot)| (fp.clone(), slot.clone()))
                .collect()
        };

        let mut removed = 0;
        for (fingerprint, slot) in matching {
            if slot.lock().await.take().is_some() {
                removed += 1;
            }
            self.remove_from_disk(&fingerprint);
        }

        if let Some(dir) = &self.disk_dir {
            removed += remove_files_with_prefix(dir, prefix);
        }
        info!("Cache INVALIDATED {} entries with prefix '{}'", removed, prefix);
        removed
    }

    pub async fn clear(&self) {
        let all: Vec<Slot> = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in all {
            slot.lock().await.take();
        }
        if let Some(dir) = &self.disk_dir {
            remove_files_with_prefix(dir, "");
        }
        info!("Response cache CLEARED");
    }

    // --- Disk mirror ---

    fn cache_file_path(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        self.disk_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", fingerprint)))
    }

    fn load_from_disk(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let path = self.cache_file_path(fingerprint)?;
        if !path.exists() {
            return None;
        }
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to read cache file {:?}: {}", path, e);
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry>(&text) {
            Ok(entry) if entry.fingerprint == fingerprint.as_str() => Some(entry),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "Failed to deserialize cache file {:?}: {}. Removing corrupt cache file.",
                    path, e
                );
                if let Err(remove_err) = fs::remove_file(&path) {
                    error!("Failed to remove corrupt cache file {:?}: {}", path, remove_err);
                }
                None
            }
        }
    }

    fn save_to_disk(&self, fingerprint: &Fingerprint, entry: &CacheEntry) {
        let Some(path) = self.cache_file_path(fingerprint) else {
            return;
        };
        let result = serde_json::to_string_pretty(entry)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            error!("Failed to write cache file {:?}: {}", path, e);
        }
    }

    fn remove_from_disk(&self, fingerprint: &Fingerprint) {
        if let Some(path) = self.cache_file_path(fingerprint) {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove cache file {:?}: {}", path, e);
                }
            }
        }
    }
}

fn remove_files_with_prefix(dir: &Path, prefix: &str) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read cache directory {:?}: {}", dir, e);
            return 0;
        }
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(prefix) && n.ends_with(".json"))
            .unwrap_or(false);
        if matches {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cache file {:?}: {}", path, e),
            }
        }
    }
    removed
}
