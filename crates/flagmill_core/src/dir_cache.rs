//! Directory-existence cache
//!
//! Movers create destination parent directories on demand. On a distributed
//! filesystem the existence check is a round trip, so known-good parents are
//! remembered here for a bounded time. A hit means the directory existed at
//! or after insertion; a miss means the caller must stat for real.
//!
//! The cache is shared read/write across all pool workers. Duplicate
//! insertions from racing workers are benign.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct DirCache {
    inner: Mutex<HashMap<PathBuf, Instant>>,
    capacity: usize,
    ttl: Duration,
}

impl DirCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// True if `dir` was inserted within the TTL. Expired entries are
    /// dropped on the way out.
    pub fn contains(&self, dir: &Path) -> bool {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match map.get(dir) {
            Some(inserted) if inserted.elapsed() < self.ttl => true,
            Some(_) => {
                map.remove(dir);
                false
            }
            None => false,
        }
    }

    /// Record that `dir` exists. Evicts the oldest entry at capacity.
    pub fn insert(&self, dir: PathBuf) {
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if map.len() >= self.capacity && !map.contains_key(&dir) {
            let oldest = map
                .iter()
                .min_by_key(|(_, inserted)| **inserted)
                .map(|(path, _)| path.clone());
            if let Some(path) = oldest {
                map.remove(&path);
            }
        }
        map.insert(dir, Instant::now());
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
