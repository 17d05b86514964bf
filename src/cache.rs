//! Bounded LRU cache of serialized sweeps keyed by file basename.

use std::{num::NonZeroUsize, path::Path};

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::ConfigError;

/// Derives the cache key for a source path: its basename.
///
/// Two sources with the same file name in different directories share a key.
pub fn cache_key(path: &str) -> String {
   Path::new(path)
      .file_name()
      .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned())
}

/// Thread-safe LRU cache. One lock guards both the map and its recency order.
#[derive(Debug)]
pub struct SweepCache {
   inner:    Mutex<LruCache<String, Bytes>>,
   capacity: NonZeroUsize,
}

impl SweepCache {
   pub fn new(capacity: usize) -> Result<Self, ConfigError> {
      let capacity = NonZeroUsize::new(capacity)
         .ok_or_else(|| ConfigError::Invalid("cache capacity must be at least 1".to_string()))?;
      Ok(Self { inner: Mutex::new(LruCache::new(capacity)), capacity })
   }

   /// Returns the payload for `key`, marking it most recently used.
   pub fn get(&self, key: &str) -> Option<Bytes> {
      self.inner.lock().get(key).cloned()
   }

   /// Inserts or overwrites `key`, evicting the least recently used entry when
   /// the cache is full.
   pub fn put(&self, key: impl Into<String>, payload: Bytes) {
      let mut cache = self.inner.lock();
      // push() hands back the old pair on overwrite, so only a vanished key counts.
      if let Some((evicted, _)) = cache.push(key.into(), payload)
         && !cache.contains(&evicted)
      {
         tracing::trace!("cache evicted {evicted}");
      }
   }

   /// Number of resident entries
   pub fn size(&self) -> usize {
      self.inner.lock().len()
   }

   pub fn capacity(&self) -> usize {
      self.capacity.get()
   }

   /// Membership test that leaves recency untouched
   pub fn contains(&self, key: &str) -> bool {
      self.inner.lock().contains(key)
   }

   /// Resident keys, most recently used first
   pub fn keys(&self) -> Vec<String> {
      self.inner.lock().iter().map(|(k, _)| k.clone()).collect()
   }
}
