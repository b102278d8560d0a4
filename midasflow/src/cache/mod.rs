//! Reference-counted tile cache for less-memory mode.
//!
//! Tiles are loaded when a traversal first touches them and evicted as soon
//! as the last holder lets go. There is no recency policy: traversals decide
//! what stays resident by holding [`TileHandle`]s.
//!
//! # Architecture
//!
//! ```text
//!   worker task                          TileCache (shared)
//!  ┌─────────────┐  acquire(key, load)  ┌─────────────────────────────┐
//!  │  TileLease  │ ───────────────────▶ │ DashMap<TileKey, CacheEntry>│
//!  │ (FIFO, max  │ ◀─────────────────── │   data: Arc<T>              │
//!  │  N handles) │      TileHandle      │   refs: AtomicUsize         │
//!  └─────────────┘                      └─────────────────────────────┘
//!         │ drop handle                              ▲
//!         └──────────── release: refs -= 1 ──────────┘ evict at 0
//! ```
//!
//! Reference count changes happen while holding the entry's shard lock, so
//! an acquire can never resurrect a tile that a concurrent release is
//! evicting.

use std::collections::VecDeque;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use crate::coord::TileId;
use crate::error::Result;

/// Identifies a tile of a specific dataset layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub tile: TileId,
    pub path: Arc<Path>,
}

impl TileKey {
    pub fn new(path: Arc<Path>, tile: TileId) -> Self {
        Self { tile, path }
    }
}

struct CacheEntry<T> {
    data: Arc<T>,
    refs: AtomicUsize,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Tiles read from disk.
    pub loads: u64,
    /// Acquires served from a resident tile.
    pub hits: u64,
    pub evictions: u64,
    pub resident: usize,
    /// Highest number of tiles resident at once.
    pub peak_resident: usize,
}

/// Shared cache of tiles keyed by dataset path and tile id.
pub struct TileCache<T> {
    entries: DashMap<TileKey, CacheEntry<T>>,
    loads: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
    resident: AtomicUsize,
    peak_resident: AtomicUsize,
}

impl<T: Send + Sync> TileCache<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            loads: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            resident: AtomicUsize::new(0),
            peak_resident: AtomicUsize::new(0),
        }
    }

    /// Returns a handle to a tile, loading it on a miss.
    ///
    /// The loader runs at most once per residency of a tile, under the lock
    /// of the tile's shard.
    pub fn acquire<F>(self: &Arc<Self>, key: TileKey, load: F) -> Result<TileHandle<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let data = match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => {
                entry.get().refs.fetch_add(1, Ordering::AcqRel);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Arc::clone(&entry.get().data)
            }
            Entry::Vacant(entry) => {
                let data = Arc::new(load()?);
                entry.insert(CacheEntry {
                    data: Arc::clone(&data),
                    refs: AtomicUsize::new(1),
                });
                self.loads.fetch_add(1, Ordering::Relaxed);
                let resident = self.resident.fetch_add(1, Ordering::AcqRel) + 1;
                self.peak_resident.fetch_max(resident, Ordering::AcqRel);
                trace!(tile = %key.tile, path = %key.path.display(), "tile loaded");
                data
            }
        };

        Ok(TileHandle {
            cache: Arc::clone(self),
            key,
            data,
        })
    }

    fn release(&self, key: &TileKey) {
        let evicted = self
            .entries
            .remove_if(key, |_, entry| entry.refs.fetch_sub(1, Ordering::AcqRel) == 1);
        if evicted.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.resident.fetch_sub(1, Ordering::AcqRel);
            trace!(tile = %key.tile, "tile evicted");
        }
    }

    /// Number of holders of a tile; 0 when not resident.
    pub fn ref_count(&self, key: &TileKey) -> usize {
        self.entries
            .get(key)
            .map(|entry| entry.refs.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_resident(&self, key: &TileKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            loads: self.loads.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: self.resident.load(Ordering::Acquire),
            peak_resident: self.peak_resident.load(Ordering::Acquire),
        }
    }
}

impl<T: Send + Sync> Default for TileCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A counted reference to a resident tile.
///
/// Dropping the handle releases the reference.
pub struct TileHandle<T: Send + Sync> {
    cache: Arc<TileCache<T>>,
    key: TileKey,
    data: Arc<T>,
}

impl<T: Send + Sync> TileHandle<T> {
    pub fn key(&self) -> &TileKey {
        &self.key
    }
}

impl<T: Send + Sync> Deref for TileHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: Send + Sync> Drop for TileHandle<T> {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

// =============================================================================
// TileLease
// =============================================================================

/// The tiles one traversal task currently holds.
///
/// At most `max_tiles` handles are kept; acquiring one more releases the
/// oldest. Clearing the lease releases everything.
pub struct TileLease<T: Send + Sync> {
    handles: VecDeque<TileHandle<T>>,
    max_tiles: usize,
}

impl<T: Send + Sync> TileLease<T> {
    pub fn new(max_tiles: usize) -> Self {
        Self {
            handles: VecDeque::with_capacity(max_tiles.max(1)),
            max_tiles: max_tiles.max(1),
        }
    }

    /// Returns the tile, acquiring it from the cache if not already held.
    pub fn get<F>(&mut self, cache: &Arc<TileCache<T>>, key: &TileKey, load: F) -> Result<&T>
    where
        F: FnOnce() -> Result<T>,
    {
        let index = match self.handles.iter().position(|h| h.key() == key) {
            Some(index) => index,
            None => {
                if self.handles.len() >= self.max_tiles {
                    self.handles.pop_front();
                }
                let handle = cache.acquire(key.clone(), load)?;
                self.handles.push_back(handle);
                self.handles.len() - 1
            }
        };
        Ok(&*self.handles[index])
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Releases every held tile.
    pub fn clear(&mut self) {
        self.handles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MidasError;
    use std::path::PathBuf;

    fn key(path: &Arc<Path>, row: u32, col: u32) -> TileKey {
        TileKey::new(Arc::clone(path), TileId::new(row, col))
    }

    fn layer() -> Arc<Path> {
        Arc::from(PathBuf::from("/data/fdr").as_path())
    }

    #[test]
    fn test_second_acquire_is_a_hit() {
        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let path = layer();
        let a = cache.acquire(key(&path, 0, 0), || Ok(vec![1, 2, 3])).unwrap();
        let b = cache
            .acquire(key(&path, 0, 0), || panic!("tile must not load twice"))
            .unwrap();
        assert_eq!(*a, vec![1, 2, 3]);
        assert_eq!(*b, vec![1, 2, 3]);
        assert_eq!(cache.ref_count(&key(&path, 0, 0)), 2);
        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_last_release_evicts() {
        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let path = layer();
        let a = cache.acquire(key(&path, 1, 2), || Ok(vec![7])).unwrap();
        let b = cache.acquire(key(&path, 1, 2), || Ok(vec![7])).unwrap();
        drop(a);
        assert!(cache.is_resident(&key(&path, 1, 2)));
        drop(b);
        assert!(!cache.is_resident(&key(&path, 1, 2)));
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.resident, 0);
        assert_eq!(stats.peak_resident, 1);
    }

    #[test]
    fn test_failed_load_leaves_no_entry() {
        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let path = layer();
        let result = cache.acquire(key(&path, 0, 0), || Err(MidasError::Internal("boom".into())));
        assert!(result.is_err());
        assert!(!cache.is_resident(&key(&path, 0, 0)));
        assert_eq!(cache.stats().loads, 0);
    }

    #[test]
    fn test_same_tile_of_different_layers_is_distinct() {
        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let a_path: Arc<Path> = Arc::from(PathBuf::from("/a").as_path());
        let b_path: Arc<Path> = Arc::from(PathBuf::from("/b").as_path());
        let _a = cache.acquire(key(&a_path, 0, 0), || Ok(vec![1])).unwrap();
        let b = cache.acquire(key(&b_path, 0, 0), || Ok(vec![2])).unwrap();
        assert_eq!(*b, vec![2]);
        assert_eq!(cache.stats().loads, 2);
    }

    #[test]
    fn test_lease_bounds_held_tiles() {
        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let path = layer();
        let mut lease = TileLease::new(2);

        lease.get(&cache, &key(&path, 0, 0), || Ok(vec![0])).unwrap();
        lease.get(&cache, &key(&path, 0, 1), || Ok(vec![1])).unwrap();
        assert_eq!(cache.stats().resident, 2);

        // A third tile pushes out the oldest one.
        let tile = lease.get(&cache, &key(&path, 0, 2), || Ok(vec![2])).unwrap();
        assert_eq!(tile, &vec![2]);
        assert_eq!(lease.len(), 2);
        assert!(!cache.is_resident(&key(&path, 0, 0)));

        lease.clear();
        assert_eq!(cache.stats().resident, 0);
        assert_eq!(cache.stats().peak_resident, 2);
    }

    #[test]
    fn test_lease_reuses_held_tile() {
        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let path = layer();
        let mut lease = TileLease::new(4);
        lease.get(&cache, &key(&path, 3, 3), || Ok(vec![9])).unwrap();
        lease.get(&cache, &key(&path, 3, 3), || Ok(vec![9])).unwrap();
        assert_eq!(lease.len(), 1);
        assert_eq!(cache.ref_count(&key(&path, 3, 3)), 1);
    }

    #[test]
    fn test_concurrent_acquire_loads_once() {
        use rayon::prelude::*;

        let cache = Arc::new(TileCache::<Vec<i32>>::new());
        let path = layer();
        let handles: Vec<_> = (0..64)
            .into_par_iter()
            .map(|_| cache.acquire(key(&path, 5, 5), || Ok(vec![5])).unwrap())
            .collect();
        assert_eq!(cache.stats().loads, 1);
        assert_eq!(cache.ref_count(&key(&path, 5, 5)), 64);
        drop(handles);
        assert!(!cache.is_resident(&key(&path, 5, 5)));
    }
}
