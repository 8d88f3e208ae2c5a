//! Per-path memo of extracted metadata records.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{ConfigError, ExtractError};
use crate::extractor::MetadataExtractor;
use crate::record::ImageMetadataRecord;

/// Memoizes [`MetadataExtractor`] results per file path.
///
/// Unbounded unless built with a capacity, in which case the least recently
/// used record is evicted. The cache never looks at the filesystem on its
/// own; callers decide when an entry is stale and call [`invalidate`].
///
/// Extraction runs outside the cache lock, so different paths extract in
/// parallel. Callers missing on the same path queue on a per-path slot and
/// all but the first find the stored record, so each path is extracted at
/// most once while it stays cached.
///
/// [`invalidate`]: MetadataCache::invalidate
pub struct MetadataCache {
    extractor: MetadataExtractor,
    capacity: Option<NonZeroUsize>,
    entries: Mutex<LruCache<PathBuf, Arc<ImageMetadataRecord>>>,
    in_flight: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::unbounded(MetadataExtractor::default())
    }
}

impl MetadataCache {
    pub fn unbounded(extractor: MetadataExtractor) -> Self {
        Self {
            extractor,
            capacity: None,
            entries: Mutex::new(LruCache::unbounded()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capacity(extractor: MetadataExtractor, capacity: usize) -> Result<Self, ConfigError> {
        let cap = NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroCapacity("metadata_cache_capacity"))?;
        Ok(Self {
            extractor,
            capacity: Some(cap),
            entries: Mutex::new(LruCache::new(cap)),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Cached record for `path`, extracting it on first access.
    pub fn get_or_compute(&self, path: &Path) -> Result<Arc<ImageMetadataRecord>, ExtractError> {
        self.get_or_compute_with(path, |p| self.extractor.extract(p))
    }

    /// Like [`get_or_compute`](Self::get_or_compute) with a caller-supplied
    /// extraction. Failed extractions are not cached.
    pub fn get_or_compute_with<F>(
        &self,
        path: &Path,
        compute: F,
    ) -> Result<Arc<ImageMetadataRecord>, ExtractError>
    where
        F: FnOnce(&Path) -> Result<ImageMetadataRecord, ExtractError>,
    {
        if let Some(record) = self.entries.lock().get(path) {
            trace!(path = %path.display(), "metadata cache hit");
            return Ok(Arc::clone(record));
        }

        let slot = Arc::clone(self.in_flight.lock().entry(path.to_path_buf()).or_default());
        let result = {
            let _turn = slot.lock();
            self.compute_once(path, compute)
        };
        self.release_slot(path, &slot);
        result
    }

    /// Runs with the path's slot held: a caller that queued behind another
    /// extraction of the same path picks up its record here.
    fn compute_once<F>(&self, path: &Path, compute: F) -> Result<Arc<ImageMetadataRecord>, ExtractError>
    where
        F: FnOnce(&Path) -> Result<ImageMetadataRecord, ExtractError>,
    {
        if let Some(record) = self.entries.lock().get(path) {
            return Ok(Arc::clone(record));
        }

        trace!(path = %path.display(), "metadata cache miss");
        let record = Arc::new(compute(path)?);
        self.entries.lock().put(path.to_path_buf(), Arc::clone(&record));
        Ok(record)
    }

    /// The last caller holding a slot removes it from the map.
    fn release_slot(&self, path: &Path, slot: &Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        let unused = in_flight
            .get(path)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unused {
            in_flight.remove(path);
        }
    }

    /// Cached record without extracting. Promotes the entry.
    pub fn get(&self, path: &Path) -> Option<Arc<ImageMetadataRecord>> {
        self.entries.lock().get(path).cloned()
    }

    /// Drop the entry for `path` so the next access re-extracts it.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries.lock().pop(path).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Container;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn record(path: &Path) -> ImageMetadataRecord {
        ImageMetadataRecord::empty(path, Container::Png, vec![])
    }

    #[test]
    fn test_computes_once_per_path() {
        let cache = MetadataCache::default();
        let calls = Cell::new(0);
        let compute = |p: &Path| {
            calls.set(calls.get() + 1);
            Ok(record(p))
        };

        let a = cache.get_or_compute_with(Path::new("a.png"), compute).unwrap();
        let b = cache.get_or_compute_with(Path::new("a.png"), compute).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&a, &b));

        cache.get_or_compute_with(Path::new("b.png"), compute).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_misses_extract_once() {
        let cache = MetadataCache::default();
        let calls = AtomicUsize::new(0);
        let start = Barrier::new(8);

        let records: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        start.wait();
                        cache
                            .get_or_compute_with(Path::new("shared.png"), |p| {
                                calls.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(Duration::from_millis(50));
                                Ok(record(p))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(records.iter().all(|r| Arc::ptr_eq(r, &records[0])));
        assert!(cache.in_flight.lock().is_empty());
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let cache = MetadataCache::default();
        let calls = Cell::new(0);
        let compute = |p: &Path| {
            calls.set(calls.get() + 1);
            Ok(record(p))
        };

        cache.get_or_compute_with(Path::new("a.png"), compute).unwrap();
        assert!(cache.invalidate(Path::new("a.png")));
        assert!(!cache.invalidate(Path::new("a.png")));
        cache.get_or_compute_with(Path::new("a.png"), compute).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = MetadataCache::default();
        let path = Path::new("missing.png");
        let failed = cache.get_or_compute_with(path, |p| {
            Err(ExtractError::io(p, std::io::Error::from(std::io::ErrorKind::NotFound)))
        });
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_cache_evicts_least_recently_used() {
        let cache = MetadataCache::with_capacity(MetadataExtractor::default(), 2).unwrap();
        let compute = |p: &Path| Ok(record(p));

        cache.get_or_compute_with(Path::new("a"), compute).unwrap();
        cache.get_or_compute_with(Path::new("b"), compute).unwrap();
        cache.get(Path::new("a"));
        cache.get_or_compute_with(Path::new("c"), compute).unwrap();

        assert!(cache.get(Path::new("a")).is_some());
        assert!(cache.get(Path::new("b")).is_none());
        assert!(cache.get(Path::new("c")).is_some());
        assert_eq!(cache.capacity(), Some(2));
    }

    #[test]
    fn test_zero_capacity_is_a_config_error() {
        assert!(matches!(
            MetadataCache::with_capacity(MetadataExtractor::default(), 0),
            Err(ConfigError::ZeroCapacity(_))
        ));
    }

    #[test]
    fn test_missing_file_surfaces_io_error() {
        let cache = MetadataCache::default();
        let err = cache
            .get_or_compute(Path::new("/nonexistent/promptlens/x.png"))
            .unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}
