//! Bounded LRU cache of decoded full-resolution images.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::ConfigError;

/// Default maximum number of images kept in memory.
pub const DEFAULT_IMAGE_CACHE_CAPACITY: usize = 50;

/// Shared handle to a decoded image.
pub type ImageHandle = Arc<DynamicImage>;

/// Strict LRU cache keyed by path.
///
/// Every mutation happens under one lock, so the eviction triggered by an
/// insert is part of that insert.
pub struct ImageCache<H = ImageHandle> {
    entries: Mutex<LruCache<PathBuf, H>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<H: Clone> ImageCache<H> {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        let cap = NonZeroUsize::new(capacity).ok_or(ConfigError::ZeroCapacity("image_cache_capacity"))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Cached handle for `path`, promoted to most recently used.
    /// `None` means the caller has to load the image and [`put`](Self::put) it.
    pub fn get(&self, path: &Path) -> Option<H> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(handle) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(path = %path.display(), "image cache hit");
                Some(handle.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(path = %path.display(), "image cache miss");
                None
            }
        }
    }

    /// Looks at an entry without promoting it.
    pub fn peek(&self, path: &Path) -> Option<H> {
        self.entries.lock().peek(path).cloned()
    }

    /// Insert or replace the handle for `path`. Returns the entry evicted to
    /// make room, if any.
    pub fn put(&self, path: impl Into<PathBuf>, handle: H) -> Option<(PathBuf, H)> {
        let path = path.into();
        let mut entries = self.entries.lock();
        match entries.push(path.clone(), handle) {
            Some((evicted, old)) if evicted != path => {
                debug!(path = %evicted.display(), "evicted image from cache");
                Some((evicted, old))
            }
            _ => None,
        }
    }

    pub fn remove(&self, path: &Path) -> Option<H> {
        self.entries.lock().pop(path)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        debug!("cleared image cache");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }
}

impl ImageCache<ImageHandle> {
    /// Cached image for `path`, decoding and inserting it on a miss.
    pub fn get_or_load(&self, path: &Path) -> image::ImageResult<ImageHandle> {
        if let Some(handle) = self.get(path) {
            return Ok(handle);
        }
        let handle = Arc::new(image::open(path)?);
        self.put(path, Arc::clone(&handle));
        Ok(handle)
    }
}

impl Default for ImageCache<ImageHandle> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_IMAGE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> PathBuf {
        PathBuf::from(format!("img-{i}.png"))
    }

    #[test]
    fn test_put_and_get() {
        let cache: ImageCache<u32> = ImageCache::new(4).unwrap();
        cache.put("a.png", 7);
        assert_eq!(cache.get(Path::new("a.png")), Some(7));
        assert_eq!(cache.get(Path::new("b.png")), None);
    }

    #[test]
    fn test_overflow_evicts_exactly_the_lru_key() {
        let capacity = 3;
        let cache: ImageCache<usize> = ImageCache::new(capacity).unwrap();
        for i in 0..capacity {
            assert!(cache.put(key(i), i).is_none());
        }

        let evicted = cache.put(key(capacity), capacity);
        assert_eq!(evicted, Some((key(0), 0)));
        assert_eq!(cache.len(), capacity);
        assert!(cache.peek(&key(0)).is_none());
        for i in 1..=capacity {
            assert_eq!(cache.peek(&key(i)), Some(i));
        }
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let cache: ImageCache<usize> = ImageCache::new(3).unwrap();
        for i in 0..3 {
            cache.put(key(i), i);
        }
        assert_eq!(cache.get(&key(0)), Some(0));

        let evicted = cache.put(key(3), 3);
        assert_eq!(evicted, Some((key(1), 1)));
        assert!(cache.peek(&key(0)).is_some());
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache: ImageCache<usize> = ImageCache::new(2).unwrap();
        cache.put(key(0), 0);
        cache.put(key(1), 1);
        let _ = cache.peek(&key(0));
        cache.put(key(2), 2);
        assert!(cache.peek(&key(0)).is_none());
    }

    #[test]
    fn test_replacing_a_key_evicts_nothing() {
        let cache: ImageCache<usize> = ImageCache::new(2).unwrap();
        cache.put(key(0), 0);
        cache.put(key(1), 1);
        assert!(cache.put(key(0), 10).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek(&key(0)), Some(10));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(ImageCache::<u8>::new(0).is_err());
    }

    #[test]
    fn test_stats() {
        let cache: ImageCache<u8> = ImageCache::new(2).unwrap();
        cache.put("a", 1);
        let _ = cache.get(Path::new("a"));
        let _ = cache.get(Path::new("missing"));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_default_capacity() {
        let cache: ImageCache = ImageCache::default();
        assert_eq!(cache.capacity(), DEFAULT_IMAGE_CACHE_CAPACITY);
        let handle: ImageHandle = Arc::new(DynamicImage::new_rgb8(4, 4));
        cache.put("x.png", Arc::clone(&handle));
        assert_eq!(cache.get(Path::new("x.png")).unwrap().width(), 4);
    }

    #[test]
    fn test_concurrent_inserts_keep_the_bound() {
        let cache: Arc<ImageCache<usize>> = Arc::new(ImageCache::new(8).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.put(key(t * 1000 + i), i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
    }
}
