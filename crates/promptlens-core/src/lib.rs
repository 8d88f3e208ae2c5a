pub mod cache;
pub mod cancel;
pub mod config;
pub mod encoding;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod image_cache;
pub mod record;
pub mod scan;
pub mod segment;
pub mod source;

use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use cache::MetadataCache;
pub use cancel::CancellationToken;
pub use config::Settings;
pub use error::{Cancelled, ConfigError, ExtractError};
pub use extractor::{extract, MetadataExtractor};
pub use filter::{
    parse_keywords, DatePreset, FieldToggles, FileAttributes, FilterEngine, FilterQuery,
    FilterResult, MatchMode,
};
pub use image_cache::{CacheStats, ImageCache, ImageHandle};
pub use record::{Container, ImageMetadataRecord, Strategy, TextEncoding};
pub use scan::{list_images, scan, ScanReport};

/// Progress callback: (stage, current, total, message).
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: Mutex<Option<Instant>>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last_emit: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let mut last = self.last_emit.lock();
            if last.is_some_and(|t| t.elapsed() < PROGRESS_INTERVAL) {
                return;
            }
            *last = Some(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_throttled_progress_always_reports_completion() {
        let calls = AtomicU64::new(0);
        let last = AtomicU64::new(0);
        let callback = |_: &str, current: u64, _: u64, _: &str| {
            calls.fetch_add(1, Ordering::Relaxed);
            last.store(current, Ordering::Relaxed);
        };
        let progress = ThrottledProgress::new(&callback);
        for i in 0..1000 {
            progress.report("test", i, 1000, "");
        }
        // first report plus the final one; the loop finishes well within 200ms
        assert!(calls.load(Ordering::Relaxed) >= 2);
        assert!(calls.load(Ordering::Relaxed) < 1000);
        assert_eq!(last.load(Ordering::Relaxed), 999);
    }
}
