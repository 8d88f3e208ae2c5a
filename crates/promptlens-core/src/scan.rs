//! Folder listing and batch extraction.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cache::MetadataCache;
use crate::cancel::CancellationToken;
use crate::error::{Cancelled, ExtractError};
use crate::record::ImageMetadataRecord;
use crate::ThrottledProgress;

const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp"];

fn is_supported_image(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map_or(false, |mime| IMAGE_MIME_TYPES.contains(&mime.essence_str()))
}

/// Image files in `dir`, sorted by path. Unreadable subdirectories are
/// skipped; an unreadable `dir` is an error.
pub fn list_images(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ExtractError> {
    let entries = fs::read_dir(dir).map_err(|e| ExtractError::io(dir, e))?;
    let mut images = Vec::new();
    collect_images(entries, recursive, &mut images);
    images.sort();
    debug!(dir = %dir.display(), count = images.len(), "listed images");
    Ok(images)
}

fn collect_images(entries: fs::ReadDir, recursive: bool, images: &mut Vec<PathBuf>) {
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                if let Ok(sub) = fs::read_dir(&path) {
                    collect_images(sub, recursive, images);
                }
            }
        } else if is_supported_image(&path) {
            images.push(path);
        }
    }
}

/// Result of a batch extraction.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Records of every readable file, in input order.
    pub records: Vec<Arc<ImageMetadataRecord>>,
    /// Records where any field is non-empty.
    pub with_metadata: usize,
    /// Number of paths requested.
    pub total: usize,
    /// One line per unreadable file.
    pub warnings: Vec<String>,
}

/// Extract every path through `cache` in parallel.
///
/// I/O failures become warnings and the scan carries on. Returns
/// [`Cancelled`] if the token fires before all files are done.
pub fn scan(
    paths: &[PathBuf],
    cache: &MetadataCache,
    cancel: Option<&CancellationToken>,
    progress: &ThrottledProgress,
) -> Result<ScanReport, Cancelled> {
    let total = paths.len() as u64;
    let counter = AtomicU64::new(0);

    let outcomes: Vec<Result<Arc<ImageMetadataRecord>, ExtractError>> = paths
        .par_iter()
        .map(|path| {
            if let Some(token) = cancel {
                token.check()?;
            }
            let outcome = cache.get_or_compute(path);
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("scan", current, total, "Reading metadata");
            Ok(outcome)
        })
        .collect::<Result<_, Cancelled>>()?;

    let mut report = ScanReport {
        total: paths.len(),
        ..ScanReport::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(record) => {
                if record.has_metadata() {
                    report.with_metadata += 1;
                }
                report.records.push(record);
            }
            Err(e) => {
                warn!("{e}");
                report.warnings.push(e.to_string());
            }
        }
    }
    Ok(report)
}
