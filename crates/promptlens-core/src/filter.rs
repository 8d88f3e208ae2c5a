//! Keyword, size and date filtering over a list of image paths.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use filetime::FileTime;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::cache::MetadataCache;
use crate::cancel::CancellationToken;
use crate::error::Cancelled;
use crate::record::ImageMetadataRecord;
use crate::ThrottledProgress;

/// How the keyword list is applied to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every keyword must match.
    #[default]
    All,
    /// At least one keyword must match.
    Any,
    /// No keyword may match.
    Exclude,
}

/// Which text fields the keywords are tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldToggles {
    pub filename: bool,
    pub prompt: bool,
    pub negative: bool,
    pub settings: bool,
}

impl FieldToggles {
    pub fn all() -> Self {
        Self {
            filename: true,
            prompt: true,
            negative: true,
            settings: true,
        }
    }

    pub fn any(&self) -> bool {
        self.filename || self.any_metadata()
    }

    fn any_metadata(&self) -> bool {
        self.prompt || self.negative || self.settings
    }
}

/// "Created within the last N days" windows. Several may be enabled at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePreset {
    ThisWeek,
    TwoWeeks,
    FourWeeks,
    OneMonth,
    OneYear,
}

impl DatePreset {
    pub fn window(self) -> Duration {
        match self {
            Self::ThisWeek => Duration::days(7),
            Self::TwoWeeks => Duration::days(14),
            Self::FourWeeks => Duration::days(28),
            Self::OneMonth => Duration::days(30),
            Self::OneYear => Duration::days(365),
        }
    }
}

/// One filter invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterQuery {
    /// Case-folded keywords, see [`parse_keywords`].
    pub keywords: Vec<String>,
    pub mode: MatchMode,
    pub fields: FieldToggles,
    pub whole_word: bool,
    pub min_kb: Option<u64>,
    pub max_kb: Option<u64>,
    pub date_presets: Vec<DatePreset>,
    /// Reference time for date presets; the current time when `None`.
    pub now: Option<DateTime<Utc>>,
}

impl FilterQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set keywords from comma-separated input.
    pub fn with_keywords(mut self, csv: &str) -> Self {
        self.keywords = parse_keywords(csv);
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fields(mut self, fields: FieldToggles) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_whole_word(mut self, whole_word: bool) -> Self {
        self.whole_word = whole_word;
        self
    }

    pub fn with_size_kb(mut self, min_kb: Option<u64>, max_kb: Option<u64>) -> Self {
        self.min_kb = min_kb;
        self.max_kb = max_kb;
        self
    }

    pub fn with_date_preset(mut self, preset: DatePreset) -> Self {
        if !self.date_presets.contains(&preset) {
            self.date_presets.push(preset);
        }
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn keyword_group_active(&self) -> bool {
        !self.keywords.is_empty() && self.fields.any()
    }

    fn needs_stat(&self) -> bool {
        self.min_kb.is_some() || self.max_kb.is_some() || !self.date_presets.is_empty()
    }

    /// True when the query cannot exclude anything.
    pub fn is_unconstrained(&self) -> bool {
        !self.keyword_group_active() && !self.needs_stat()
    }
}

/// Split comma-separated input into trimmed, NFC-normalised, lower-cased
/// keywords. Empty entries are dropped.
pub fn parse_keywords(csv: &str) -> Vec<String> {
    csv.split(',')
        .filter_map(|s| {
            let t = fold(s.trim());
            if t.is_empty() {
                None
            } else {
                Some(t)
            }
        })
        .collect()
}

fn fold(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

/// Size and creation time of a file, as supplied by the filesystem layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    pub size_bytes: u64,
    pub created: DateTime<Utc>,
}

impl FileAttributes {
    /// Creation time where the filesystem records one, modification time
    /// otherwise.
    pub fn from_metadata(meta: &fs::Metadata) -> Self {
        let ft = FileTime::from_creation_time(meta)
            .unwrap_or_else(|| FileTime::from_last_modification_time(meta));
        Self {
            size_bytes: meta.len(),
            created: DateTime::from_timestamp(ft.unix_seconds(), ft.nanoseconds())
                .unwrap_or_default(),
        }
    }
}

/// Type alias for the stat lookup used by the filter.
pub type StatFn = dyn Fn(&Path) -> io::Result<FileAttributes> + Send + Sync;

pub fn stat_file(path: &Path) -> io::Result<FileAttributes> {
    fs::metadata(path).map(|meta| FileAttributes::from_metadata(&meta))
}

enum KeywordTest {
    Substring(String),
    Word(Regex),
}

/// Keywords compiled once per query.
struct Matcher {
    tests: Vec<KeywordTest>,
}

impl Matcher {
    fn new(query: &FilterQuery) -> Self {
        let tests = query
            .keywords
            .iter()
            .map(|k| {
                if !query.whole_word {
                    return KeywordTest::Substring(k.clone());
                }
                RegexBuilder::new(&format!(r"\b{}\b", regex::escape(k)))
                    .case_insensitive(true)
                    .build()
                    .map(KeywordTest::Word)
                    .unwrap_or_else(|_| KeywordTest::Substring(k.clone()))
            })
            .collect();
        Self { tests }
    }

    fn field_passes(&self, text: &str, mode: MatchMode) -> bool {
        let folded = fold(text);
        let mut hits = self.tests.iter().map(|t| match t {
            KeywordTest::Substring(k) => folded.contains(k.as_str()),
            KeywordTest::Word(re) => re.is_match(&folded),
        });
        match mode {
            MatchMode::All => hits.all(|hit| hit),
            MatchMode::Any => hits.any(|hit| hit),
            MatchMode::Exclude => !hits.any(|hit| hit),
        }
    }
}

/// Outcome of one filter pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterResult {
    /// Matching paths, in input order.
    pub matched: Vec<PathBuf>,
    /// One line per file that could not be read; such files never match.
    pub warnings: Vec<String>,
}

/// Evaluates a [`FilterQuery`] against cached metadata and file attributes.
pub struct FilterEngine<'a> {
    cache: &'a MetadataCache,
}

impl<'a> FilterEngine<'a> {
    pub fn new(cache: &'a MetadataCache) -> Self {
        Self { cache }
    }

    /// Filter `paths`, reading attributes from the filesystem.
    pub fn apply(&self, paths: &[PathBuf], query: &FilterQuery) -> FilterResult {
        self.apply_with(paths, query, &stat_file)
    }

    /// Filter `paths` with a caller-supplied attribute lookup.
    pub fn apply_with(&self, paths: &[PathBuf], query: &FilterQuery, stat: &StatFn) -> FilterResult {
        let noop = |_: &str, _: u64, _: u64, _: &str| {};
        let progress = ThrottledProgress::new(&noop);
        // without a token the pass cannot be cancelled
        self.apply_with_control(paths, query, stat, None, &progress)
            .unwrap_or_default()
    }

    /// Filter with cancellation checked between files and progress reports.
    pub fn apply_with_control(
        &self,
        paths: &[PathBuf],
        query: &FilterQuery,
        stat: &StatFn,
        cancel: Option<&CancellationToken>,
        progress: &ThrottledProgress,
    ) -> Result<FilterResult, Cancelled> {
        if query.is_unconstrained() {
            return Ok(FilterResult {
                matched: paths.to_vec(),
                warnings: Vec::new(),
            });
        }

        let matcher = Matcher::new(query);
        let now = query.now.unwrap_or_else(Utc::now);
        let total = paths.len() as u64;
        let mut result = FilterResult::default();

        for (i, path) in paths.iter().enumerate() {
            if let Some(token) = cancel {
                token.check()?;
            }
            progress.report("filter", i as u64, total, "Filtering");

            match self.evaluate(path, query, &matcher, stat, now) {
                Ok(true) => result.matched.push(path.clone()),
                Ok(false) => {}
                Err(message) => {
                    warn!("{message}");
                    result.warnings.push(message);
                }
            }
        }

        Ok(result)
    }

    fn evaluate(
        &self,
        path: &Path,
        query: &FilterQuery,
        matcher: &Matcher,
        stat: &StatFn,
        now: DateTime<Utc>,
    ) -> Result<bool, String> {
        if query.needs_stat() {
            let attrs = stat(path).map_err(|e| format!("cannot stat {}: {e}", path.display()))?;
            if !size_in_bounds(attrs.size_bytes, query.min_kb, query.max_kb) {
                return Ok(false);
            }
            let age = now - attrs.created;
            if query.date_presets.iter().any(|p| age > p.window()) {
                return Ok(false);
            }
        }

        if !query.keyword_group_active() {
            return Ok(true);
        }

        let record = if query.fields.any_metadata() {
            Some(self.cache.get_or_compute(path).map_err(|e| e.to_string())?)
        } else {
            None
        };

        let texts = field_texts(path, query.fields, record.as_deref());
        let pass = match query.mode {
            MatchMode::Exclude => texts
                .iter()
                .all(|t| matcher.field_passes(t, MatchMode::Exclude)),
            mode => texts.iter().any(|t| matcher.field_passes(t, mode)),
        };
        Ok(pass)
    }
}

fn size_in_bounds(size_bytes: u64, min_kb: Option<u64>, max_kb: Option<u64>) -> bool {
    let kb = size_bytes as f64 / 1024.0;
    min_kb.map_or(true, |min| kb >= min as f64) && max_kb.map_or(true, |max| kb <= max as f64)
}

/// Text of every enabled field.
fn field_texts<'r>(
    path: &Path,
    fields: FieldToggles,
    record: Option<&'r ImageMetadataRecord>,
) -> Vec<Cow<'r, str>> {
    let mut texts = Vec::new();
    if fields.filename {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        texts.push(Cow::Owned(name));
    }
    if let Some(r) = record {
        if fields.prompt {
            texts.push(Cow::Borrowed(r.prompt.as_str()));
        }
        if fields.negative {
            texts.push(Cow::Borrowed(r.negative_prompt.as_str()));
        }
        if fields.settings {
            texts.push(Cow::Borrowed(r.settings.as_str()));
        }
    }
    texts
}
