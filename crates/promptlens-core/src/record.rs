use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// Default cap on diagnostic lines kept per extraction.
pub const DEFAULT_MAX_DIAGNOSTICS: usize = 64;

/// Image container, detected from magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Png,
    Jpeg,
    Unknown,
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Which segmentation strategy produced the fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StructuredDocument,
    QuotedMarkers,
    PlainMarkers,
    SpacedMarkers,
    WholeText,
    None,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StructuredDocument => "structured-document",
            Self::QuotedMarkers => "quoted-markers",
            Self::PlainMarkers => "plain-markers",
            Self::SpacedMarkers => "spaced-markers",
            Self::WholeText => "whole-text",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Which decoding produced the text of a JPEG comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf16Le,
    Utf16Be,
    Utf8,
    Latin1,
    Latin1NulStripped,
    None,
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "Latin-1",
            Self::Latin1NulStripped => "Latin-1 (NUL stripped)",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Append-only trace of the decisions made during one extraction.
/// Lines beyond the cap are counted but not stored.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    lines: Vec<String>,
    cap: usize,
    dropped: usize,
}

impl Diagnostics {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: Vec::new(),
            cap,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() < self.cap {
            self.lines.push(line.into());
        } else {
            self.dropped += 1;
        }
    }

    pub fn into_lines(mut self) -> Vec<String> {
        if self.dropped > 0 && self.cap > 0 {
            let last = self.lines.len() - 1;
            self.lines[last] = format!("... {} more lines omitted", self.dropped + 1);
        }
        self.lines
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIAGNOSTICS)
    }
}

/// Generation metadata recovered from one image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadataRecord {
    pub path: PathBuf,
    pub container: Container,
    /// Decoded payload before segmentation; `None` when the file carries no metadata.
    pub raw_text: Option<String>,
    pub prompt: String,
    pub negative_prompt: String,
    pub settings: String,
    pub strategy: Strategy,
    pub encoding: TextEncoding,
    /// PNG text key or EXIF tag name the payload was read from.
    pub source_key: Option<String>,
    pub diagnostics: Vec<String>,
}

impl ImageMetadataRecord {
    /// A record for a file without usable metadata.
    pub fn empty(path: impl Into<PathBuf>, container: Container, diagnostics: Vec<String>) -> Self {
        Self {
            path: path.into(),
            container,
            raw_text: None,
            prompt: String::new(),
            negative_prompt: String::new(),
            settings: String::new(),
            strategy: Strategy::None,
            encoding: TextEncoding::None,
            source_key: None,
            diagnostics,
        }
    }

    pub fn has_metadata(&self) -> bool {
        self.strategy != Strategy::None
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
