use std::path::Path;

use tracing::debug;

use crate::encoding;
use crate::error::ExtractError;
use crate::record::{Diagnostics, ImageMetadataRecord, TextEncoding, DEFAULT_MAX_DIAGNOSTICS};
use crate::segment;
use crate::source::{self, Payload, PayloadData};

/// Reads a file, decodes its metadata payload and splits it into fields.
#[derive(Debug, Clone, Copy)]
pub struct MetadataExtractor {
    max_diagnostics: usize,
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DIAGNOSTICS)
    }
}

impl MetadataExtractor {
    pub fn new(max_diagnostics: usize) -> Self {
        Self { max_diagnostics }
    }

    /// Extract the metadata record of the file at `path`.
    ///
    /// Missing or malformed metadata yields an empty record; only a file
    /// that cannot be read is an error.
    pub fn extract(&self, path: &Path) -> Result<ImageMetadataRecord, ExtractError> {
        let mut diag = Diagnostics::new(self.max_diagnostics);
        let payload = source::read_payload(path, &mut diag)?;
        Ok(self.build(path, payload, diag))
    }

    /// Extract from file contents already in memory.
    pub fn extract_bytes(&self, path: &Path, bytes: &[u8]) -> ImageMetadataRecord {
        let mut diag = Diagnostics::new(self.max_diagnostics);
        let payload = source::payload_from_bytes(bytes, &mut diag);
        self.build(path, payload, diag)
    }

    fn build(&self, path: &Path, payload: Payload, mut diag: Diagnostics) -> ImageMetadataRecord {
        let (text, encoding) = match payload.data {
            None => {
                debug!(path = %path.display(), container = %payload.container, "no metadata");
                return ImageMetadataRecord::empty(path, payload.container, diag.into_lines());
            }
            Some(PayloadData::Text(text)) => (text, TextEncoding::None),
            Some(PayloadData::Bytes(raw)) => {
                let decoded = encoding::decode(&raw, &mut diag);
                (decoded.text, decoded.encoding)
            }
        };

        let segments = segment::segment(&text, &mut diag);
        debug!(
            path = %path.display(),
            container = %payload.container,
            strategy = %segments.strategy,
            encoding = %encoding,
            "extracted metadata"
        );

        ImageMetadataRecord {
            path: path.to_path_buf(),
            container: payload.container,
            raw_text: Some(text),
            prompt: segments.fields.prompt,
            negative_prompt: segments.fields.negative,
            settings: segments.fields.settings,
            strategy: segments.strategy,
            encoding,
            source_key: payload.key,
            diagnostics: diag.into_lines(),
        }
    }
}

/// Extract with default settings.
pub fn extract(path: &Path) -> Result<ImageMetadataRecord, ExtractError> {
    MetadataExtractor::default().extract(path)
}
