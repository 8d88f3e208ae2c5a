//! Raw metadata payload of one image file.
//!
//! The container is detected from magic bytes, never from the file
//! extension. PNG payloads come from declared text chunks (`tEXt`, `zTXt`,
//! `iTXt`); everything else is handed to the EXIF reader and yields the raw
//! bytes of the UserComment tag.

use std::io::Cursor;
use std::path::Path;

use exif::{In, Reader, Tag, Value};

use crate::error::ExtractError;
use crate::record::{Container, Diagnostics};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Key substring that marks the primary PNG metadata chunk.
pub const PARAMETERS_KEY: &str = "parameters";
/// Fallback key substrings, in priority order.
const PNG_FALLBACK_KEYS: &[&str] = &["prompt", "metadata", "description"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadData {
    /// Already-decoded PNG text chunk value.
    Text(String),
    /// Undecoded EXIF UserComment bytes.
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub container: Container,
    /// Text key or tag name the data came from.
    pub key: Option<String>,
    pub data: Option<PayloadData>,
}

impl Payload {
    fn absent(container: Container) -> Self {
        Self {
            container,
            key: None,
            data: None,
        }
    }
}

pub fn detect_container(bytes: &[u8]) -> Container {
    if bytes.starts_with(&PNG_SIGNATURE) {
        Container::Png
    } else if bytes.starts_with(&JPEG_MAGIC) {
        Container::Jpeg
    } else {
        Container::Unknown
    }
}

/// Read the metadata payload of the file at `path`.
///
/// Only an unreadable file is an error; a file without metadata yields a
/// payload with `data == None`.
pub fn read_payload(path: &Path, diag: &mut Diagnostics) -> Result<Payload, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::io(path, e))?;
    diag.push(format!("read {} bytes", bytes.len()));
    Ok(payload_from_bytes(&bytes, diag))
}

/// Same as [`read_payload`] for file contents already in memory.
pub fn payload_from_bytes(bytes: &[u8], diag: &mut Diagnostics) -> Payload {
    let container = detect_container(bytes);
    diag.push(format!("container: {container}"));
    match container {
        Container::Png => png_payload(bytes, diag),
        other => exif_payload(other, bytes, diag),
    }
}

fn png_payload(bytes: &[u8], diag: &mut Diagnostics) -> Payload {
    let entries = match png_text_entries(bytes) {
        Ok(entries) => entries,
        Err(e) => {
            diag.push(format!("unreadable PNG stream: {e}"));
            return Payload::absent(Container::Png);
        }
    };

    let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
    diag.push(format!("PNG text keys: {keys:?}"));

    match select_png_entry(&entries) {
        Some((key, text)) => {
            diag.push(format!("using PNG key {key:?}"));
            Payload {
                container: Container::Png,
                key: Some(key.clone()),
                data: Some(PayloadData::Text(text.clone())),
            }
        }
        None => {
            diag.push("no metadata text key found");
            Payload::absent(Container::Png)
        }
    }
}

/// All declared text chunks before the image data, as (keyword, text).
fn png_text_entries(bytes: &[u8]) -> Result<Vec<(String, String)>, png::DecodingError> {
    let decoder = png::Decoder::new(bytes);
    let reader = decoder.read_info()?;
    let info = reader.info();

    let mut entries = Vec::new();
    for t in &info.uncompressed_latin1_text {
        entries.push((t.keyword.clone(), t.text.clone()));
    }
    for t in &info.compressed_latin1_text {
        if let Ok(text) = t.get_text() {
            entries.push((t.keyword.clone(), text));
        }
    }
    for t in &info.utf8_text {
        if let Ok(text) = t.get_text() {
            entries.push((t.keyword.clone(), text));
        }
    }
    Ok(entries)
}

/// Pick the metadata entry: a key containing "parameters" wins, then the
/// fallback substrings in priority order. Matching is case-insensitive.
pub fn select_png_entry(entries: &[(String, String)]) -> Option<&(String, String)> {
    let key_contains = |needle: &str| {
        entries
            .iter()
            .find(|(k, _)| k.to_lowercase().contains(needle))
    };

    key_contains(PARAMETERS_KEY).or_else(|| {
        PNG_FALLBACK_KEYS
            .iter()
            .find_map(|needle| key_contains(*needle))
    })
}

fn exif_payload(container: Container, bytes: &[u8], diag: &mut Diagnostics) -> Payload {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(e) => {
            diag.push(format!("no EXIF data: {e}"));
            return Payload::absent(container);
        }
    };

    let Some(field) = exif.get_field(Tag::UserComment, In::PRIMARY) else {
        diag.push("EXIF has no UserComment tag");
        return Payload::absent(container);
    };

    let raw = match &field.value {
        Value::Undefined(raw, _) => raw.clone(),
        Value::Ascii(parts) => parts.concat(),
        other => {
            diag.push(format!("UserComment has unexpected type {other:?}"));
            return Payload::absent(container);
        }
    };

    diag.push(format!("UserComment: {} bytes", raw.len()));
    Payload {
        container,
        key: Some("UserComment".to_string()),
        data: Some(PayloadData::Bytes(raw)),
    }
}
