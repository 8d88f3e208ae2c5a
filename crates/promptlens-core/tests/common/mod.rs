#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Kind of PNG text chunk to embed.
#[derive(Clone, Copy)]
pub enum Chunk {
    Text,
    Ztxt,
    Itxt,
}

/// A 2x2 RGB PNG carrying the given text chunks.
pub fn png_with_text(chunks: &[(Chunk, &str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buf, 2, 2);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        for (kind, key, text) in chunks {
            let (key, text) = (key.to_string(), text.to_string());
            match kind {
                Chunk::Text => encoder.add_text_chunk(key, text).unwrap(),
                Chunk::Ztxt => encoder.add_ztxt_chunk(key, text).unwrap(),
                Chunk::Itxt => encoder.add_itxt_chunk(key, text).unwrap(),
            }
        }
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0u8; 12]).unwrap();
        writer.finish().unwrap();
    }
    buf
}

/// A minimal JPEG whose APP1 segment holds a little-endian TIFF structure
/// with an Exif IFD containing only UserComment.
pub fn jpeg_with_user_comment(comment: &[u8]) -> Vec<u8> {
    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II\x2A\x00");
    tiff.extend_from_slice(&8u32.to_le_bytes());

    // IFD0 at 8: ExifIFDPointer -> 26
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x8769u16.to_le_bytes());
    tiff.extend_from_slice(&4u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&26u32.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    // Exif IFD at 26: UserComment (UNDEFINED) -> 44
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x9286u16.to_le_bytes());
    tiff.extend_from_slice(&7u16.to_le_bytes());
    tiff.extend_from_slice(&(comment.len() as u32).to_le_bytes());
    tiff.extend_from_slice(&44u32.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(tiff.len(), 44);
    tiff.extend_from_slice(comment);

    let mut app1 = b"Exif\0\0".to_vec();
    app1.extend_from_slice(&tiff);

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
    jpeg.extend_from_slice(&app1);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}

/// `UNICODE\0` header followed by UTF-16LE text.
pub fn unicode_comment(text: &str) -> Vec<u8> {
    let mut out = b"UNICODE\0".to_vec();
    out.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
    out
}

/// `UNICODE\0\0` padded header followed by UTF-16LE text.
pub fn padded_unicode_comment(text: &str) -> Vec<u8> {
    let mut out = b"UNICODE\0\0".to_vec();
    out.extend(text.encode_utf16().flat_map(|u| u.to_le_bytes()));
    out
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}
