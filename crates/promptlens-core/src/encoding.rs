//! Text decoding of EXIF UserComment bytes.
//!
//! A comment starting with the `UNICODE\0` charset header (or its padded
//! `UNICODE\0\0` form) is tried against a fixed cascade of strict decoders;
//! the first success wins and Latin-1 closes the cascade because it accepts
//! every byte sequence.

use encoding_rs::{mem::decode_latin1, UTF_16BE, UTF_16LE};

use crate::record::{Diagnostics, TextEncoding};

pub const UNICODE_MARKER: &[u8; 8] = b"UNICODE\0";
pub const ASCII_MARKER: &[u8; 8] = b"ASCII\0\0\0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
}

impl DecodedText {
    fn new(text: &str, encoding: TextEncoding) -> Self {
        Self {
            text: text.trim_end_matches('\0').to_string(),
            encoding,
        }
    }
}

type StrictDecoder = fn(&[u8]) -> Option<String>;

/// Strict decoders for marked comments, in the order they are attempted.
const STRICT_CASCADE: &[(TextEncoding, StrictDecoder)] = &[
    (TextEncoding::Utf16Le, decode_utf16le),
    (TextEncoding::Utf16Be, decode_utf16be),
    (TextEncoding::Utf8, decode_utf8),
];

fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    UTF_16LE
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|s| s.into_owned())
}

fn decode_utf16be(bytes: &[u8]) -> Option<String> {
    UTF_16BE
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|s| s.into_owned())
}

fn decode_utf8(bytes: &[u8]) -> Option<String> {
    std::str::from_utf8(bytes).ok().map(str::to_string)
}

/// Decode raw UserComment bytes. Never fails.
pub fn decode(raw: &[u8], diag: &mut Diagnostics) -> DecodedText {
    let Some(body) = raw.strip_prefix(UNICODE_MARKER.as_slice()) else {
        let body = match raw.strip_prefix(ASCII_MARKER.as_slice()) {
            Some(rest) => {
                diag.push("stripped ASCII charset header");
                rest
            }
            None => raw,
        };
        diag.push("no UNICODE marker, decoding as Latin-1");
        return DecodedText::new(&decode_latin1(body), TextEncoding::Latin1);
    };

    diag.push("UNICODE marker found");
    // `UNICODE\0\0` writers pad the header with a second NUL, which leaves
    // the UTF-16 body one byte out of step.
    let body = match body.split_first() {
        Some((&0, rest)) if body.len() % 2 == 1 => {
            diag.push("skipped NUL padding after UNICODE marker");
            rest
        }
        _ => body,
    };
    for (encoding, decoder) in STRICT_CASCADE {
        match decoder(body) {
            Some(text) => {
                diag.push(format!("decoded as {encoding}"));
                return DecodedText::new(&text, *encoding);
            }
            None => diag.push(format!("{encoding} decoding failed")),
        }
    }

    let text = decode_latin1(body);
    if !text.contains('\0') {
        diag.push("decoded as Latin-1");
        return DecodedText::new(&text, TextEncoding::Latin1);
    }

    diag.push("Latin-1 text carries NUL bytes, stripping them");
    let stripped: Vec<u8> = body.iter().copied().filter(|&b| b != 0).collect();
    DecodedText::new(&decode_latin1(&stripped), TextEncoding::Latin1NulStripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marked(body: &[u8]) -> Vec<u8> {
        let mut out = UNICODE_MARKER.to_vec();
        out.extend_from_slice(body);
        out
    }

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn utf16be(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
    }

    fn run(raw: &[u8]) -> DecodedText {
        decode(raw, &mut Diagnostics::default())
    }

    #[test]
    fn test_utf16le_after_marker() {
        let text = "Negative prompt: x Steps: 5";
        let decoded = run(&marked(&utf16le(text)));
        assert_eq!(decoded.encoding, TextEncoding::Utf16Le);
        assert_eq!(decoded.text, text);
    }

    #[test]
    fn test_padded_marker_is_utf16le() {
        let text = "Negative prompt: x Steps: 5";
        let mut raw = b"UNICODE\0\0".to_vec();
        raw.extend_from_slice(&utf16le(text));

        let mut diag = Diagnostics::default();
        let decoded = decode(&raw, &mut diag);
        assert_eq!(decoded.encoding, TextEncoding::Utf16Le);
        assert_eq!(decoded.text, text);
        assert!(!decoded.text.contains('\0'));
        assert!(diag
            .into_lines()
            .iter()
            .any(|l| l == "skipped NUL padding after UNICODE marker"));
    }

    #[test]
    fn test_even_body_starting_with_nul_is_kept() {
        // big-endian "Ab": the leading NUL belongs to the text
        let decoded = run(&marked(&utf16be("Ab")));
        assert_eq!(decoded.text.chars().count(), 2);
    }

    #[test]
    fn test_utf16le_handles_non_ascii() {
        let text = "猫, 水彩 Steps: 30";
        let decoded = run(&marked(&utf16le(text)));
        assert_eq!(decoded.encoding, TextEncoding::Utf16Le);
        assert_eq!(decoded.text, text);
    }

    #[test]
    fn test_utf16be_when_little_endian_is_malformed() {
        // 00 D8 reads as an unpaired high surrogate in little-endian order.
        let decoded = run(&marked(&utf16be("Øa")));
        assert_eq!(decoded.encoding, TextEncoding::Utf16Be);
        assert_eq!(decoded.text, "Øa");
    }

    #[test]
    fn test_utf8_when_length_is_odd() {
        let decoded = run(&marked("éx".as_bytes()));
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
        assert_eq!(decoded.text, "éx");
    }

    #[test]
    fn test_latin1_when_nothing_strict_fits() {
        let decoded = run(&marked(&[0xE9, 0x61, 0x62]));
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "éab");
    }

    #[test]
    fn test_nul_bytes_are_stripped_as_last_resort() {
        let decoded = run(&marked(&[0x41, 0x00, 0xE9]));
        assert_eq!(decoded.encoding, TextEncoding::Latin1NulStripped);
        assert_eq!(decoded.text, "Aé");
    }

    #[test]
    fn test_unmarked_bytes_are_latin1() {
        let decoded = run(b"a cat Steps: 20");
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "a cat Steps: 20");
    }

    #[test]
    fn test_ascii_header_is_dropped() {
        let mut raw = ASCII_MARKER.to_vec();
        raw.extend_from_slice(b"caf\xE9");
        let decoded = run(&raw);
        assert_eq!(decoded.encoding, TextEncoding::Latin1);
        assert_eq!(decoded.text, "café");
    }

    #[test]
    fn test_trailing_padding_is_trimmed() {
        let mut body = utf16le("dog");
        body.extend_from_slice(&[0, 0, 0, 0]);
        let decoded = run(&marked(&body));
        assert_eq!(decoded.text, "dog");
    }

    #[test]
    fn test_every_branch_is_traced() {
        let mut diag = Diagnostics::default();
        decode(&marked(&[0xE9, 0x61, 0x62]), &mut diag);
        let lines = diag.into_lines();
        assert!(lines.iter().any(|l| l == "UTF-16LE decoding failed"));
        assert!(lines.iter().any(|l| l == "UTF-16BE decoding failed"));
        assert!(lines.iter().any(|l| l == "UTF-8 decoding failed"));
        assert!(lines.iter().any(|l| l == "decoded as Latin-1"));
    }
}
