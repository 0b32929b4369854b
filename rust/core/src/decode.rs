// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte-level decoding of DXF text streams
//!
//! Drawings arrive with a mix of encodings: modern exports are UTF-8 (often
//! with a byte-order mark), older ones are written in the Windows ANSI code
//! page. Decoding tries UTF-8 first and falls back to Windows-1252.

use crate::error::{Error, Result};
use std::borrow::Cow;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const BINARY_DXF_SENTINEL: &[u8] = b"AutoCAD Binary DXF";

/// Which decoding produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextEncoding {
    Utf8,
    Windows1252,
}

/// Decoded drawing text with normalized `\n` line endings
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: TextEncoding,
    pub had_bom: bool,
}

/// Windows-1252 code points for bytes 0x80..=0x9F.
/// Undefined slots map to the C1 control of the same value.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Decode raw drawing bytes into normalized text.
///
/// Fails with [`Error::Encoding`] for binary DXF or data containing NUL bytes,
/// which neither text decoding can represent, and with [`Error::EmptyInput`]
/// when nothing but whitespace remains.
pub fn decode_drawing_bytes(bytes: &[u8]) -> Result<DecodedText> {
    let had_bom = bytes.starts_with(UTF8_BOM);
    let body = if had_bom { &bytes[UTF8_BOM.len()..] } else { bytes };

    if body.starts_with(BINARY_DXF_SENTINEL) {
        return Err(Error::Encoding(
            "binary DXF is not supported; export the drawing as ASCII DXF".to_string(),
        ));
    }
    if let Some(pos) = memchr::memchr(0, body) {
        return Err(Error::Encoding(format!(
            "stream contains a NUL byte at offset {}; it is neither UTF-8 nor Windows-1252 text",
            pos
        )));
    }

    let (raw, encoding) = match std::str::from_utf8(body) {
        Ok(text) => (Cow::Borrowed(text), TextEncoding::Utf8),
        Err(_) => (Cow::Owned(decode_windows_1252(body)), TextEncoding::Windows1252),
    };

    let text = normalize_line_endings(&raw);
    if text.trim().is_empty() {
        return Err(Error::EmptyInput);
    }

    Ok(DecodedText {
        text,
        encoding,
        had_bom,
    })
}

/// Windows-1252 decoding; total over all byte values
pub fn decode_windows_1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
            _ => b as char,
        })
        .collect()
}

/// Convert `\r\n` and lone `\r` into `\n`
pub fn normalize_line_endings(text: &str) -> String {
    if memchr::memchr(b'\r', text.as_bytes()).is_none() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bom_is_stripped() {
        let decoded = decode_drawing_bytes(b"\xEF\xBB\xBF0\nEOF\n").unwrap();
        assert!(decoded.had_bom);
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
        assert!(decoded.text.starts_with('0'));
    }

    #[test]
    fn test_crlf_normalized() {
        let decoded = decode_drawing_bytes(b"0\r\nSECTION\r2\r\nENTITIES\n").unwrap();
        assert_eq!(decoded.text, "0\nSECTION\n2\nENTITIES\n");
    }

    #[test]
    fn test_legacy_fallback() {
        // "Baño" in Windows-1252 is not valid UTF-8
        let decoded = decode_drawing_bytes(b"1\nBa\xF1o\n").unwrap();
        assert_eq!(decoded.encoding, TextEncoding::Windows1252);
        assert!(decoded.text.contains("Baño"));

        assert_eq!(decode_windows_1252(b"\x80"), "€");
    }

    #[test]
    fn test_binary_and_empty_rejected() {
        let err = decode_drawing_bytes(b"AutoCAD Binary DXF\r\n\x1a\x00").unwrap_err();
        assert!(err.is_encoding());

        let err = decode_drawing_bytes(b"0\n\x00\x01").unwrap_err();
        assert!(err.is_encoding());

        assert_eq!(decode_drawing_bytes(b"  \n\n").unwrap_err(), Error::EmptyInput);
    }
}
