// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DXF group-code pair reader
//!
//! A DXF text stream is a sequence of line pairs: an integer group code on
//! one line, its value on the next. The reader yields borrowed pairs and
//! supports a single pair of look-back so section parsers can stop at the
//! next `0` marker without consuming it.

use crate::error::{Error, Result};

/// One `(group code, value)` pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupPair<'a> {
    pub code: i32,
    pub value: &'a str,
    /// 1-based line number of the group code line
    pub line: usize,
}

impl<'a> GroupPair<'a> {
    /// Parse the value as a float
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        parse_f64(self.value)
    }

    /// Parse the value as an integer
    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        parse_i32(self.value)
    }

    /// True for the `0 <marker>` pair that starts an entity or structure
    #[inline]
    pub fn is_marker(&self, marker: &str) -> bool {
        self.code == 0 && self.value == marker
    }
}

/// Fast float parsing for coordinate values
#[inline]
pub fn parse_f64(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    fast_float::parse::<f64, _>(trimmed)
        .ok()
        .filter(|v| v.is_finite())
}

/// Integer parsing; tolerates the `+` sign and surrounding blanks some writers emit
#[inline]
pub fn parse_i32(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    lexical_core::parse::<i32>(trimmed.as_bytes()).ok()
}

/// Streaming reader over the pairs of a normalized DXF text
pub struct GroupReader<'a> {
    lines: std::str::Lines<'a>,
    pending: Option<GroupPair<'a>>,
    line: usize,
}

impl<'a> GroupReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            pending: None,
            line: 0,
        }
    }

    /// Number of lines consumed so far
    pub fn line(&self) -> usize {
        self.line
    }

    /// Read the next pair.
    ///
    /// A group code line that is not an integer, or a code line with no
    /// value line after it, means the stream is out of step and cannot be
    /// recovered; both are reported as [`Error::Format`].
    pub fn next_pair(&mut self) -> Result<Option<GroupPair<'a>>> {
        if let Some(pair) = self.pending.take() {
            return Ok(Some(pair));
        }

        // Blank lines between pairs occur in hand-edited files
        let code_line = loop {
            match self.lines.next() {
                Some(l) => {
                    self.line += 1;
                    if !l.trim().is_empty() {
                        break l;
                    }
                }
                None => return Ok(None),
            }
        };
        let code_line_no = self.line;

        let code = parse_i32(code_line).ok_or_else(|| {
            Error::format(
                code_line_no,
                format!("group code \"{}\" is not an integer", code_line.trim()),
            )
        })?;

        let value = match self.lines.next() {
            Some(l) => {
                self.line += 1;
                l.trim()
            }
            None => {
                return Err(Error::format(
                    code_line_no,
                    format!("stream ends after group code {} without a value", code),
                ))
            }
        };

        Ok(Some(GroupPair {
            code,
            value,
            line: code_line_no,
        }))
    }

    /// Return a pair to the reader; the next call to `next_pair` yields it again
    pub fn put_back(&mut self, pair: GroupPair<'a>) {
        debug_assert!(self.pending.is_none(), "only one pair of look-back");
        self.pending = Some(pair);
    }

    /// Collect the body of the current entity: every pair up to (not including)
    /// the next `0` marker.
    pub fn read_body(&mut self) -> Result<Vec<GroupPair<'a>>> {
        let mut body = Vec::new();
        while let Some(pair) = self.next_pair()? {
            if pair.code == 0 {
                self.put_back(pair);
                break;
            }
            body.push(pair);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_pairs_and_put_back() {
        let mut reader = GroupReader::new("  0\nLINE\n8\nWALLS\n10\n1.5\n0\nEOF\n");
        let first = reader.next_pair().unwrap().unwrap();
        assert!(first.is_marker("LINE"));
        assert_eq!(first.line, 1);

        let body = reader.read_body().unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0].value, "WALLS");
        assert_eq!(body[1].as_f64(), Some(1.5));

        let eof = reader.next_pair().unwrap().unwrap();
        assert!(eof.is_marker("EOF"));
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_non_integer_code_is_format_error() {
        let mut reader = GroupReader::new("0\nSECTION\nabc\nxyz\n");
        reader.next_pair().unwrap();
        match reader.next_pair() {
            Err(Error::Format { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_dangling_code_is_format_error() {
        let mut reader = GroupReader::new("0\nSECTION\n2");
        reader.next_pair().unwrap();
        assert!(reader.next_pair().is_err());
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(parse_f64(" -2.5E+01 "), Some(-25.0));
        assert_eq!(parse_f64("abc"), None);
        assert_eq!(parse_f64(""), None);
        assert_eq!(parse_i32("+6"), Some(6));
        assert_eq!(parse_i32("  4"), Some(4));
    }
}
