// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for drawing parsing
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors raised while reading a drawing.
///
/// Everything below the level of a whole stream (a single malformed entity,
/// an unknown entity type) is recovered by the parser and reported through
/// [`crate::SkippedEntity`] instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The stream is not a readable DXF text stream.
    #[error("Format error at line {line}: {message}")]
    Format { line: usize, message: String },

    /// Neither the primary nor the legacy decoding produced usable text.
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Empty drawing")]
    EmptyInput,
}

impl Error {
    pub fn format(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }

    /// True for errors caused by the byte encoding rather than the structure
    pub fn is_encoding(&self) -> bool {
        matches!(self, Error::Encoding(_))
    }
}
