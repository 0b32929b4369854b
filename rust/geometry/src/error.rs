// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during measurement
#[derive(Error, Debug)]
pub enum Error {
    /// Geometry that cannot be measured (non-finite coordinates, degenerate
    /// transforms). Converted to a skipped entity by the extractor.
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Core parser error: {0}")]
    CoreError(#[from] takeoff_core::Error),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidGeometry(message.into())
    }
}
