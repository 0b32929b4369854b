// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a takeoff run
#[derive(Error, Debug)]
pub enum Error {
    #[error("Drawing error: {0}")]
    CoreError(#[from] takeoff_core::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for failures caused by the drawing itself (unparsable or undecodable)
    pub fn is_drawing_error(&self) -> bool {
        matches!(self, Error::CoreError(_))
    }
}

/// Failure of one semantic refinement call. Never aborts a run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefineError {
    #[error("refinement service unavailable: {0}")]
    Unavailable(String),

    #[error("refinement timed out")]
    Timeout,

    #[error("refinement returned an invalid ranking: {0}")]
    InvalidResponse(String),
}
