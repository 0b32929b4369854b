// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Takeoff Engine
//!
//! Backend-neutral facade over the processing pipeline: loads drawings from
//! disk through a read-only memory map, BOQ documents and configuration
//! from JSON, and renders reports back to JSON.
//!
//! A BOQ document is either a bare array of lines or an object with
//! per-row overrides keyed by `row_index`:
//!
//! ```json
//! {
//!   "lines": [{ "row_index": 2, "description": "Muro perimetral", "unit": "m2" }],
//!   "overrides": { "2": { "action": "force_layer", "layer": "WALLS" } }
//! }
//! ```

use anyhow::{Context, Result};
use memmap2::Mmap;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;

pub use takeoff_processing as processing;
pub use takeoff_processing::{BoqLine, Overrides, TakeoffConfig, TakeoffReport};

use takeoff_processing::TakeoffPipeline;

/// BOQ lines plus caller decisions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoqDocument {
    pub lines: Vec<BoqLine>,
    pub overrides: Overrides,
}

#[derive(Deserialize)]
struct BoqObject {
    lines: Vec<BoqLine>,
    #[serde(default)]
    overrides: Overrides,
}

impl BoqDocument {
    pub fn from_json_str(json: &str) -> Result<Self> {
        if json.trim_start().starts_with('[') {
            let lines: Vec<BoqLine> = serde_json::from_str(json).context("parsing BOQ line array")?;
            return Ok(Self {
                lines,
                overrides: Overrides::default(),
            });
        }
        let BoqObject { lines, overrides } =
            serde_json::from_str(json).context("BOQ must be an array of lines or {lines, overrides}")?;
        Ok(Self { lines, overrides })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading BOQ {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("parsing BOQ {}", path.display()))
    }
}

/// Configuration from a JSON file when given, else from `TAKEOFF_*` variables
pub fn load_config(path: Option<&Path>) -> Result<TakeoffConfig> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            TakeoffConfig::from_json_str(&json)
                .with_context(|| format!("invalid config {}", path.display()))
        }
        None => TakeoffConfig::from_env()
            .validated()
            .context("invalid TAKEOFF_* environment configuration"),
    }
}

pub struct TakeoffEngine {
    pipeline: TakeoffPipeline,
}

impl TakeoffEngine {
    pub fn new(config: TakeoffConfig) -> Self {
        Self {
            pipeline: TakeoffPipeline::new(config),
        }
    }

    pub fn config(&self) -> &TakeoffConfig {
        self.pipeline.config()
    }

    pub fn run_bytes(&self, bytes: &[u8], boq: &BoqDocument) -> Result<TakeoffReport> {
        self.pipeline
            .run(bytes, &boq.lines, &boq.overrides)
            .context("takeoff failed")
    }

    /// Run over a drawing file without copying it into memory
    pub fn run_file(&self, drawing: &Path, boq: &BoqDocument) -> Result<TakeoffReport> {
        let file = File::open(drawing).with_context(|| format!("opening {}", drawing.display()))?;
        let len = file
            .metadata()
            .with_context(|| format!("reading metadata of {}", drawing.display()))?
            .len();
        tracing::debug!(path = %drawing.display(), bytes = len, "mapping drawing");
        if len == 0 {
            return self.run_bytes(&[], boq);
        }

        // SAFETY: read-only map, dropped before this function returns.
        let map = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mapping {}", drawing.display()))?;
        self.run_bytes(&map, boq)
            .with_context(|| format!("drawing {}", drawing.display()))
    }
}

pub fn report_json(report: &TakeoffReport, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(report)
    } else {
        serde_json::to_string(report)
    };
    json.context("serializing report")
}
