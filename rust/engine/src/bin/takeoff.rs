// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line takeoff: one drawing, one BOQ, JSON report on stdout.
//!
//! ```bash
//! takeoff plan.dxf boq.json --unit mm --config takeoff.json > report.json
//! ```

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use takeoff_engine::processing::DrawingUnit;
use takeoff_engine::{load_config, report_json, BoqDocument, TakeoffEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "takeoff", version)]
#[command(about = "Measure a DXF drawing against a bill of quantities")]
struct Args {
    /// Drawing in DXF text format
    drawing: PathBuf,

    /// BOQ lines as JSON
    boq: PathBuf,

    /// Drawing unit, overriding the header (mm, cm or m)
    #[arg(long, value_name = "UNIT", env = "TAKEOFF_PREFERRED_UNIT")]
    unit: Option<String>,

    /// JSON configuration file; TAKEOFF_* variables are used otherwise
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Indent the JSON report
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,takeoff_processing=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(unit) = &args.unit {
        let unit = DrawingUnit::parse(unit).ok_or_else(|| anyhow!("unknown unit '{}'", unit))?;
        config.preferred_unit = Some(unit);
    }

    let boq = BoqDocument::load(&args.boq)?;
    tracing::info!(
        drawing = %args.drawing.display(),
        lines = boq.lines.len(),
        overrides = boq.overrides.len(),
        "Starting takeoff"
    );

    let engine = TakeoffEngine::new(config);
    let report = engine.run_file(&args.drawing, &boq)?;

    let json = report_json(&report, args.pretty)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(json.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}
