// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Takeoff Processing
//!
//! Matches bill-of-quantities lines against the measured layers of a drawing
//! and decides, per line, whether the quantity can be trusted.
//!
//! ## Overview
//!
//! - [`boq`]: BOQ lines and their expected measurement kind (unit table,
//!   keyword fallback, title detection)
//! - [`validate`]: can a layer's totals answer a given kind?
//! - [`scoring`]: lexical/kind/proximity candidate score with the annotation
//!   penalty
//! - [`matcher`]: the review state machine producing [`StagingRow`]s
//! - [`refine`]: optional async re-ranking of low-confidence rows
//! - [`pipeline`]: drawing bytes + lines → [`TakeoffReport`]
//!
//! ```rust,ignore
//! use takeoff_processing::{BoqLine, Overrides, TakeoffConfig, TakeoffPipeline};
//!
//! let pipeline = TakeoffPipeline::new(TakeoffConfig::from_env().validated()?);
//! let lines = vec![BoqLine::new(1, "Muro perimetral", "m2")];
//! let report = pipeline.run(&dxf_bytes, &lines, &Overrides::default())?;
//! for row in &report.rows {
//!     println!("{} {:?} {:?}", row.line_ref.description, row.status, row.qty_final);
//! }
//! ```

pub mod boq;
pub mod config;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod refine;
pub mod scoring;
pub mod validate;

pub use boq::{
    classify_description, expected_kind, is_title_line, kind_from_unit, BoqLine, KindSource,
    MeasurementKind,
};
pub use config::{LengthBands, TakeoffConfig, MAX_REFINE_CONCURRENCY};
pub use error::{Error, RefineError, Result};
pub use matcher::{
    Candidate, LineRef, Matcher, Overrides, RejectReason, ReviewStatus, RowOverride, StagingRow,
    Suggestion,
};
pub use pipeline::{DrawingAnalysis, ProcessingStats, TakeoffPipeline, TakeoffReport};
pub use refine::{
    refine_rows, RankedCandidate, RefineOptions, RefineReport, RefineRequest, SemanticRefiner,
};
pub use scoring::{candidate_score, lexical_score, ScoreInputs};
pub use validate::{check_support, Fallback, SupportCheck, SupportStatus};

pub use takeoff_core::{Drawing, DrawingUnit};
pub use takeoff_geometry::{DetectedItem, ItemKind, LayerProfile, LayerSummary};
