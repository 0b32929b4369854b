// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Optional semantic refinement of low-confidence rows
//!
//! A [`SemanticRefiner`] re-ranks the viable candidates of a row. Requests
//! run in bounded batches; a failed or timed-out request leaves the row as
//! the deterministic matcher decided it, with a warning.

use crate::boq::{BoqLine, MeasurementKind};
use crate::config::TakeoffConfig;
use crate::error::RefineError;
use crate::matcher::{Matcher, ReviewStatus, StagingRow};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// One layer ranked by a refiner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub layer: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefineRequest {
    pub row_index: usize,
    pub description: String,
    pub unit: String,
    pub expected_kind: MeasurementKind,
    /// Viable candidates only, best first
    pub candidates: Vec<RankedCandidate>,
}

/// Re-ranks candidate layers for a BOQ line
#[async_trait]
pub trait SemanticRefiner: Send + Sync {
    async fn refine(&self, request: RefineRequest) -> Result<Vec<RankedCandidate>, RefineError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOptions {
    /// Rows below this confidence are sent
    pub confidence_below: f64,
    /// Requests in flight at once
    pub concurrency: usize,
}

impl RefineOptions {
    pub fn from_config(config: &TakeoffConfig) -> Self {
        Self {
            confidence_below: config.refine_confidence_below,
            concurrency: config.refine_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefineReport {
    pub attempted: usize,
    pub refined: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Eligible rows never sent because the run was cancelled
    pub cancelled: usize,
}

fn is_eligible(row: &StagingRow, options: &RefineOptions) -> bool {
    matches!(row.status, ReviewStatus::Pending | ReviewStatus::Approved)
        && row.confidence < options.confidence_below
        && row.viable_candidates().next().is_some()
}

fn request_for(row: &StagingRow) -> RefineRequest {
    RefineRequest {
        row_index: row.line_ref.row_index,
        description: row.line_ref.description.clone(),
        unit: row.line_ref.unit.clone(),
        expected_kind: row.expected_kind,
        candidates: row
            .viable_candidates()
            .map(|c| RankedCandidate {
                layer: c.layer.clone(),
                score: c.score,
            })
            .collect(),
    }
}

/// Refine eligible rows in place. `lines` and `rows` are parallel.
/// The cancel flag is checked between batches.
pub async fn refine_rows(
    matcher: &Matcher<'_>,
    lines: &[BoqLine],
    rows: &mut [StagingRow],
    refiner: &dyn SemanticRefiner,
    options: &RefineOptions,
    cancel: &AtomicBool,
) -> RefineReport {
    let mut report = RefineReport::default();
    let eligible: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| is_eligible(row, options))
        .map(|(i, _)| i)
        .collect();

    tracing::info!(
        eligible = eligible.len(),
        concurrency = options.concurrency,
        "refining low-confidence rows"
    );

    for (batch_no, batch) in eligible.chunks(options.concurrency.max(1)).enumerate() {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = eligible.len() - batch_no * options.concurrency.max(1);
            tracing::warn!(remaining = report.cancelled, "refinement cancelled");
            break;
        }

        let requests: Vec<RefineRequest> = batch.iter().map(|&i| request_for(&rows[i])).collect();
        let responses = join_all(requests.into_iter().map(|r| refiner.refine(r))).await;

        for (&i, response) in batch.iter().zip(responses) {
            report.attempted += 1;
            let row = &mut rows[i];
            match response {
                Ok(ranking) => {
                    let line = match lines.get(i) {
                        Some(line) => line,
                        None => {
                            report.unchanged += 1;
                            continue;
                        }
                    };
                    if matcher.apply_ranking(row, line, &ranking) {
                        report.refined += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(row = row.line_ref.row_index, error = %err, "refinement failed");
                    row.warnings.push(format!("semantic refinement unavailable: {}", err));
                }
            }
        }
    }

    tracing::info!(
        refined = report.refined,
        unchanged = report.unchanged,
        failed = report.failed,
        "refinement complete"
    );
    report
}
