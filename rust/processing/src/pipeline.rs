// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end takeoff run: drawing bytes + BOQ lines → staging rows.
//!
//! ```text
//! decode → parse → flatten/measure → dedup → count → summarize → profile → match [→ refine]
//! ```
//!
//! A run holds no state beyond its own inputs; the same pipeline value can
//! serve concurrent runs.

use crate::boq::BoqLine;
use crate::config::TakeoffConfig;
use crate::error::Result;
use crate::matcher::{Matcher, Overrides, ReviewStatus, StagingRow};
use crate::refine::{refine_rows, RefineOptions, RefineReport, SemanticRefiner};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use takeoff_core::{Drawing, SkippedEntity, TextEncoding, UnitResolution};
use takeoff_geometry::{
    count_items, extract, profile_layers, summarize_layers, DedupReport, Deduplicator,
    DetectedItem, ItemKind, LayerProfile, LayerSummary, Truncation,
};

/// Counters and timings of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<TextEncoding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitResolution>,
    /// Meters
    pub noise_threshold: f64,
    pub entities: usize,
    pub blocks: usize,
    /// Entities after symbol expansion
    pub world_entities: usize,
    pub hidden_entities: usize,
    pub skipped_entities: usize,
    /// Recognized but unmeasured entity types
    pub ignored_types: BTreeMap<String, usize>,
    pub truncations: usize,
    pub noise_discarded: usize,
    pub circles_ignored: usize,
    pub dedup: DedupReport,
    pub items_by_kind: BTreeMap<ItemKind, usize>,
    pub rows_by_status: BTreeMap<ReviewStatus, usize>,
    pub parse_time_ms: u64,
    pub extract_time_ms: u64,
    pub match_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine_time_ms: Option<u64>,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refine: Option<RefineReport>,
}

/// Everything learned from a drawing before any BOQ line is considered
#[derive(Debug, Clone)]
pub struct DrawingAnalysis {
    pub items: Vec<DetectedItem>,
    pub layers: BTreeMap<String, LayerSummary>,
    pub profiles: BTreeMap<String, LayerProfile>,
    pub skipped: Vec<SkippedEntity>,
    pub truncations: Vec<Truncation>,
    pub stats: ProcessingStats,
}

impl DrawingAnalysis {
    pub fn matcher<'a>(&'a self, config: &'a TakeoffConfig) -> Matcher<'a> {
        Matcher::new(config, &self.items, &self.layers, &self.profiles)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeoffReport {
    /// One row per input line, in input order
    pub rows: Vec<StagingRow>,
    pub items: Vec<DetectedItem>,
    pub layers: BTreeMap<String, LayerSummary>,
    pub profiles: BTreeMap<String, LayerProfile>,
    pub skipped: Vec<SkippedEntity>,
    pub truncations: Vec<Truncation>,
    pub stats: ProcessingStats,
}

impl TakeoffReport {
    fn new(analysis: DrawingAnalysis, rows: Vec<StagingRow>) -> Self {
        let mut stats = analysis.stats;
        stats.rows_by_status = status_counts(&rows);
        Self {
            rows,
            items: analysis.items,
            layers: analysis.layers,
            profiles: analysis.profiles,
            skipped: analysis.skipped,
            truncations: analysis.truncations,
            stats,
        }
    }

    /// Rows with a trusted quantity
    pub fn approved(&self) -> impl Iterator<Item = &StagingRow> {
        self.rows.iter().filter(|r| r.status == ReviewStatus::Approved)
    }

    pub fn row(&self, row_index: usize) -> Option<&StagingRow> {
        self.rows.iter().find(|r| r.line_ref.row_index == row_index)
    }
}

fn status_counts(rows: &[StagingRow]) -> BTreeMap<ReviewStatus, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.status).or_insert(0) += 1;
    }
    counts
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Runs takeoffs with one immutable configuration
#[derive(Debug, Clone)]
pub struct TakeoffPipeline {
    config: Arc<TakeoffConfig>,
}

impl TakeoffPipeline {
    pub fn new(config: TakeoffConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn with_shared_config(config: Arc<TakeoffConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TakeoffConfig {
        &self.config
    }

    /// Full run over raw drawing bytes. Fails only when the drawing cannot be
    /// decoded or parsed.
    pub fn run(&self, bytes: &[u8], lines: &[BoqLine], overrides: &Overrides) -> Result<TakeoffReport> {
        let total_start = Instant::now();
        let (drawing, parse_time_ms) = self.parse(bytes)?;
        let mut analysis = self.analyze(&drawing);
        analysis.stats.parse_time_ms = parse_time_ms;

        let match_start = Instant::now();
        let rows = analysis.matcher(&self.config).match_all(lines, overrides);
        analysis.stats.match_time_ms = elapsed_ms(match_start);
        analysis.stats.total_time_ms = elapsed_ms(total_start);

        let report = TakeoffReport::new(analysis, rows);
        log_summary(&report);
        Ok(report)
    }

    /// Match against an already parsed drawing
    pub fn run_drawing(&self, drawing: &Drawing, lines: &[BoqLine], overrides: &Overrides) -> TakeoffReport {
        let total_start = Instant::now();
        let mut analysis = self.analyze(drawing);

        let match_start = Instant::now();
        let rows = analysis.matcher(&self.config).match_all(lines, overrides);
        analysis.stats.match_time_ms = elapsed_ms(match_start);
        analysis.stats.total_time_ms = elapsed_ms(total_start);

        let report = TakeoffReport::new(analysis, rows);
        log_summary(&report);
        report
    }

    /// Full run followed by semantic refinement of low-confidence rows
    pub async fn run_with_refiner(
        &self,
        bytes: &[u8],
        lines: &[BoqLine],
        overrides: &Overrides,
        refiner: &dyn SemanticRefiner,
        cancel: &AtomicBool,
    ) -> Result<TakeoffReport> {
        let total_start = Instant::now();
        let (drawing, parse_time_ms) = self.parse(bytes)?;
        let mut analysis = self.analyze(&drawing);
        analysis.stats.parse_time_ms = parse_time_ms;

        let match_start = Instant::now();
        let matcher = analysis.matcher(&self.config);
        let mut rows = matcher.match_all(lines, overrides);
        let match_time_ms = elapsed_ms(match_start);

        let refine_start = Instant::now();
        let options = RefineOptions::from_config(&self.config);
        let refine_report = refine_rows(&matcher, lines, &mut rows, refiner, &options, cancel).await;
        let refine_time_ms = elapsed_ms(refine_start);

        analysis.stats.match_time_ms = match_time_ms;
        analysis.stats.refine_time_ms = Some(refine_time_ms);
        analysis.stats.refine = Some(refine_report);
        analysis.stats.total_time_ms = elapsed_ms(total_start);

        let report = TakeoffReport::new(analysis, rows);
        log_summary(&report);
        Ok(report)
    }

    fn parse(&self, bytes: &[u8]) -> Result<(Drawing, u64)> {
        let parse_start = Instant::now();
        tracing::info!(size = bytes.len(), "Starting drawing parse");
        let drawing = Drawing::from_bytes(bytes)?;
        let parse_time_ms = elapsed_ms(parse_start);
        for skipped in &drawing.skipped {
            tracing::warn!(
                entity = %skipped.entity_type,
                line = skipped.line,
                layer = skipped.layer.as_deref().unwrap_or("-"),
                reason = %skipped.reason,
                "entity skipped"
            );
        }
        tracing::info!(
            entities = drawing.entities.len(),
            blocks = drawing.blocks.len(),
            layers = drawing.layers.len(),
            skipped = drawing.skipped.len(),
            encoding = ?drawing.encoding,
            parse_time_ms,
            "Parse phase complete"
        );
        Ok((drawing, parse_time_ms))
    }

    /// Measure, deduplicate and profile a drawing
    pub fn analyze(&self, drawing: &Drawing) -> DrawingAnalysis {
        let extract_start = Instant::now();
        let extraction = extract(drawing, &self.config.extract_options());

        let dedup_options = self.config.dedup_options();
        let (mut items, placements, dedup) =
            Deduplicator::new(&dedup_options).run(extraction.items, extraction.placements);
        items.extend(count_items(&placements));

        let layers = summarize_layers(&items);
        let profiles = profile_layers(&extraction.samples, extraction.noise_threshold);

        let mut items_by_kind = BTreeMap::new();
        for item in &items {
            *items_by_kind.entry(item.kind()).or_insert(0) += 1;
        }

        let stats = ProcessingStats {
            encoding: Some(drawing.encoding),
            unit: Some(extraction.unit),
            noise_threshold: extraction.noise_threshold,
            entities: drawing.entities.len(),
            blocks: drawing.blocks.len(),
            world_entities: extraction.world_entities,
            hidden_entities: extraction.hidden_entities,
            skipped_entities: extraction.skipped.len(),
            ignored_types: drawing
                .ignored_types
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            truncations: extraction.truncations.len(),
            noise_discarded: extraction.noise_discarded,
            circles_ignored: extraction.circles_ignored,
            dedup,
            items_by_kind,
            extract_time_ms: elapsed_ms(extract_start),
            ..Default::default()
        };

        tracing::info!(
            items = items.len(),
            layers = layers.len(),
            placements = placements.len(),
            duplicates = dedup.total(),
            unit = %extraction.unit.unit,
            extract_time_ms = stats.extract_time_ms,
            "Extraction complete"
        );
        for profile in profiles.values().filter(|p| p.likely_annotation) {
            tracing::debug!(
                layer = %profile.layer,
                likelihood = profile.annotation_likelihood,
                "layer profiled as annotation"
            );
        }

        DrawingAnalysis {
            items,
            layers,
            profiles,
            skipped: extraction.skipped,
            truncations: extraction.truncations,
            stats,
        }
    }
}

fn log_summary(report: &TakeoffReport) {
    let status = |s: ReviewStatus| report.stats.rows_by_status.get(&s).copied().unwrap_or(0);
    tracing::info!(
        rows = report.rows.len(),
        approved = status(ReviewStatus::Approved),
        pending = status(ReviewStatus::Pending),
        no_geometry = status(ReviewStatus::PendingNoGeometry),
        semantics = status(ReviewStatus::PendingSemantics),
        total_time_ms = report.stats.total_time_ms,
        "Takeoff complete"
    );
}
