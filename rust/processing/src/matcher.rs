// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BOQ line matching and the review state machine
//!
//! Every line yields exactly one [`StagingRow`]. The decision order is:
//!
//! 1. an `Ignore` override → `ignored`
//! 2. section header or note → `title`
//! 3. global or unmeasurable kind → `pending_semantics`
//! 4. hard kind filter over layers; nothing left → `pending_no_geometry`
//!    with suggestions and no quantity
//! 5. label restriction when the line names a callout or zone found in the
//!    drawing; dropped with a warning when no supported layer has items near
//!    the label
//! 6. best candidate too weak lexically → `pending`, no quantity
//! 7. otherwise the quantity is summed from same-kind items of the chosen
//!    layer, then generic-symbol, length-band and confidence checks decide
//!    between `approved`, `pending` and `pending_no_geometry`
//!
//! `qty_final == None` means "not measured or invalidated"; a measured zero
//! is `Some(0.0)`.

use crate::boq::{
    expected_kind, is_kind_term, is_title_line, normalize, tokenize, BoqLine, KindSource,
    MeasurementKind,
};
use crate::config::TakeoffConfig;
use crate::refine::RankedCandidate;
use crate::scoring::{
    annotation_confidence, candidate_score, is_generic_symbol_name, is_synonym_term,
    lexical_score, token_similarity, ScoreInputs,
};
use crate::validate::{check_support, Fallback, SupportStatus};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use takeoff_core::Point2D;
use takeoff_geometry::{DetectedItem, ItemKind, LayerProfile, LayerSummary};

/// A best candidate below this lexical score is not trusted without a label hit
pub const MIN_LEXICAL_SCORE: f64 = 0.3;
/// Runner-up within this score of the chosen candidate is reported as ambiguous
pub const AMBIGUITY_MARGIN: f64 = 0.05;
/// Relative deviation from a declared quantity that triggers a warning
pub const DECLARED_QTY_TOLERANCE: f64 = 0.5;
const MAX_SUGGESTED_LAYERS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    PendingNoGeometry,
    PendingSemantics,
    Title,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    /// The layer cannot supply the line's measurement kind
    TypeMismatch {
        expected: MeasurementKind,
        justification: String,
    },
    /// None of the layer's items lie near the labels named by the line
    OutsideLabelZone { labels: Vec<String> },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TypeMismatch {
                expected,
                justification,
            } => write!(f, "type mismatch: {} required, {}", expected, justification),
            RejectReason::OutsideLabelZone { labels } => {
                write!(f, "no geometry near {}", labels.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub layer: String,
    pub score: f64,
    pub rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<RejectReason>,
    pub lexical: f64,
    pub kind_support: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proximity: Option<f64>,
    /// Layer total of the expected kind, SI
    pub available: f64,
}

/// Actionable next steps for rows that could not be measured
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Suggestion {
    AlternateLayer {
        layer: String,
        kind: ItemKind,
        total: f64,
    },
    ManualEntry,
    MarkGlobal,
    DeriveAreaFromLength {
        layer: String,
        length: f64,
        height: f64,
        area: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRef {
    pub row_index: usize,
    pub description: String,
    pub unit: String,
}

/// Match result for one BOQ line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingRow {
    pub line_ref: LineRef,
    pub expected_kind: MeasurementKind,
    pub kind_source: KindSource,
    pub source_items: Vec<DetectedItem>,
    pub candidates: Vec<Candidate>,
    pub chosen_layer: Option<String>,
    /// SI quantity; `None` when unmeasured or invalidated
    pub qty_final: Option<f64>,
    pub confidence: f64,
    pub status: ReviewStatus,
    pub status_reason: String,
    pub warnings: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    /// Chosen by the semantic refiner
    pub refined: bool,
}

impl StagingRow {
    fn new(line: &BoqLine, kind: MeasurementKind, kind_source: KindSource) -> Self {
        Self {
            line_ref: LineRef {
                row_index: line.row_index,
                description: line.description.clone(),
                unit: line.unit.clone(),
            },
            expected_kind: kind,
            kind_source,
            source_items: Vec::new(),
            candidates: Vec::new(),
            chosen_layer: None,
            qty_final: None,
            confidence: 0.0,
            status: ReviewStatus::Pending,
            status_reason: String::new(),
            warnings: Vec::new(),
            suggestions: Vec::new(),
            refined: false,
        }
    }

    fn set_status(&mut self, status: ReviewStatus, reason: impl Into<String>) {
        self.status = status;
        self.status_reason = reason.into();
    }

    /// Candidates that passed every hard filter
    pub fn viable_candidates(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter().filter(|c| !c.rejected)
    }
}

/// Caller decision for one row, keyed by `row_index`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "layer", rename_all = "snake_case")]
pub enum RowOverride {
    Ignore,
    /// Only this layer may answer the line
    ForceLayer(String),
}

pub type Overrides = FxHashMap<usize, RowOverride>;

/// Labels named by a line and where they occur in the drawing
#[derive(Debug, Default)]
struct LabelContext {
    found: Vec<String>,
    missing: Vec<String>,
    /// Labels found in the drawing but with no supported geometry near them
    relaxed: Vec<String>,
    anchors: Vec<Point2D>,
}

impl LabelContext {
    fn is_active(&self) -> bool {
        !self.anchors.is_empty()
    }
}

fn callout_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b[A-Z]{1,3}-?\d{1,3}[A-Z]?\b").ok())
        .as_ref()
}

/// Callout codes compare without separators: `P-01` == `p01`
fn compact_label(text: &str) -> String {
    normalize(text).chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Text items with at most this many tokens are treated as zone labels
const MAX_ZONE_LABEL_TOKENS: usize = 3;
const MIN_ZONE_WORD_LEN: usize = 4;

struct TextLabel<'a> {
    item: &'a DetectedItem,
    tokens: Vec<String>,
    compact: Vec<String>,
}

/// Scores layers against BOQ lines over one run's items
pub struct Matcher<'a> {
    config: &'a TakeoffConfig,
    summaries: &'a BTreeMap<String, LayerSummary>,
    profiles: &'a BTreeMap<String, LayerProfile>,
    by_layer: FxHashMap<&'a str, Vec<&'a DetectedItem>>,
    texts: Vec<TextLabel<'a>>,
}

impl<'a> Matcher<'a> {
    pub fn new(
        config: &'a TakeoffConfig,
        items: &'a [DetectedItem],
        summaries: &'a BTreeMap<String, LayerSummary>,
        profiles: &'a BTreeMap<String, LayerProfile>,
    ) -> Self {
        let mut by_layer: FxHashMap<&'a str, Vec<&'a DetectedItem>> = FxHashMap::default();
        let mut texts = Vec::new();
        for item in items {
            if item.kind() == ItemKind::Text {
                texts.push(TextLabel {
                    item,
                    tokens: tokenize(item.name()),
                    compact: item
                        .name()
                        .split_whitespace()
                        .map(compact_label)
                        .filter(|t| !t.is_empty())
                        .collect(),
                });
            } else {
                by_layer.entry(item.layer()).or_default().push(item);
            }
        }
        Self {
            config,
            summaries,
            profiles,
            by_layer,
            texts,
        }
    }

    /// One row per line, in input order
    pub fn match_all(&self, lines: &[BoqLine], overrides: &Overrides) -> Vec<StagingRow> {
        lines
            .iter()
            .map(|line| {
                let row = self.match_line(line, overrides.get(&line.row_index));
                tracing::debug!(
                    row = line.row_index,
                    status = ?row.status,
                    layer = row.chosen_layer.as_deref().unwrap_or("-"),
                    confidence = row.confidence,
                    "line matched"
                );
                row
            })
            .collect()
    }

    pub fn match_line(&self, line: &BoqLine, row_override: Option<&RowOverride>) -> StagingRow {
        let (kind, kind_source) = expected_kind(line);
        let mut row = StagingRow::new(line, kind, kind_source);

        if let Some(RowOverride::Ignore) = row_override {
            row.set_status(ReviewStatus::Ignored, "ignored by override");
            return row;
        }
        if is_title_line(line) {
            row.set_status(ReviewStatus::Title, "section header or note, not measurable");
            return row;
        }

        let item_kind = match kind.item_kind() {
            Some(item_kind) => item_kind,
            None => {
                self.unmeasurable(&mut row, line, kind_source);
                return row;
            }
        };

        let forced = match row_override {
            Some(RowOverride::ForceLayer(layer)) => Some(layer.as_str()),
            _ => None,
        };
        let labels = self.resolve_labels(line, kind, forced);
        let fallbacks = self.rank_candidates(&mut row, line, kind, item_kind, forced, &labels);

        let best = row.viable_candidates().next().cloned();
        let best = match best {
            Some(best) => best,
            None => {
                self.no_geometry(&mut row, kind, forced, &labels, fallbacks);
                return row;
            }
        };

        if forced.is_none() && best.lexical < MIN_LEXICAL_SCORE && best.proximity != Some(1.0) {
            row.confidence = best.score;
            row.set_status(
                ReviewStatus::Pending,
                format!(
                    "no layer name matches the description (best: {} at {:.2})",
                    best.layer, best.lexical
                ),
            );
            let alternates: Vec<Suggestion> = row
                .viable_candidates()
                .take(MAX_SUGGESTED_LAYERS)
                .map(|c| Suggestion::AlternateLayer {
                    layer: c.layer.clone(),
                    kind: item_kind,
                    total: c.available,
                })
                .collect();
            row.suggestions = alternates;
            row.suggestions.push(Suggestion::ManualEntry);
            add_label_warnings(&mut row, &labels);
            return row;
        }

        self.finalize(&mut row, line, item_kind, &best.layer, best.score, &labels);
        row
    }

    /// Re-choose a row from an external ranking. Returns `false` when no
    /// ranked layer is a viable candidate; kind-rejected layers are never taken.
    pub fn apply_ranking(
        &self,
        row: &mut StagingRow,
        line: &BoqLine,
        ranking: &[RankedCandidate],
    ) -> bool {
        if !matches!(row.status, ReviewStatus::Pending | ReviewStatus::Approved) {
            return false;
        }
        let item_kind = match row.expected_kind.item_kind() {
            Some(kind) => kind,
            None => return false,
        };

        let mut ranking: Vec<&RankedCandidate> = ranking.iter().filter(|r| r.score.is_finite()).collect();
        ranking.sort_by(|a, b| b.score.total_cmp(&a.score));

        let chosen = ranking.iter().find_map(|ranked| {
            row.viable_candidates()
                .find(|c| c.layer == ranked.layer)
                .map(|c| (c.layer.clone(), ranked.score.clamp(0.0, 1.0)))
        });
        match chosen {
            Some((layer, score)) => {
                let labels = self.resolve_labels(line, row.expected_kind, Some(&layer));
                self.finalize(row, line, item_kind, &layer, score, &labels);
                row.refined = true;
                true
            }
            None => false,
        }
    }

    fn unmeasurable(&self, row: &mut StagingRow, line: &BoqLine, source: KindSource) {
        match (row.expected_kind, source) {
            (MeasurementKind::Global, _) => {
                row.set_status(
                    ReviewStatus::PendingSemantics,
                    "global or service line; no geometry required",
                );
                row.suggestions.push(Suggestion::ManualEntry);
            }
            (_, KindSource::Unit) => {
                row.set_status(
                    ReviewStatus::PendingSemantics,
                    format!("unit '{}' has no 2D measure", line.unit.trim()),
                );
                row.suggestions.push(Suggestion::ManualEntry);
            }
            _ => {
                row.set_status(
                    ReviewStatus::PendingSemantics,
                    "no unit and the description does not name a measurement kind",
                );
                row.suggestions.push(Suggestion::ManualEntry);
                row.suggestions.push(Suggestion::MarkGlobal);
            }
        }
    }

    /// Fill the row's candidate list; returns area fallbacks found on the way
    fn rank_candidates(
        &self,
        row: &mut StagingRow,
        line: &BoqLine,
        kind: MeasurementKind,
        item_kind: ItemKind,
        forced: Option<&str>,
        labels: &LabelContext,
    ) -> Vec<(String, f64, Fallback)> {
        let mut fallbacks = Vec::new();
        let mut candidates = Vec::new();

        for (layer, summary) in self.summaries {
            if let Some(forced) = forced {
                if !layer.eq_ignore_ascii_case(forced) {
                    continue;
                }
            }
            if summary.kinds().is_empty() {
                continue;
            }

            let check = check_support(kind, summary, self.config.wall_height);
            let lexical = lexical_score(
                &line.description,
                &self.layer_identifiers(layer, summary, item_kind),
            );
            let mut candidate = Candidate {
                layer: layer.clone(),
                score: 0.0,
                rejected: false,
                reject_reason: None,
                lexical,
                kind_support: 0.0,
                proximity: None,
                available: summary.total(item_kind),
            };

            if !check.is_supported() {
                if let SupportStatus::Fallback(fallback) = check.status {
                    fallbacks.push((layer.clone(), lexical, fallback));
                }
                candidate.rejected = true;
                candidate.reject_reason = Some(RejectReason::TypeMismatch {
                    expected: kind,
                    justification: check.justification,
                });
                candidates.push(candidate);
                continue;
            }

            candidate.kind_support = 1.0;
            if labels.is_active() {
                let near = !self.items_for(layer, item_kind, labels).is_empty();
                candidate.proximity = Some(if near { 1.0 } else { 0.0 });
                if !near {
                    candidate.rejected = true;
                    candidate.reject_reason = Some(RejectReason::OutsideLabelZone {
                        labels: labels.found.clone(),
                    });
                }
            }
            candidate.score = candidate_score(&ScoreInputs {
                lexical,
                kind_support: candidate.kind_support,
                proximity: candidate.proximity,
                annotation_confidence: annotation_confidence(self.profiles.get(layer)),
            });
            candidates.push(candidate);
        }

        candidates.sort_by(|a, b| {
            a.rejected
                .cmp(&b.rejected)
                .then(b.score.total_cmp(&a.score))
                .then(b.lexical.total_cmp(&a.lexical))
                .then(a.layer.cmp(&b.layer))
        });
        row.candidates = candidates;

        fallbacks.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        fallbacks
    }

    fn no_geometry(
        &self,
        row: &mut StagingRow,
        kind: MeasurementKind,
        forced: Option<&str>,
        labels: &LabelContext,
        fallbacks: Vec<(String, f64, Fallback)>,
    ) {
        let reason = match forced {
            Some(layer) if row.candidates.is_empty() => {
                format!("forced layer '{}' has no measured geometry", layer)
            }
            Some(layer) => format!("forced layer '{}' carries no {} geometry", layer, kind),
            None => format!("no layer carries {} geometry", kind),
        };
        row.set_status(ReviewStatus::PendingNoGeometry, reason);

        for (layer, _, fallback) in fallbacks.into_iter().take(MAX_SUGGESTED_LAYERS) {
            let Fallback::LengthTimesHeight {
                length,
                height,
                derived_area,
            } = fallback;
            row.suggestions.push(Suggestion::DeriveAreaFromLength {
                layer,
                length,
                height,
                area: derived_area,
            });
        }

        let mut alternates: Vec<&Candidate> = row
            .candidates
            .iter()
            .filter(|c| matches!(c.reject_reason, Some(RejectReason::TypeMismatch { .. })))
            .collect();
        alternates.sort_by(|a, b| b.lexical.total_cmp(&a.lexical).then(a.layer.cmp(&b.layer)));
        let alternates: Vec<Suggestion> = alternates
            .into_iter()
            .filter_map(|c| {
                let summary = self.summaries.get(&c.layer)?;
                let other = *summary.kinds().first()?;
                Some(Suggestion::AlternateLayer {
                    layer: c.layer.clone(),
                    kind: other,
                    total: summary.total(other),
                })
            })
            .take(MAX_SUGGESTED_LAYERS)
            .collect();
        row.suggestions.extend(alternates);
        row.suggestions.push(Suggestion::ManualEntry);
        row.suggestions.push(Suggestion::MarkGlobal);
        add_label_warnings(row, labels);
    }

    /// Choose `layer`, sum its same-kind items and run the status checks
    fn finalize(
        &self,
        row: &mut StagingRow,
        line: &BoqLine,
        item_kind: ItemKind,
        layer: &str,
        score: f64,
        labels: &LabelContext,
    ) {
        let items = self.items_for(layer, item_kind, labels);
        let qty: f64 = items.iter().map(|i| i.si_value()).sum();

        row.source_items = items.into_iter().cloned().collect();
        row.chosen_layer = Some(layer.to_string());
        row.qty_final = Some(qty);
        row.confidence = score;
        row.warnings.clear();
        row.suggestions.clear();

        let bands = self.config.length_bands;
        let generic_names: Vec<&str> = if item_kind == ItemKind::Count {
            let mut names: Vec<&str> = row
                .source_items
                .iter()
                .map(|i| i.name())
                .filter(|name| self.config.symbol_alias(name).is_none())
                .collect();
            names.sort_unstable();
            names.dedup();
            names
        } else {
            Vec::new()
        };

        if item_kind == ItemKind::Count
            && !row.source_items.is_empty()
            && row
                .source_items
                .iter()
                .all(|i| is_generic_symbol_name(i.name()) && self.config.symbol_alias(i.name()).is_none())
        {
            let reason = format!(
                "generic symbol names ({}) are not trustworthy evidence",
                generic_names.join(", ")
            );
            row.set_status(ReviewStatus::Pending, reason);
        } else if item_kind == ItemKind::Length && qty < bands.low {
            row.set_status(
                ReviewStatus::PendingNoGeometry,
                format!("measured length {:.2} m is below {:.2} m", qty, bands.low),
            );
        } else if item_kind == ItemKind::Length && qty < bands.marginal {
            row.warnings.push(format!(
                "length {:.2} m is in the marginal band below {:.2} m",
                qty, bands.marginal
            ));
            row.set_status(ReviewStatus::Pending, "marginal length");
        } else if item_kind == ItemKind::Length && qty > bands.implausible {
            row.warnings.push(format!(
                "length {:.0} m exceeds {:.0} m; check the drawing unit and scale",
                qty, bands.implausible
            ));
            row.set_status(ReviewStatus::Pending, "implausible length");
        } else if score >= self.config.auto_approve_confidence {
            row.set_status(
                ReviewStatus::Approved,
                format!("matched layer {} with confidence {:.2}", layer, score),
            );
        } else {
            row.set_status(
                ReviewStatus::Pending,
                format!(
                    "confidence {:.2} below {:.2}",
                    score, self.config.auto_approve_confidence
                ),
            );
        }

        let runner_up = row
            .viable_candidates()
            .find(|c| c.layer != layer)
            .map(|c| (c.layer.clone(), c.score));
        if let Some((other, other_score)) = runner_up {
            if (score - other_score).abs() <= AMBIGUITY_MARGIN {
                row.warnings.push(format!("ambiguous match: {} scores {:.2}", other, other_score));
            }
        }

        if let Some(declared) = line.declared_qty {
            if declared > 0.0 && ((qty - declared) / declared).abs() > DECLARED_QTY_TOLERANCE {
                row.warnings.push(format!(
                    "measured {:.2} deviates from declared {:.2} by more than {:.0}%",
                    qty,
                    declared,
                    DECLARED_QTY_TOLERANCE * 100.0
                ));
            }
        }

        let suspect: Vec<&DetectedItem> = row.source_items.iter().filter(|i| i.is_suspect()).collect();
        if let Some(first) = suspect.first() {
            row.warnings.push(format!(
                "{} source item(s) are suspect: {}",
                suspect.len(),
                first.suspect_reason().unwrap_or("unspecified")
            ));
        }

        add_label_warnings(row, labels);
    }

    /// Layer name plus, for count lines, its symbol names and their aliases
    fn layer_identifiers(&self, layer: &str, summary: &LayerSummary, item_kind: ItemKind) -> Vec<String> {
        let mut identifiers = vec![layer.to_string()];
        if item_kind == ItemKind::Count {
            for symbol in summary.symbols.keys() {
                identifiers.push(symbol.clone());
                if let Some(alias) = self.config.symbol_alias(symbol) {
                    identifiers.push(alias.to_string());
                }
            }
        }
        identifiers
    }

    /// Items of one kind on one layer, restricted to label zones when active
    fn items_for(&self, layer: &str, kind: ItemKind, labels: &LabelContext) -> Vec<&'a DetectedItem> {
        let radius = self.config.label_radius;
        self.by_layer
            .get(layer)
            .map(|items| {
                items
                    .iter()
                    .copied()
                    .filter(|i| i.kind() == kind)
                    .filter(|i| {
                        !labels.is_active()
                            || labels
                                .anchors
                                .iter()
                                .any(|a| a.distance_to(&i.evidence().anchor) <= radius)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Labels of a line, relaxed when restricting to them would leave no
    /// supported layer with geometry
    fn resolve_labels(&self, line: &BoqLine, kind: MeasurementKind, only_layer: Option<&str>) -> LabelContext {
        let mut labels = self.labels_for(line);
        let item_kind = match kind.item_kind() {
            Some(item_kind) if labels.is_active() => item_kind,
            _ => return labels,
        };

        let mut supported = false;
        for (layer, summary) in self.summaries {
            if only_layer.is_some_and(|only| !layer.eq_ignore_ascii_case(only)) {
                continue;
            }
            if !check_support(kind, summary, self.config.wall_height).is_supported() {
                continue;
            }
            supported = true;
            if !self.items_for(layer, item_kind, &labels).is_empty() {
                return labels;
            }
        }
        if supported {
            tracing::debug!(
                row = line.row_index,
                labels = ?labels.found,
                "no supported geometry near labels; restriction dropped"
            );
            labels.relaxed = std::mem::take(&mut labels.found);
            labels.anchors.clear();
        }
        labels
    }

    /// Layer-name, kind or synonym vocabulary; such words describe the work, not a place
    fn is_work_term(&self, word: &str) -> bool {
        is_kind_term(word)
            || is_synonym_term(word)
            || self.summaries.keys().any(|layer| {
                tokenize(layer)
                    .iter()
                    .any(|token| token_similarity(word, token) > 0.0)
            })
    }

    /// Callout codes and zone names from the description, located in the drawing text
    fn labels_for(&self, line: &BoqLine) -> LabelContext {
        let mut context = LabelContext::default();

        let callouts: Vec<String> = callout_pattern()
            .map(|re| {
                re.find_iter(&line.description)
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default();

        for callout in &callouts {
            let key = compact_label(callout);
            let hits: Vec<Point2D> = self
                .texts
                .iter()
                .filter(|t| t.compact.iter().any(|c| c == &key))
                .map(|t| t.item.evidence().anchor)
                .collect();
            if hits.is_empty() {
                context.missing.push(callout.clone());
            } else {
                context.found.push(callout.clone());
                context.anchors.extend(hits);
            }
        }

        let callout_keys: Vec<String> = callouts.iter().map(|c| compact_label(c)).collect();
        for word in tokenize(&line.description) {
            if word.chars().count() < MIN_ZONE_WORD_LEN
                || callout_keys.contains(&word)
                || self.is_work_term(&word)
            {
                continue;
            }
            let hits: Vec<Point2D> = self
                .texts
                .iter()
                .filter(|t| t.tokens.len() <= MAX_ZONE_LABEL_TOKENS && t.tokens.contains(&word))
                .map(|t| t.item.evidence().anchor)
                .collect();
            if !hits.is_empty() {
                context.found.push(word);
                context.anchors.extend(hits);
            }
        }
        context
    }
}

fn add_label_warnings(row: &mut StagingRow, labels: &LabelContext) {
    for missing in &labels.missing {
        row.warnings.push(format!("label {} not found in the drawing", missing));
    }
    if !labels.relaxed.is_empty() {
        row.warnings.push(format!(
            "no measurable geometry near {}; label restriction ignored",
            labels.relaxed.join(", ")
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use takeoff_core::DrawingUnit;
    use takeoff_geometry::{summarize_layers, Evidence};

    fn at(x: f64, y: f64) -> Evidence {
        Evidence::new("test", 1, Point2D::new(x, y))
    }

    fn length(id: &str, layer: &str, value: f64) -> DetectedItem {
        DetectedItem::length(id, layer, "line", value, DrawingUnit::Meter, at(0.0, 0.0))
    }

    fn area(id: &str, layer: &str, value: f64, x: f64) -> DetectedItem {
        DetectedItem::area(id, layer, "polyline", value, DrawingUnit::Meter, at(x, 0.0))
    }

    fn count(id: &str, layer: &str, name: &str) -> DetectedItem {
        DetectedItem::count(id, layer, name, at(0.0, 0.0))
    }

    fn text(id: &str, content: &str, x: f64, y: f64) -> DetectedItem {
        DetectedItem::text(id, "TEXT", content, at(x, y))
    }

    fn run(config: &TakeoffConfig, items: &[DetectedItem], line: &BoqLine) -> StagingRow {
        run_with(config, items, line, None)
    }

    fn run_with(
        config: &TakeoffConfig,
        items: &[DetectedItem],
        line: &BoqLine,
        row_override: Option<&RowOverride>,
    ) -> StagingRow {
        let summaries = summarize_layers(items);
        let profiles = BTreeMap::new();
        Matcher::new(config, items, &summaries, &profiles).match_line(line, row_override)
    }

    #[test]
    fn test_quantity_uses_only_expected_kind() {
        let config = TakeoffConfig::default();
        let items = vec![
            length("l1", "WALLS", 40.0),
            area("a1", "WALLS", 100.0, 5.0),
        ];
        let row = run(&config, &items, &BoqLine::new(1, "Muro perimetral", "m2"));
        assert_eq!(row.status, ReviewStatus::Approved);
        assert_eq!(row.qty_final, Some(100.0));
        assert!(row.source_items.iter().all(|i| i.kind() == ItemKind::Area));

        let row = run(&config, &items, &BoqLine::new(2, "Muro perimetral", "ml"));
        assert_eq!(row.qty_final, Some(40.0));
        assert!(row.source_items.iter().all(|i| i.kind() == ItemKind::Length));
    }

    #[test]
    fn test_wrong_kind_layers_are_rejected_outright() {
        let config = TakeoffConfig::default();
        let items = vec![length("l1", "DOORS", 12.0)];
        let row = run(&config, &items, &BoqLine::new(1, "Puertas", "und"));
        assert_eq!(row.status, ReviewStatus::PendingNoGeometry);
        assert_eq!(row.qty_final, None);
        assert!(row.candidates[0].rejected);
        assert!(matches!(
            row.candidates[0].reject_reason,
            Some(RejectReason::TypeMismatch { .. })
        ));
        assert!(row.suggestions.contains(&Suggestion::ManualEntry));
        assert!(row.suggestions.contains(&Suggestion::MarkGlobal));
        assert!(row
            .suggestions
            .iter()
            .any(|s| matches!(s, Suggestion::AlternateLayer { layer, .. } if layer == "DOORS")));
    }

    #[test]
    fn test_generic_symbols_stay_pending_unless_aliased() {
        let items = vec![count("c1", "A-DOOR", "*U5"), count("c2", "A-DOOR", "*U5")];
        let line = BoqLine::new(1, "Puertas", "und");

        let row = run(&TakeoffConfig::default(), &items, &line);
        assert_eq!(row.status, ReviewStatus::Pending);
        assert_eq!(row.qty_final, Some(2.0));
        assert!(row.status_reason.contains("generic"));

        let mut config = TakeoffConfig::default();
        config.symbol_aliases.insert("*U5".into(), "puerta".into());
        let row = run(&config, &items, &line);
        assert_eq!(row.status, ReviewStatus::Approved);
    }

    #[test]
    fn test_length_bands() {
        let config = TakeoffConfig::default();
        let line = BoqLine::new(1, "Cable", "ml");

        let row = run(&config, &[length("l", "E-CABLE", 0.3)], &line);
        assert_eq!(row.status, ReviewStatus::PendingNoGeometry);
        assert_eq!(row.qty_final, Some(0.3));

        let row = run(&config, &[length("l", "E-CABLE", 1.5)], &line);
        assert_eq!(row.status, ReviewStatus::Pending);
        assert_eq!(row.warnings.len(), 1);

        let row = run(&config, &[length("l", "E-CABLE", 60_000.0)], &line);
        assert_eq!(row.status, ReviewStatus::Pending);
        assert!(row.warnings.iter().any(|w| w.contains("scale")));

        let row = run(&config, &[length("l", "E-CABLE", 120.0)], &line);
        assert_eq!(row.status, ReviewStatus::Approved);
    }

    #[test]
    fn test_zone_label_restricts_items() {
        let config = TakeoffConfig::default();
        let items = vec![
            area("a1", "FLOOR", 20.0, 0.0),
            area("a2", "FLOOR", 30.0, 50.0),
            text("t1", "BAÑO", 1.0, 1.0),
        ];
        let row = run(&config, &items, &BoqLine::new(1, "Piso de baño", "m2"));
        assert_eq!(row.qty_final, Some(20.0));
        assert_eq!(row.candidates[0].proximity, Some(1.0));
        assert_eq!(row.status, ReviewStatus::Approved);
    }

    #[test]
    fn test_material_word_on_plan_is_not_a_zone() {
        let config = TakeoffConfig::default();
        let items = vec![
            area("a1", "WALLS", 100.0, 0.0),
            area("a2", "WALLS", 100.0, 50.0),
            text("t1", "MURO", 1.0, 1.0),
        ];
        let row = run(&config, &items, &BoqLine::new(1, "Muro perimetral", "m2"));
        assert_eq!(row.qty_final, Some(200.0));
        assert_eq!(row.source_items.len(), 2);
        assert_eq!(row.candidates[0].proximity, None);
        assert_eq!(row.status, ReviewStatus::Approved);
    }

    #[test]
    fn test_zone_without_nearby_geometry_is_relaxed() {
        let config = TakeoffConfig::default();
        let items = vec![
            area("a1", "FLOOR", 20.0, 40.0),
            area("a2", "FLOOR", 30.0, 80.0),
            text("t1", "BAÑO", 1.0, 1.0),
        ];
        let row = run(&config, &items, &BoqLine::new(1, "Piso de baño", "m2"));
        assert_eq!(row.qty_final, Some(50.0));
        assert_eq!(row.chosen_layer.as_deref(), Some("FLOOR"));
        assert!(row.candidates.iter().all(|c| !c.rejected));
        assert!(row
            .warnings
            .iter()
            .any(|w| w.contains("bano") && w.contains("ignored")));
    }

    #[test]
    fn test_missing_callout_is_reported() {
        let config = TakeoffConfig::default();
        let items = vec![count("c1", "DOORS", "PUERTA_90")];
        let row = run(&config, &items, &BoqLine::new(1, "Puerta P-07", "und"));
        assert!(row.warnings.iter().any(|w| w.contains("P-07")));
        assert_eq!(row.qty_final, Some(1.0));
    }

    #[test]
    fn test_overrides_and_titles() {
        let config = TakeoffConfig::default();
        let items = vec![area("a", "SLAB", 10.0, 0.0), area("b", "ROOMS", 12.0, 0.0)];

        let row = run_with(&config, &items, &BoqLine::new(1, "Losa", "m2"), Some(&RowOverride::Ignore));
        assert_eq!(row.status, ReviewStatus::Ignored);

        let forced = RowOverride::ForceLayer("ROOMS".into());
        let row = run_with(&config, &items, &BoqLine::new(1, "Losa", "m2"), Some(&forced));
        assert_eq!(row.chosen_layer.as_deref(), Some("ROOMS"));
        assert_eq!(row.qty_final, Some(12.0));

        let row = run(&config, &items, &BoqLine::new(2, "ESTRUCTURAS", ""));
        assert_eq!(row.status, ReviewStatus::Title);
        assert_eq!(row.qty_final, None);

        let row = run(&config, &items, &BoqLine::new(3, "Movilización de equipos", "glb"));
        assert_eq!(row.status, ReviewStatus::PendingSemantics);
        assert_eq!(row.qty_final, None);
    }

    #[test]
    fn test_weak_lexical_match_is_not_chosen() {
        let config = TakeoffConfig::default();
        let items = vec![area("a", "XREF-SITE", 500.0, 0.0)];
        let row = run(&config, &items, &BoqLine::new(1, "Pintura látex", "m2"));
        assert_eq!(row.status, ReviewStatus::Pending);
        assert_eq!(row.qty_final, None);
        assert!(row.chosen_layer.is_none());
    }

    #[test]
    fn test_declared_quantity_cross_check() {
        let config = TakeoffConfig::default();
        let items = vec![area("a", "SLAB", 10.0, 0.0)];
        let row = run(&config, &items, &BoqLine::new(1, "Losa", "m2").with_declared_qty(40.0));
        assert!(row.warnings.iter().any(|w| w.contains("declared")));
    }

    #[test]
    fn test_apply_ranking_never_picks_rejected_layers() {
        let config = TakeoffConfig::default();
        let items = vec![
            length("l", "WALL-LINES", 40.0),
            area("a", "ZONA-A", 30.0, 0.0),
            area("b", "ZONA-B", 70.0, 0.0),
        ];
        let summaries = summarize_layers(&items);
        let profiles = BTreeMap::new();
        let matcher = Matcher::new(&config, &items, &summaries, &profiles);
        let line = BoqLine::new(1, "Zona", "m2");
        let mut row = matcher.match_line(&line, None);

        let ranking = vec![
            RankedCandidate { layer: "WALL-LINES".into(), score: 0.99 },
            RankedCandidate { layer: "ZONA-B".into(), score: 0.8 },
        ];
        assert!(matcher.apply_ranking(&mut row, &line, &ranking));
        assert_eq!(row.chosen_layer.as_deref(), Some("ZONA-B"));
        assert_eq!(row.qty_final, Some(70.0));
        assert!(row.refined);

        let only_rejected = vec![RankedCandidate { layer: "WALL-LINES".into(), score: 1.0 }];
        let mut row = matcher.match_line(&line, None);
        assert!(!matcher.apply_ranking(&mut row, &line, &only_rejected));
    }
}
