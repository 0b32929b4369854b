// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layer profiling: how likely is a layer to be annotation or symbol clutter
//!
//! Five signals vote on each layer. A signal only takes part when its
//! precondition holds; the likelihood is the weighted score divided by the
//! weight of the signals that took part, and 0.5 when none did.
//!
//! | signal | weight | precondition | fires when |
//! |--------|--------|--------------|------------|
//! | short segments | 0.30 | has length samples | > 70 % of lengths are below 10 × noise |
//! | tiny median | 0.20 | has length samples | median below half the noise threshold |
//! | text share | 0.20 | has entities | value is the text share itself |
//! | scattered clusters | 0.15 | ≥ 4 anchors | clusters / entities > 0.5 |
//! | low total length | 0.15 | has length samples | total below 100 × noise |
//!
//! Clusters are groups of grid cells (20 × noise wide) touched by the layer's
//! strokes, so a continuous run of walls is one cluster however many
//! entities it is drawn with.
//!
//! All thresholds are multiples of the noise threshold, so profiles do not
//! change when a drawing is uniformly rescaled.

use crate::extract::LayerSamples;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeMap;
use takeoff_core::Point2D;

pub const WEIGHT_SHORT_SEGMENTS: f64 = 0.30;
pub const WEIGHT_TINY_MEDIAN: f64 = 0.20;
pub const WEIGHT_TEXT_SHARE: f64 = 0.20;
pub const WEIGHT_SCATTERED_CLUSTERS: f64 = 0.15;
pub const WEIGHT_LOW_TOTAL_LENGTH: f64 = 0.15;

/// A length below this multiple of the noise threshold is "short"
pub const SHORT_SEGMENT_FACTOR: f64 = 10.0;
pub const SHORT_RATIO_LIMIT: f64 = 0.7;
pub const TINY_MEDIAN_FACTOR: f64 = 0.5;
pub const CLUSTER_CELL_FACTOR: f64 = 20.0;
pub const CLUSTER_RATIO_LIMIT: f64 = 0.5;
pub const MIN_ANCHORS_FOR_CLUSTERS: usize = 4;
pub const LOW_TOTAL_LENGTH_FACTOR: f64 = 100.0;
/// Cells visited along one stroke are capped; longer strokes are sampled
const MAX_STROKE_STEPS: usize = 4096;

/// Likelihood above which a layer is treated as annotation
pub const ANNOTATION_LIKELIHOOD_LIMIT: f64 = 0.6;

/// Distribution of length contributions, meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LengthStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
}

impl LengthStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        Some(Self {
            min: sorted[0],
            max: sorted[n - 1],
            mean: sorted.iter().sum::<f64>() / n as f64,
            p50: percentile(&sorted, 0.50),
            p90: percentile(&sorted, 0.90),
            p95: percentile(&sorted, 0.95),
        })
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// One signal's part in the likelihood
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalContribution {
    pub signal: &'static str,
    pub weight: f64,
    /// 0..=1
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerProfile {
    pub layer: String,
    pub entity_types: BTreeMap<String, usize>,
    pub entity_count: usize,
    pub segment_count: usize,
    pub total_length: f64,
    pub lengths: Option<LengthStats>,
    pub short_segment_ratio: f64,
    pub cluster_count: usize,
    pub annotation_likelihood: f64,
    pub confidence: f64,
    pub likely_annotation: bool,
    /// Signals that took part
    pub signals: Vec<SignalContribution>,
}

/// Build the profile of every sampled layer
pub fn profile_layers(
    samples: &BTreeMap<String, LayerSamples>,
    noise_threshold: f64,
) -> BTreeMap<String, LayerProfile> {
    samples
        .iter()
        .map(|(layer, s)| (layer.clone(), profile_layer(layer, s, noise_threshold)))
        .collect()
}

pub fn profile_layer(layer: &str, samples: &LayerSamples, noise_threshold: f64) -> LayerProfile {
    let lengths = LengthStats::from_samples(&samples.segment_lengths);
    let segment_count = samples.segment_lengths.len();
    let total_length: f64 = samples.segment_lengths.iter().sum();

    let short_limit = noise_threshold * SHORT_SEGMENT_FACTOR;
    let short_segment_ratio = if segment_count > 0 {
        samples
            .segment_lengths
            .iter()
            .filter(|&&l| l < short_limit)
            .count() as f64
            / segment_count as f64
    } else {
        0.0
    };

    let cluster_count = estimate_clusters(&samples.strokes, noise_threshold * CLUSTER_CELL_FACTOR);

    let mut signals = Vec::new();
    if let Some(stats) = &lengths {
        signals.push(SignalContribution {
            signal: "short_segments",
            weight: WEIGHT_SHORT_SEGMENTS,
            value: flag(short_segment_ratio > SHORT_RATIO_LIMIT),
        });
        signals.push(SignalContribution {
            signal: "tiny_median",
            weight: WEIGHT_TINY_MEDIAN,
            value: flag(stats.p50 < noise_threshold * TINY_MEDIAN_FACTOR),
        });
    }
    if samples.entities > 0 {
        signals.push(SignalContribution {
            signal: "text_share",
            weight: WEIGHT_TEXT_SHARE,
            value: samples.text_entities as f64 / samples.entities as f64,
        });
    }
    if samples.anchors.len() >= MIN_ANCHORS_FOR_CLUSTERS {
        let ratio = cluster_count as f64 / samples.anchors.len() as f64;
        signals.push(SignalContribution {
            signal: "scattered_clusters",
            weight: WEIGHT_SCATTERED_CLUSTERS,
            value: flag(ratio > CLUSTER_RATIO_LIMIT),
        });
    }
    if segment_count > 0 {
        signals.push(SignalContribution {
            signal: "low_total_length",
            weight: WEIGHT_LOW_TOTAL_LENGTH,
            value: flag(total_length < noise_threshold * LOW_TOTAL_LENGTH_FACTOR),
        });
    }

    let annotation_likelihood = annotation_likelihood(&signals);

    LayerProfile {
        layer: layer.to_string(),
        entity_types: samples.entity_types.clone(),
        entity_count: samples.entities,
        segment_count,
        total_length,
        lengths,
        short_segment_ratio,
        cluster_count,
        annotation_likelihood,
        confidence: (annotation_likelihood - 0.5).abs() * 2.0,
        likely_annotation: annotation_likelihood > ANNOTATION_LIKELIHOOD_LIMIT,
        signals,
    }
}

/// Weighted score over the applicable signals; 0.5 when none apply
pub fn annotation_likelihood(signals: &[SignalContribution]) -> f64 {
    let total_weight: f64 = signals.iter().map(|s| s.weight).sum();
    if total_weight <= 0.0 {
        return 0.5;
    }
    let score: f64 = signals.iter().map(|s| s.weight * s.value).sum();
    (score / total_weight).clamp(0.0, 1.0)
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// Count groups of grid cells touched by the strokes and connected through
/// their 8-neighbourhood
fn estimate_clusters(strokes: &[[Point2D; 2]], cell: f64) -> usize {
    if strokes.is_empty() {
        return 0;
    }
    if cell.is_nan() || cell <= 0.0 {
        return 1;
    }

    let cell_of = |p: Point2D| ((p.x / cell).floor() as i64, (p.y / cell).floor() as i64);
    let mut occupied: FxHashSet<(i64, i64)> = FxHashSet::default();
    for [a, b] in strokes.iter().filter(|[a, b]| a.is_finite() && b.is_finite()) {
        // half-cell steps never skip a cell
        let steps = ((a.distance_to(b) / (cell * 0.5)).ceil() as usize).clamp(1, MAX_STROKE_STEPS);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            occupied.insert(cell_of(Point2D::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)));
        }
    }

    let mut seen: FxHashSet<(i64, i64)> = FxHashSet::default();
    let mut clusters = 0;
    for &start in &occupied {
        if !seen.insert(start) {
            continue;
        }
        clusters += 1;
        let mut stack = vec![start];
        while let Some((cx, cy)) = stack.pop() {
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let next = (cx + dx, cy + dy);
                    if occupied.contains(&next) && seen.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }
    }
    clusters
}
