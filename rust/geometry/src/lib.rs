// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Takeoff Geometry
//!
//! Turns a parsed [`takeoff_core::Drawing`] into typed, SI-normalized
//! measurements.
//!
//! ## Pipeline
//!
//! 1. [`blocks`] flattens nested symbol placements into world geometry
//!    (nalgebra homogeneous transforms, cycle and depth guards).
//! 2. [`extract`] classifies entities and measures them into
//!    [`DetectedItem`]s, discarding lengths under the dynamic noise threshold.
//! 3. [`dedup`] removes regions and placements duplicated by format
//!    conversion.
//! 4. [`items::summarize_layers`] and [`profile`] describe each layer.
//!
//! ```rust,ignore
//! use takeoff_core::Drawing;
//! use takeoff_geometry::{extract, profile_layers, summarize_layers, Deduplicator, DedupOptions, ExtractOptions};
//!
//! let drawing = Drawing::from_bytes(&bytes)?;
//! let ex = extract(&drawing, &ExtractOptions::default());
//! let options = DedupOptions::default();
//! let (items, placements, report) = Deduplicator::new(&options).run(ex.items, ex.placements);
//! let layers = summarize_layers(&items);
//! let profiles = profile_layers(&ex.samples, ex.noise_threshold);
//! ```

pub mod blocks;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod items;
pub mod measure;
pub mod profile;
pub mod transform;

pub use nalgebra::{Matrix3, Point2, Vector2};

pub use blocks::{
    BlockResolver, Placement, Resolution, Truncation, TruncationReason, WorldEntity,
    MAX_BLOCK_DEPTH, MAX_PLACEMENTS,
};
pub use dedup::{default_annotation_patterns, DedupOptions, DedupReport, Deduplicator};
pub use error::{Error, Result};
pub use extract::{
    count_items, extract, ExtractOptions, Extraction, LayerSamples,
    DEFAULT_LENGTH_THRESHOLD_FACTOR,
};
pub use items::{summarize_layers, DetectedItem, Evidence, ItemKind, LayerSummary};
pub use profile::{
    annotation_likelihood, profile_layer, profile_layers, LayerProfile, LengthStats,
    SignalContribution, ANNOTATION_LIKELIHOOD_LIMIT,
};
pub use transform::Transform2D;
