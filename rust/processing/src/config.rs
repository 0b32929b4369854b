// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Takeoff configuration, loaded from `TAKEOFF_*` environment variables or JSON.
//!
//! A configuration is immutable once loaded; runs receive it by reference.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use takeoff_core::DrawingUnit;
use takeoff_geometry::{
    default_annotation_patterns, DedupOptions, ExtractOptions, DEFAULT_LENGTH_THRESHOLD_FACTOR,
    MAX_BLOCK_DEPTH, MAX_PLACEMENTS,
};

/// Largest allowed refinement fan-out
pub const MAX_REFINE_CONCURRENCY: usize = 10;

/// Sanity bands for length quantities, meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthBands {
    /// Below this the line has no usable geometry
    pub low: f64,
    /// Below this the quantity is kept but flagged
    pub marginal: f64,
    /// Above this the drawing scale is probably wrong
    pub implausible: f64,
}

impl Default for LengthBands {
    fn default() -> Self {
        Self {
            low: 0.5,
            marginal: 2.0,
            implausible: 50_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeoffConfig {
    /// Overrides the unit declared in the drawing header
    #[serde(deserialize_with = "unit_from_name")]
    pub preferred_unit: Option<DrawingUnit>,
    /// Guess the unit from extents when neither preference nor header gives one
    pub infer_unit_from_extents: bool,
    /// Height used to derive wall area from length, meters
    pub wall_height: f64,
    /// Noise threshold = bounding-box diagonal × factor
    pub length_threshold_factor: f64,
    /// Placement merge tolerance, meters
    pub dedup_tolerance: f64,
    pub area_rounding_decimals: u32,
    pub max_block_depth: usize,
    /// Cap on expanded symbol placements; the rest are reported as truncated
    pub max_placements: usize,
    pub auto_approve_confidence: f64,
    pub length_bands: LengthBands,
    /// Radius around a matched label that counts as "near", meters
    pub label_radius: f64,
    pub annotation_layer_patterns: Vec<String>,
    pub infrastructure_layer_patterns: Vec<String>,
    /// Project-specific symbol name → term (e.g. `"P1" → "puerta"`)
    pub symbol_aliases: BTreeMap<String, String>,
    pub refine_confidence_below: f64,
    pub refine_concurrency: usize,
}

impl Default for TakeoffConfig {
    fn default() -> Self {
        let extract = ExtractOptions::default();
        Self {
            preferred_unit: None,
            infer_unit_from_extents: false,
            wall_height: 2.5,
            length_threshold_factor: DEFAULT_LENGTH_THRESHOLD_FACTOR,
            dedup_tolerance: 0.01,
            area_rounding_decimals: 4,
            max_block_depth: MAX_BLOCK_DEPTH,
            max_placements: MAX_PLACEMENTS,
            auto_approve_confidence: 0.75,
            length_bands: LengthBands::default(),
            label_radius: 3.0,
            annotation_layer_patterns: default_annotation_patterns(),
            infrastructure_layer_patterns: extract.infrastructure_layer_patterns,
            symbol_aliases: BTreeMap::new(),
            refine_confidence_below: 0.6,
            refine_concurrency: 5,
        }
    }
}

impl TakeoffConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let bands = defaults.length_bands;
        Self {
            preferred_unit: std::env::var("TAKEOFF_PREFERRED_UNIT")
                .ok()
                .and_then(|v| DrawingUnit::parse(&v)),
            infer_unit_from_extents: env_or("TAKEOFF_INFER_UNIT", defaults.infer_unit_from_extents),
            wall_height: env_or("TAKEOFF_WALL_HEIGHT", defaults.wall_height),
            length_threshold_factor: env_or(
                "TAKEOFF_LENGTH_THRESHOLD_FACTOR",
                defaults.length_threshold_factor,
            ),
            dedup_tolerance: env_or("TAKEOFF_DEDUP_TOLERANCE", defaults.dedup_tolerance),
            area_rounding_decimals: env_or(
                "TAKEOFF_AREA_ROUNDING_DECIMALS",
                defaults.area_rounding_decimals,
            ),
            max_block_depth: env_or("TAKEOFF_MAX_BLOCK_DEPTH", defaults.max_block_depth),
            max_placements: env_or("TAKEOFF_MAX_PLACEMENTS", defaults.max_placements),
            auto_approve_confidence: env_or(
                "TAKEOFF_AUTO_APPROVE_CONFIDENCE",
                defaults.auto_approve_confidence,
            ),
            length_bands: LengthBands {
                low: env_or("TAKEOFF_LENGTH_LOW", bands.low),
                marginal: env_or("TAKEOFF_LENGTH_MARGINAL", bands.marginal),
                implausible: env_or("TAKEOFF_LENGTH_IMPLAUSIBLE", bands.implausible),
            },
            label_radius: env_or("TAKEOFF_LABEL_RADIUS", defaults.label_radius),
            annotation_layer_patterns: env_list("TAKEOFF_ANNOTATION_LAYERS")
                .unwrap_or(defaults.annotation_layer_patterns),
            infrastructure_layer_patterns: env_list("TAKEOFF_INFRASTRUCTURE_LAYERS")
                .unwrap_or(defaults.infrastructure_layer_patterns),
            symbol_aliases: defaults.symbol_aliases,
            refine_confidence_below: env_or(
                "TAKEOFF_REFINE_CONFIDENCE_BELOW",
                defaults.refine_confidence_below,
            ),
            refine_concurrency: env_or("TAKEOFF_REFINE_CONCURRENCY", defaults.refine_concurrency),
        }
    }

    /// Parse a JSON document; absent fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validated()
    }

    /// Check ranges and normalize values that have a safe clamp
    pub fn validated(mut self) -> Result<Self> {
        if !(self.wall_height.is_finite() && self.wall_height > 0.0) {
            return Err(Error::config(format!("wall_height must be positive, got {}", self.wall_height)));
        }
        if !(self.length_threshold_factor >= 0.0 && self.length_threshold_factor < 1.0) {
            return Err(Error::config(format!(
                "length_threshold_factor must be in [0, 1), got {}",
                self.length_threshold_factor
            )));
        }
        if !(self.dedup_tolerance.is_finite() && self.dedup_tolerance >= 0.0) {
            return Err(Error::config("dedup_tolerance must be a non-negative distance"));
        }
        if !(0.0..=1.0).contains(&self.auto_approve_confidence) {
            return Err(Error::config("auto_approve_confidence must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.refine_confidence_below) {
            return Err(Error::config("refine_confidence_below must be in [0, 1]"));
        }
        let bands = self.length_bands;
        if !(bands.low >= 0.0 && bands.low <= bands.marginal && bands.marginal < bands.implausible) {
            return Err(Error::config(format!(
                "length bands must satisfy 0 <= low <= marginal < implausible, got {:?}",
                bands
            )));
        }
        if !(self.label_radius.is_finite() && self.label_radius >= 0.0) {
            return Err(Error::config("label_radius must be a non-negative distance"));
        }
        if self.area_rounding_decimals > 9 {
            return Err(Error::config("area_rounding_decimals must be at most 9"));
        }
        if self.max_block_depth == 0 {
            self.max_block_depth = 1;
        }
        if self.max_placements == 0 {
            self.max_placements = 1;
        }
        self.refine_concurrency = self.refine_concurrency.clamp(1, MAX_REFINE_CONCURRENCY);
        for pattern in self
            .annotation_layer_patterns
            .iter_mut()
            .chain(self.infrastructure_layer_patterns.iter_mut())
        {
            *pattern = pattern.to_lowercase();
        }
        Ok(self)
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            preferred_unit: self.preferred_unit,
            infer_unit_from_extents: self.infer_unit_from_extents,
            length_threshold_factor: self.length_threshold_factor,
            max_block_depth: self.max_block_depth,
            max_placements: self.max_placements,
            infrastructure_layer_patterns: self.infrastructure_layer_patterns.clone(),
        }
    }

    pub fn dedup_options(&self) -> DedupOptions {
        DedupOptions {
            tolerance: self.dedup_tolerance,
            area_decimals: self.area_rounding_decimals,
            annotation_layer_patterns: self.annotation_layer_patterns.clone(),
        }
    }

    /// Alias term for a symbol name, case-insensitive
    pub fn symbol_alias(&self, name: &str) -> Option<&str> {
        self.symbol_aliases
            .iter()
            .find(|(symbol, _)| symbol.eq_ignore_ascii_case(name))
            .map(|(_, term)| term.as_str())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list
fn env_list(name: &str) -> Option<Vec<String>> {
    let raw = std::env::var(name).ok()?;
    Some(
        raw.split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}

fn unit_from_name<'de, D>(deserializer: D) -> std::result::Result<Option<DrawingUnit>, D::Error>
where
    D: Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    match name {
        None => Ok(None),
        Some(name) => DrawingUnit::parse(&name)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown drawing unit '{}'", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TakeoffConfig::default();
        assert_eq!(config.wall_height, 2.5);
        assert_eq!(config.max_block_depth, 5);
        assert_eq!(config.auto_approve_confidence, 0.75);
        assert_eq!(config.length_bands.low, 0.5);
        assert_eq!(config.refine_concurrency, 5);
        assert!(config.preferred_unit.is_none());
    }

    #[test]
    fn test_json_partial_document() {
        let config = TakeoffConfig::from_json_str(
            r#"{ "preferred_unit": "mm", "wall_height": 3.0, "refine_concurrency": 40,
                 "symbol_aliases": { "P1": "puerta" } }"#,
        )
        .unwrap();
        assert_eq!(config.preferred_unit, Some(DrawingUnit::Millimeter));
        assert_eq!(config.wall_height, 3.0);
        assert_eq!(config.refine_concurrency, MAX_REFINE_CONCURRENCY);
        assert_eq!(config.symbol_alias("p1"), Some("puerta"));
        assert_eq!(config.dedup_tolerance, 0.01);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(TakeoffConfig::from_json_str(r#"{ "wall_height": -1 }"#).is_err());
        assert!(TakeoffConfig::from_json_str(r#"{ "preferred_unit": "furlong" }"#).is_err());
        let err = TakeoffConfig::from_json_str(
            r#"{ "length_bands": { "low": 5.0, "marginal": 2.0 } }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("length bands"));
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("TAKEOFF_WALL_HEIGHT", "2.8");
        std::env::set_var("TAKEOFF_PREFERRED_UNIT", "cm");
        let config = TakeoffConfig::from_env();
        std::env::remove_var("TAKEOFF_WALL_HEIGHT");
        std::env::remove_var("TAKEOFF_PREFERRED_UNIT");
        assert_eq!(config.wall_height, 2.8);
        assert_eq!(config.preferred_unit, Some(DrawingUnit::Centimeter));
        assert_eq!(config.label_radius, 3.0);
    }
}
