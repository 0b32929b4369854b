// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detected items and per-layer totals
//!
//! A [`DetectedItem`] is one measured fact. Its SI value is computed once,
//! in the constructor, from the raw value and the drawing unit; fields are
//! private so kind, unit and value cannot drift apart afterwards. The only
//! mutation allowed is the suspect annotation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use takeoff_core::{to_si_area, to_si_length, DrawingUnit, Point2D};

/// What an item measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Length,
    Area,
    Count,
    /// Annotation content; value is always zero
    Text,
}

impl ItemKind {
    /// Unit of `si_value`
    pub fn si_unit(self) -> &'static str {
        match self {
            ItemKind::Length => "m",
            ItemKind::Area => "m2",
            ItemKind::Count => "u",
            ItemKind::Text => "",
        }
    }

    pub fn is_measure(self) -> bool {
        !matches!(self, ItemKind::Text)
    }
}

/// Where an item came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Source entity type tag (`line`, `polyline`, `insert`, ...)
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Line of the source entity in the drawing text
    pub line: usize,
    /// Chain of symbol names the entity was reached through
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block_path: Vec<String>,
    /// Representative point, in meters
    pub anchor: Point2D,
    /// Normalized vertex signature of closed regions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<u64>,
    /// Placements collapsed into this one by deduplication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<u32>,
}

impl Evidence {
    pub fn new(entity_type: impl Into<String>, line: usize, anchor: Point2D) -> Self {
        Self {
            entity_type: entity_type.into(),
            handle: None,
            line,
            block_path: Vec::new(),
            anchor,
            signature: None,
            merged: None,
        }
    }
}

/// One typed, unit-normalized measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedItem {
    id: String,
    kind: ItemKind,
    layer: String,
    name: String,
    raw_value: f64,
    raw_unit: String,
    si_value: f64,
    evidence: Evidence,
    suspect: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    suspect_reason: Option<String>,
}

impl DetectedItem {
    /// Length item; `raw` is in drawing units
    pub fn length(
        id: impl Into<String>,
        layer: impl Into<String>,
        name: impl Into<String>,
        raw: f64,
        unit: DrawingUnit,
        evidence: Evidence,
    ) -> Self {
        Self::build(
            id,
            ItemKind::Length,
            layer,
            name,
            raw,
            unit.symbol().to_string(),
            to_si_length(raw, unit),
            evidence,
        )
    }

    /// Area item; `raw` is in squared drawing units
    pub fn area(
        id: impl Into<String>,
        layer: impl Into<String>,
        name: impl Into<String>,
        raw: f64,
        unit: DrawingUnit,
        evidence: Evidence,
    ) -> Self {
        Self::build(
            id,
            ItemKind::Area,
            layer,
            name,
            raw,
            format!("{}2", unit.symbol()),
            to_si_area(raw, unit),
            evidence,
        )
    }

    /// One symbol placement
    pub fn count(
        id: impl Into<String>,
        layer: impl Into<String>,
        name: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self::build(id, ItemKind::Count, layer, name, 1.0, "u".to_string(), 1.0, evidence)
    }

    /// Annotation text, kept for label correlation only
    pub fn text(
        id: impl Into<String>,
        layer: impl Into<String>,
        content: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self::build(id, ItemKind::Text, layer, content, 0.0, String::new(), 0.0, evidence)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        id: impl Into<String>,
        kind: ItemKind,
        layer: impl Into<String>,
        name: impl Into<String>,
        raw_value: f64,
        raw_unit: String,
        si_value: f64,
        evidence: Evidence,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            layer: layer.into(),
            name: name.into(),
            raw_value,
            raw_unit,
            si_value,
            evidence,
            suspect: false,
            suspect_reason: None,
        }
    }

    pub fn mark_suspect(&mut self, reason: impl Into<String>) {
        self.suspect = true;
        self.suspect_reason = Some(reason.into());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Entity type for geometry, symbol name for counts, content for text
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_value(&self) -> f64 {
        self.raw_value
    }

    pub fn raw_unit(&self) -> &str {
        &self.raw_unit
    }

    pub fn si_value(&self) -> f64 {
        self.si_value
    }

    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    pub fn is_suspect(&self) -> bool {
        self.suspect
    }

    pub fn suspect_reason(&self) -> Option<&str> {
        self.suspect_reason.as_deref()
    }
}

/// Aggregated totals for one layer, in SI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerSummary {
    pub name: String,
    pub length: f64,
    pub area: f64,
    pub count: u64,
    /// Placements per symbol name
    pub symbols: BTreeMap<String, u64>,
    pub text_items: usize,
    pub suspect_items: usize,
}

impl LayerSummary {
    pub fn total(&self, kind: ItemKind) -> f64 {
        match kind {
            ItemKind::Length => self.length,
            ItemKind::Area => self.area,
            ItemKind::Count => self.count as f64,
            ItemKind::Text => 0.0,
        }
    }

    /// Measured kinds present on the layer
    pub fn kinds(&self) -> Vec<ItemKind> {
        let mut kinds = Vec::new();
        if self.length > 0.0 {
            kinds.push(ItemKind::Length);
        }
        if self.area > 0.0 {
            kinds.push(ItemKind::Area);
        }
        if self.count > 0 {
            kinds.push(ItemKind::Count);
        }
        kinds
    }
}

/// Per-layer totals from the final item list. Text never adds to a measure.
pub fn summarize_layers(items: &[DetectedItem]) -> BTreeMap<String, LayerSummary> {
    let mut layers: BTreeMap<String, LayerSummary> = BTreeMap::new();
    for item in items {
        let summary = layers
            .entry(item.layer().to_string())
            .or_insert_with(|| LayerSummary {
                name: item.layer().to_string(),
                ..Default::default()
            });
        match item.kind() {
            ItemKind::Length => summary.length += item.si_value(),
            ItemKind::Area => summary.area += item.si_value(),
            ItemKind::Count => {
                summary.count += 1;
                *summary.symbols.entry(item.name().to_string()).or_insert(0) += 1;
            }
            ItemKind::Text => summary.text_items += 1,
        }
        if item.is_suspect() {
            summary.suspect_items += 1;
        }
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_si_value_matches_kind() {
        let ev = Evidence::new("line", 1, Point2D::ORIGIN);
        let len = DetectedItem::length("a", "WALLS", "line", 2500.0, DrawingUnit::Millimeter, ev.clone());
        assert_eq!(len.kind(), ItemKind::Length);
        assert_eq!(len.raw_unit(), "mm");
        assert_relative_eq!(len.si_value(), 2.5);

        let area = DetectedItem::area("b", "SLAB", "hatch", 1_000_000.0, DrawingUnit::Millimeter, ev.clone());
        assert_eq!(area.raw_unit(), "mm2");
        assert_relative_eq!(area.si_value(), 1.0);

        let text = DetectedItem::text("c", "TEXT", "BAÑO", ev);
        assert_eq!(text.si_value(), 0.0);
    }

    #[test]
    fn test_summary_keeps_kinds_apart() {
        let ev = Evidence::new("x", 1, Point2D::ORIGIN);
        let items = vec![
            DetectedItem::length("1", "L", "line", 3.0, DrawingUnit::Meter, ev.clone()),
            DetectedItem::area("2", "L", "hatch", 4.0, DrawingUnit::Meter, ev.clone()),
            DetectedItem::count("3", "L", "DOOR", ev.clone()),
            DetectedItem::count("4", "L", "DOOR", ev.clone()),
            DetectedItem::text("5", "L", "A-1", ev),
        ];
        let layers = summarize_layers(&items);
        let l = &layers["L"];
        assert_eq!(l.length, 3.0);
        assert_eq!(l.area, 4.0);
        assert_eq!(l.count, 2);
        assert_eq!(l.symbols["DOOR"], 2);
        assert_eq!(l.text_items, 1);
        assert_eq!(l.kinds(), vec![ItemKind::Length, ItemKind::Area, ItemKind::Count]);
    }
}
