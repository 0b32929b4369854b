// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Removal of geometry duplicated by format conversion
//!
//! - Pass A drops closed regions repeated on the same layer: same rounded
//!   area, centroids within the tolerance, same vertex signature.
//! - Pass B drops area copies on annotation/import layers when a real
//!   layer carries the same rounded area.
//! - Placements of the same symbol on the same layer within the tolerance
//!   merge into one entry that records how many it absorbed.
//!
//! Every pass is idempotent: a second run over its own output removes nothing.

use crate::blocks::Placement;
use crate::items::{DetectedItem, ItemKind};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use takeoff_core::Point2D;

#[derive(Debug, Clone)]
pub struct DedupOptions {
    /// Position tolerance in meters
    pub tolerance: f64,
    /// Decimal places kept when comparing areas (m²)
    pub area_decimals: u32,
    /// Lowercase substrings marking annotation/import layers
    pub annotation_layer_patterns: Vec<String>,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            area_decimals: 4,
            annotation_layer_patterns: default_annotation_patterns(),
        }
    }
}

pub fn default_annotation_patterns() -> Vec<String> {
    [
        "import", "anno", "defpoints", "text", "texto", "cota", "dim", "xref", "$0$", "tmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub same_layer_regions: usize,
    pub cross_layer_regions: usize,
    pub merged_placements: usize,
}

impl DedupReport {
    pub fn total(&self) -> usize {
        self.same_layer_regions + self.cross_layer_regions + self.merged_placements
    }
}

pub struct Deduplicator<'o> {
    options: &'o DedupOptions,
}

impl<'o> Deduplicator<'o> {
    pub fn new(options: &'o DedupOptions) -> Self {
        Self { options }
    }

    pub fn is_annotation_layer(&self, layer: &str) -> bool {
        let lower = layer.to_lowercase();
        self.options
            .annotation_layer_patterns
            .iter()
            .any(|p| lower.contains(p.as_str()))
    }

    fn area_key(&self, area: f64) -> i64 {
        (area * 10f64.powi(self.options.area_decimals as i32)).round() as i64
    }

    /// Run both region passes over the items and merge the placements
    pub fn run(
        &self,
        items: Vec<DetectedItem>,
        placements: Vec<Placement>,
    ) -> (Vec<DetectedItem>, Vec<Placement>, DedupReport) {
        let (items, same_layer_regions) = self.same_layer_pass(items);
        let (items, cross_layer_regions) = self.cross_layer_pass(items);
        let (placements, merged_placements) = self.merge_placements(placements);

        let report = DedupReport {
            same_layer_regions,
            cross_layer_regions,
            merged_placements,
        };
        tracing::debug!(
            same_layer = report.same_layer_regions,
            cross_layer = report.cross_layer_regions,
            placements = report.merged_placements,
            "deduplication"
        );
        (items, placements, report)
    }

    /// Pass A: the first occurrence of a region identity on a layer wins.
    /// Centroids match within the tolerance, searched over neighbouring cells.
    pub fn same_layer_pass(&self, items: Vec<DetectedItem>) -> (Vec<DetectedItem>, usize) {
        let tolerance = self.options.tolerance;
        // (layer, area, signature, cell) -> centroids of kept regions
        let mut seen: FxHashMap<(String, i64, u64, i64, i64), Vec<Point2D>> = FxHashMap::default();
        let before = items.len();
        let kept: Vec<DetectedItem> = items
            .into_iter()
            .filter(|item| {
                if item.kind() != ItemKind::Area {
                    return true;
                }
                let ev = item.evidence();
                let layer = item.layer().to_string();
                let area = self.area_key(item.si_value());
                let signature = ev.signature.unwrap_or(0);
                let (cx, cy) = (self.cell(ev.anchor.x), self.cell(ev.anchor.y));

                for dx in -1..=1 {
                    for dy in -1..=1 {
                        let key = (layer.clone(), area, signature, cx + dx, cy + dy);
                        if seen
                            .get(&key)
                            .is_some_and(|c| c.iter().any(|p| p.distance_to(&ev.anchor) <= tolerance))
                        {
                            return false;
                        }
                    }
                }
                seen.entry((layer, area, signature, cx, cy))
                    .or_default()
                    .push(ev.anchor);
                true
            })
            .collect();
        let removed = before - kept.len();
        (kept, removed)
    }

    /// Pass B: area values present on both a real and an annotation layer
    /// lose their annotation copies
    pub fn cross_layer_pass(&self, items: Vec<DetectedItem>) -> (Vec<DetectedItem>, usize) {
        let mut real_areas: FxHashSet<i64> = FxHashSet::default();
        for item in &items {
            if item.kind() == ItemKind::Area && !self.is_annotation_layer(item.layer()) {
                real_areas.insert(self.area_key(item.si_value()));
            }
        }

        let before = items.len();
        let kept: Vec<DetectedItem> = items
            .into_iter()
            .filter(|item| {
                !(item.kind() == ItemKind::Area
                    && self.is_annotation_layer(item.layer())
                    && real_areas.contains(&self.area_key(item.si_value())))
            })
            .collect();
        let removed = before - kept.len();
        (kept, removed)
    }

    /// Merge placements of one symbol on one layer that sit within the
    /// tolerance of an earlier kept placement
    pub fn merge_placements(&self, placements: Vec<Placement>) -> (Vec<Placement>, usize) {
        let tolerance = self.options.tolerance;
        let mut kept: Vec<Placement> = Vec::with_capacity(placements.len());
        // (layer, name, cell) -> indices into `kept`
        let mut grid: FxHashMap<(String, String, i64, i64), Vec<usize>> = FxHashMap::default();
        let mut merged = 0;

        for placement in placements {
            let cx = self.cell(placement.position.x);
            let cy = self.cell(placement.position.y);

            let mut target = None;
            'search: for dx in -1..=1 {
                for dy in -1..=1 {
                    let key = (placement.layer.clone(), placement.name.clone(), cx + dx, cy + dy);
                    if let Some(indices) = grid.get(&key) {
                        for &i in indices {
                            if kept[i].position.distance_to(&placement.position) <= tolerance {
                                target = Some(i);
                                break 'search;
                            }
                        }
                    }
                }
            }

            match target {
                Some(i) => {
                    kept[i].merged += placement.merged;
                    merged += 1;
                }
                None => {
                    grid.entry((placement.layer.clone(), placement.name.clone(), cx, cy))
                        .or_default()
                        .push(kept.len());
                    kept.push(placement);
                }
            }
        }

        (kept, merged)
    }

    fn cell(&self, v: f64) -> i64 {
        if self.options.tolerance > 0.0 {
            (v / self.options.tolerance).floor() as i64
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::Evidence;
    use takeoff_core::{DrawingUnit, Point2D};

    fn area(id: &str, layer: &str, value: f64, at: (f64, f64), signature: u64) -> DetectedItem {
        let mut ev = Evidence::new("polyline", 1, Point2D::new(at.0, at.1));
        ev.signature = Some(signature);
        DetectedItem::area(id, layer, "polyline", value, DrawingUnit::Meter, ev)
    }

    fn placement(id: &str, name: &str, layer: &str, x: f64) -> Placement {
        Placement {
            id: id.into(),
            name: name.into(),
            layer: layer.into(),
            position: Point2D::new(x, 0.0),
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            block_path: Vec::new(),
            handle: None,
            line: 0,
            merged: 1,
        }
    }

    #[test]
    fn test_same_layer_duplicates() {
        let options = DedupOptions::default();
        let dedup = Deduplicator::new(&options);
        let items = vec![
            area("a", "SLAB", 25.0, (5.0, 5.0), 7),
            area("b", "SLAB", 25.00001, (5.001, 5.0), 7),
            // same area elsewhere is a different room
            area("c", "SLAB", 25.0, (50.0, 5.0), 9),
            // same region on another layer is not a pass A duplicate
            area("d", "FLOOR", 25.0, (5.0, 5.0), 7),
        ];
        let (kept, removed) = dedup.same_layer_pass(items);
        assert_eq!(removed, 1);
        assert_eq!(kept.iter().map(|i| i.id()).collect::<Vec<_>>(), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_same_layer_duplicates_across_cell_boundary() {
        let options = DedupOptions::default();
        let dedup = Deduplicator::new(&options);
        // 1 µm apart on either side of a 0.01 m cell edge
        let items = vec![
            area("a", "SLAB", 25.0, (0.0199995, 3.0), 7),
            area("b", "SLAB", 25.0, (0.0200005, 3.0), 7),
        ];
        let (kept, removed) = dedup.same_layer_pass(items);
        assert_eq!(removed, 1);
        assert_eq!(kept[0].id(), "a");
    }

    #[test]
    fn test_cross_layer_drops_annotation_copies() {
        let options = DedupOptions::default();
        let dedup = Deduplicator::new(&options);
        let items = vec![
            area("real", "A-FLOOR", 42.5, (0.0, 0.0), 1),
            area("copy", "IMPORT-0", 42.5, (0.0, 0.0), 1),
            area("only", "ANNO-HATCH", 13.0, (0.0, 0.0), 2),
        ];
        let (kept, removed) = dedup.cross_layer_pass(items);
        assert_eq!(removed, 1);
        assert!(kept.iter().all(|i| i.id() != "copy"));
        assert!(kept.iter().any(|i| i.id() == "only"));
    }

    #[test]
    fn test_placement_merge_counts() {
        let options = DedupOptions::default();
        let dedup = Deduplicator::new(&options);
        let placements = vec![
            placement("1", "DOOR", "DOORS", 0.0),
            placement("2", "DOOR", "DOORS", 0.005),
            placement("3", "DOOR", "DOORS", 3.0),
            placement("4", "WINDOW", "DOORS", 0.0),
        ];
        let (kept, merged) = dedup.merge_placements(placements);
        assert_eq!(merged, 1);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].merged, 2);
    }

    #[test]
    fn test_idempotent() {
        let options = DedupOptions::default();
        let dedup = Deduplicator::new(&options);
        let items = vec![
            area("a", "SLAB", 25.0, (5.0, 5.0), 7),
            area("b", "SLAB", 25.0, (5.0, 5.0), 7),
            area("c", "TEXT-IMPORT", 25.0, (5.0, 5.0), 7),
        ];
        let placements = vec![
            placement("1", "DOOR", "DOORS", 0.0),
            placement("2", "DOOR", "DOORS", 0.009),
            placement("3", "DOOR", "DOORS", 0.018),
        ];
        let (items, placements, first) = dedup.run(items, placements);
        assert!(first.total() > 0);
        let (_, _, second) = dedup.run(items, placements);
        assert_eq!(second, DedupReport::default());
    }
}
