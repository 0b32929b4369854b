// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity classification and geometry extraction
//!
//! Runs over the flattened drawing in two passes. The first collects the
//! world bounds, which fix the effective unit (when inferred) and the
//! dynamic noise threshold: `diagonal × length_threshold_factor`. The
//! second measures every entity into [`DetectedItem`]s and per-layer
//! samples for the profiler.

use crate::blocks::{BlockResolver, Placement, Truncation, WorldEntity, MAX_BLOCK_DEPTH, MAX_PLACEMENTS};
use crate::error::{Error, Result};
use crate::items::{DetectedItem, Evidence};
use crate::measure::{
    arc_length, centroid, ellipse_length, hatch_area, is_implicitly_closed, polygon_area,
    polyline_length, segment_length, solid_area, spline_length, SplineBasis,
};
use rustc_hash::FxHasher;
use serde::Serialize;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use takeoff_core::{
    guess_unit_from_extent, resolve_unit_with_guess, to_si_length, Drawing, DrawingBounds,
    DrawingUnit, EntityClass, EntityData, Point2D, PolylineVertex, SkippedEntity, UnitResolution,
};

pub const DEFAULT_LENGTH_THRESHOLD_FACTOR: f64 = 0.0005;

const DISTORTED_CURVE: &str = "curve placed with non-uniform scale; length uses the mean scale";

/// Grid used for closed-region vertex signatures, in meters
const SIGNATURE_QUANTUM: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub preferred_unit: Option<DrawingUnit>,
    pub infer_unit_from_extents: bool,
    pub length_threshold_factor: f64,
    pub max_block_depth: usize,
    pub max_placements: usize,
    /// Lowercase substrings of layers on which circles are pipe/duct runs
    pub infrastructure_layer_patterns: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            preferred_unit: None,
            infer_unit_from_extents: false,
            length_threshold_factor: DEFAULT_LENGTH_THRESHOLD_FACTOR,
            max_block_depth: MAX_BLOCK_DEPTH,
            max_placements: MAX_PLACEMENTS,
            infrastructure_layer_patterns: ["duct", "pipe", "tubo", "tuberia", "ducto", "conduit"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Raw per-layer observations used by the layer profiler, in SI
#[derive(Debug, Clone, Default, Serialize)]
pub struct LayerSamples {
    /// Entity count per type tag, annotation and placements included
    pub entity_types: BTreeMap<String, usize>,
    pub entities: usize,
    pub text_entities: usize,
    /// Every length contribution, including those below the noise threshold
    pub segment_lengths: Vec<f64>,
    /// One representative point per entity
    pub anchors: Vec<Point2D>,
    /// Straight pieces along each entity's path; a lone point is a
    /// zero-length piece
    pub strokes: Vec<[Point2D; 2]>,
}

impl LayerSamples {
    fn observe(&mut self, type_name: &str, class: EntityClass, anchor: Point2D, path: &[Point2D]) {
        *self.entity_types.entry(type_name.to_string()).or_insert(0) += 1;
        self.entities += 1;
        if class == EntityClass::Annotation {
            self.text_entities += 1;
        }
        self.anchors.push(anchor);
        match path {
            [] => self.strokes.push([anchor, anchor]),
            [only] => self.strokes.push([*only, *only]),
            _ => self.strokes.extend(path.windows(2).map(|w| [w[0], w[1]])),
        }
    }
}

/// Result of one extraction run
#[derive(Debug, Clone)]
pub struct Extraction {
    pub unit: UnitResolution,
    /// World bounds in raw drawing units
    pub bounds: DrawingBounds,
    /// Minimum length worth measuring, in meters
    pub noise_threshold: f64,
    /// Length, area and text items
    pub items: Vec<DetectedItem>,
    /// Placements with positions in meters
    pub placements: Vec<Placement>,
    pub samples: BTreeMap<String, LayerSamples>,
    /// Parser skips plus entities that failed measurement
    pub skipped: Vec<SkippedEntity>,
    pub truncations: Vec<Truncation>,
    pub world_entities: usize,
    pub hidden_entities: usize,
    pub noise_discarded: usize,
    /// Circles off infrastructure layers
    pub circles_ignored: usize,
}

/// Classify, flatten and measure a drawing
pub fn extract(drawing: &Drawing, options: &ExtractOptions) -> Extraction {
    let resolution = BlockResolver::new(drawing)
        .with_max_depth(options.max_block_depth)
        .with_max_placements(options.max_placements)
        .resolve();

    let mut bounds = DrawingBounds::new();
    for entity in &resolution.entities {
        expand_bounds(&mut bounds, &entity.data);
    }
    for placement in &resolution.placements {
        bounds.expand_point(&placement.position);
    }
    if !bounds.is_valid() {
        if let Some(declared) = drawing.header.declared_bounds() {
            bounds = declared;
        }
    }

    let guess = if options.infer_unit_from_extents {
        guess_unit_from_extent(bounds.diagonal())
    } else {
        None
    };
    let unit = resolve_unit_with_guess(options.preferred_unit, drawing.header.insunits, guess);
    let noise_threshold = unit.to_si_length(bounds.diagonal() * options.length_threshold_factor);

    tracing::debug!(
        unit = %unit.unit,
        source = ?unit.source,
        diagonal = bounds.diagonal(),
        noise_threshold,
        "extraction thresholds"
    );

    let mut extractor = Extractor {
        unit: unit.unit,
        noise_threshold,
        options,
        items: Vec::new(),
        samples: BTreeMap::new(),
        skipped: drawing.skipped.clone(),
        noise_discarded: 0,
        circles_ignored: 0,
    };

    for entity in &resolution.entities {
        if let Err(err) = extractor.measure(entity) {
            tracing::warn!(
                entity = entity.data.type_name(),
                line = entity.line,
                layer = %entity.layer,
                error = %err,
                "entity skipped"
            );
            extractor.skipped.push(SkippedEntity {
                entity_type: entity.data.type_name().to_ascii_uppercase(),
                line: entity.line,
                layer: Some(entity.layer.clone()),
                reason: err.to_string(),
            });
        }
    }

    let mut placements = resolution.placements;
    for placement in &mut placements {
        placement.position = si_point(&placement.position, unit.unit);
        extractor
            .samples
            .entry(placement.layer.clone())
            .or_default()
            .observe("insert", EntityClass::Measurable, placement.position, &[placement.position]);
    }

    Extraction {
        unit,
        bounds,
        noise_threshold,
        items: extractor.items,
        placements,
        samples: extractor.samples,
        skipped: extractor.skipped,
        truncations: resolution.truncations,
        world_entities: resolution.entities.len(),
        hidden_entities: resolution.hidden,
        noise_discarded: extractor.noise_discarded,
        circles_ignored: extractor.circles_ignored,
    }
}

/// One count item per (merged) placement
pub fn count_items(placements: &[Placement]) -> Vec<DetectedItem> {
    placements
        .iter()
        .map(|p| {
            let mut evidence = Evidence::new("insert", p.line, p.position);
            evidence.handle = p.handle.clone();
            evidence.block_path = p.block_path.clone();
            if p.merged > 1 {
                evidence.merged = Some(p.merged);
            }
            DetectedItem::count(p.id.clone(), p.layer.clone(), p.name.clone(), evidence)
        })
        .collect()
}

struct Extractor<'o> {
    unit: DrawingUnit,
    noise_threshold: f64,
    options: &'o ExtractOptions,
    items: Vec<DetectedItem>,
    samples: BTreeMap<String, LayerSamples>,
    skipped: Vec<SkippedEntity>,
    noise_discarded: usize,
    circles_ignored: usize,
}

impl<'o> Extractor<'o> {
    fn measure(&mut self, entity: &WorldEntity) -> Result<()> {
        let unit = self.unit;
        let anchor_raw = anchor_of(&entity.data);
        if !anchor_raw.is_finite() {
            return Err(Error::invalid("non-finite coordinates"));
        }
        let anchor = si_point(&anchor_raw, unit);
        let path: Vec<Point2D> = path_of(&entity.data)
            .iter()
            .filter(|p| p.is_finite())
            .map(|p| si_point(p, unit))
            .collect();

        self.samples
            .entry(entity.layer.clone())
            .or_default()
            .observe(entity.data.type_name(), entity.data.class(), anchor, &path);

        let curve_suspect = entity.distorted.then_some(DISTORTED_CURVE);
        match &entity.data {
            EntityData::Line(line) => {
                self.push_length(entity, segment_length(&line.start, &line.end), anchor, None)?;
            }
            EntityData::Polyline(poly) => {
                let closed = poly.closed || is_implicitly_closed(&poly.vertices, 1e-9);
                self.push_length(entity, polyline_length(&poly.vertices, poly.closed), anchor, None)?;
                if closed {
                    let points: Vec<Point2D> = poly.vertices.iter().map(|v| v.point).collect();
                    let region_anchor = si_point(&centroid(&points), unit);
                    self.push_area(entity, polygon_area(&poly.vertices), region_anchor, &poly.vertices)?;
                }
            }
            EntityData::Arc(arc) => {
                self.push_length(entity, arc_length(arc.radius, arc.sweep()), anchor, curve_suspect)?;
            }
            EntityData::Circle(circle) => {
                if self.is_infrastructure_layer(&entity.layer) {
                    let circumference = arc_length(circle.radius, std::f64::consts::TAU);
                    self.push_length(entity, circumference, anchor, curve_suspect)?;
                } else {
                    self.circles_ignored += 1;
                }
            }
            EntityData::Ellipse(ellipse) => {
                self.push_length(entity, ellipse_length(ellipse), anchor, curve_suspect)?;
            }
            EntityData::Spline(spline) => {
                let (length, basis) = spline_length(spline);
                let suspect = match basis {
                    SplineBasis::FitPoints => None,
                    SplineBasis::ControlPolygon => {
                        Some("spline measured along its control polygon")
                    }
                };
                self.push_length(entity, length, anchor, suspect)?;
            }
            EntityData::Hatch(hatch) => {
                let outline: Vec<PolylineVertex> = hatch
                    .loops
                    .iter()
                    .find(|l| l.external)
                    .or_else(|| hatch.loops.first())
                    .map(|l| l.vertices.to_vec())
                    .unwrap_or_default();
                let points: Vec<Point2D> = outline.iter().map(|v| v.point).collect();
                let region_anchor = si_point(&centroid(&points), unit);
                self.push_area(entity, hatch_area(hatch), region_anchor, &outline)?;
            }
            EntityData::Solid(solid) => {
                let outline: Vec<PolylineVertex> =
                    solid.corners.iter().map(|p| PolylineVertex::new(*p, 0.0)).collect();
                let region_anchor = si_point(&centroid(&solid.corners), unit);
                self.push_area(entity, solid_area(solid), region_anchor, &outline)?;
            }
            // placements are counted from the resolver output
            EntityData::Insert(_) => {}
            EntityData::Text(text) => self.push_text(entity, &text.content, anchor),
            EntityData::Dimension(dim) => self.push_text(entity, &dim.text, anchor),
            EntityData::Leader(leader) => {
                if let Some(text) = &leader.text {
                    self.push_text(entity, text, anchor);
                }
            }
            EntityData::Attribute(attr) => self.push_text(entity, &attr.default_text, anchor),
        }
        Ok(())
    }

    fn is_infrastructure_layer(&self, layer: &str) -> bool {
        let lower = layer.to_lowercase();
        self.options
            .infrastructure_layer_patterns
            .iter()
            .any(|p| lower.contains(p.as_str()))
    }

    fn evidence(&self, entity: &WorldEntity, anchor: Point2D) -> Evidence {
        let mut evidence = Evidence::new(entity.data.type_name(), entity.line, anchor);
        evidence.handle = entity.handle.clone();
        evidence.block_path = entity.block_path.clone();
        evidence
    }

    fn push_length(
        &mut self,
        entity: &WorldEntity,
        raw: f64,
        anchor: Point2D,
        suspect: Option<&str>,
    ) -> Result<()> {
        if !raw.is_finite() {
            return Err(Error::invalid(format!("non-finite length {}", raw)));
        }
        let si = to_si_length(raw, self.unit);
        if let Some(samples) = self.samples.get_mut(&entity.layer) {
            samples.segment_lengths.push(si);
        }
        if si < self.noise_threshold || si <= 0.0 {
            self.noise_discarded += 1;
            return Ok(());
        }

        let mut item = DetectedItem::length(
            entity.id.clone(),
            entity.layer.clone(),
            entity.data.type_name(),
            raw,
            self.unit,
            self.evidence(entity, anchor),
        );
        if let Some(reason) = suspect {
            item.mark_suspect(reason);
        }
        self.items.push(item);
        Ok(())
    }

    fn push_area(
        &mut self,
        entity: &WorldEntity,
        raw: f64,
        anchor: Point2D,
        outline: &[PolylineVertex],
    ) -> Result<()> {
        if !raw.is_finite() {
            return Err(Error::invalid(format!("non-finite area {}", raw)));
        }
        if raw <= 0.0 {
            return Ok(());
        }
        let mut evidence = self.evidence(entity, anchor);
        evidence.signature = Some(vertex_signature(outline, self.unit));
        let id = format!("{}#area", entity.id);
        self.items.push(DetectedItem::area(
            id,
            entity.layer.clone(),
            entity.data.type_name(),
            raw,
            self.unit,
            evidence,
        ));
        Ok(())
    }

    fn push_text(&mut self, entity: &WorldEntity, content: &str, anchor: Point2D) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        self.items.push(DetectedItem::text(
            entity.id.clone(),
            entity.layer.clone(),
            content,
            self.evidence(entity, anchor),
        ));
    }
}

fn si_point(p: &Point2D, unit: DrawingUnit) -> Point2D {
    Point2D::new(to_si_length(p.x, unit), to_si_length(p.y, unit))
}

/// Order-independent hash of a ring's vertices on a 1 mm grid
fn vertex_signature(outline: &[PolylineVertex], unit: DrawingUnit) -> u64 {
    let mut cells: Vec<(i64, i64)> = outline
        .iter()
        .map(|v| {
            let p = si_point(&v.point, unit);
            (
                (p.x / SIGNATURE_QUANTUM).round() as i64,
                (p.y / SIGNATURE_QUANTUM).round() as i64,
            )
        })
        .collect();
    cells.sort_unstable();
    cells.dedup();

    let mut hasher = FxHasher::default();
    cells.len().hash(&mut hasher);
    cells.hash(&mut hasher);
    hasher.finish()
}

/// Representative point of an entity, in raw units
fn anchor_of(data: &EntityData) -> Point2D {
    match data {
        EntityData::Line(line) => line.start.midpoint(&line.end),
        EntityData::Polyline(poly) => {
            let points: Vec<Point2D> = poly.vertices.iter().map(|v| v.point).collect();
            centroid(&points)
        }
        EntityData::Arc(arc) => {
            let mid = (arc.start_angle.to_radians() + arc.sweep() / 2.0).sin_cos();
            Point2D::new(
                arc.center.x + arc.radius * mid.1,
                arc.center.y + arc.radius * mid.0,
            )
        }
        EntityData::Circle(circle) => circle.center,
        EntityData::Ellipse(ellipse) => ellipse.center,
        EntityData::Spline(spline) => {
            let points = if spline.fit_points.is_empty() {
                &spline.control_points
            } else {
                &spline.fit_points
            };
            centroid(points)
        }
        EntityData::Hatch(hatch) => hatch
            .loops
            .first()
            .map(|l| {
                let points: Vec<Point2D> = l.vertices.iter().map(|v| v.point).collect();
                centroid(&points)
            })
            .unwrap_or(Point2D::ORIGIN),
        EntityData::Solid(solid) => centroid(&solid.corners),
        EntityData::Insert(insert) => insert.position,
        EntityData::Text(text) => text.position,
        EntityData::Dimension(dim) => dim.position,
        EntityData::Leader(leader) => leader.vertices.first().copied().unwrap_or(Point2D::ORIGIN),
        EntityData::Attribute(attr) => attr.position,
    }
}

/// Points along an entity's outline in raw units, for connectivity only.
/// Bulges are replaced by chords; compact shapes collapse to their anchor.
fn path_of(data: &EntityData) -> Vec<Point2D> {
    match data {
        EntityData::Line(line) => vec![line.start, line.end],
        EntityData::Polyline(poly) => {
            let mut points: Vec<Point2D> = poly.vertices.iter().map(|v| v.point).collect();
            if poly.closed {
                if let Some(first) = points.first().copied() {
                    points.push(first);
                }
            }
            points
        }
        EntityData::Arc(arc) => {
            let start = arc.start_angle.to_radians();
            [0.0, 0.5, 1.0]
                .iter()
                .map(|t| {
                    let (sin, cos) = (start + arc.sweep() * t).sin_cos();
                    Point2D::new(arc.center.x + arc.radius * cos, arc.center.y + arc.radius * sin)
                })
                .collect()
        }
        EntityData::Spline(spline) => {
            if spline.fit_points.is_empty() {
                spline.control_points.to_vec()
            } else {
                spline.fit_points.to_vec()
            }
        }
        EntityData::Hatch(hatch) => hatch
            .loops
            .iter()
            .find(|l| l.external)
            .or_else(|| hatch.loops.first())
            .map(|l| {
                let mut points: Vec<Point2D> = l.vertices.iter().map(|v| v.point).collect();
                if let Some(first) = points.first().copied() {
                    points.push(first);
                }
                points
            })
            .unwrap_or_default(),
        EntityData::Solid(solid) => solid.corners.to_vec(),
        EntityData::Leader(leader) => leader.vertices.to_vec(),
        other => vec![anchor_of(other)],
    }
}

/// Grow the bounds by an entity's geometry. Annotation is excluded so
/// far-away title block text does not inflate the noise threshold.
fn expand_bounds(bounds: &mut DrawingBounds, data: &EntityData) {
    match data {
        EntityData::Line(line) => {
            bounds.expand_point(&line.start);
            bounds.expand_point(&line.end);
        }
        EntityData::Polyline(poly) => {
            for v in &poly.vertices {
                bounds.expand_point(&v.point);
            }
        }
        EntityData::Arc(arc) => bounds.expand_radius(&arc.center, arc.radius),
        EntityData::Circle(circle) => bounds.expand_radius(&circle.center, circle.radius),
        EntityData::Ellipse(ellipse) => {
            let a = ellipse.major_axis.x.hypot(ellipse.major_axis.y);
            bounds.expand_radius(&ellipse.center, a);
        }
        EntityData::Spline(spline) => {
            for p in spline.control_points.iter().chain(&spline.fit_points) {
                bounds.expand_point(p);
            }
        }
        EntityData::Hatch(hatch) => {
            for l in &hatch.loops {
                for v in &l.vertices {
                    bounds.expand_point(&v.point);
                }
            }
        }
        EntityData::Solid(solid) => {
            for p in &solid.corners {
                bounds.expand_point(p);
            }
        }
        EntityData::Insert(_)
        | EntityData::Text(_)
        | EntityData::Dimension(_)
        | EntityData::Leader(_)
        | EntityData::Attribute(_) => {}
    }
}
