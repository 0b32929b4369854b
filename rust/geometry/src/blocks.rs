// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Symbol resolution: flattens nested placements into world geometry
//!
//! Resolution runs on an explicit worklist. Each frame carries the composed
//! transform and the chain of symbol names that led to it; a placement whose
//! symbol is already on that chain is a cycle and is not expanded, and no
//! chain grows past the configured depth. Both guards record a
//! [`Truncation`] instead of failing.

use crate::transform::Transform2D;
use serde::Serialize;
use takeoff_core::{AttributeDef, Drawing, Entity, EntityData, Insert, Point2D};

/// Default depth limit for nested placements
pub const MAX_BLOCK_DEPTH: usize = 5;
/// Default cap on expanded placements per drawing
pub const MAX_PLACEMENTS: usize = 250_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationReason {
    /// The symbol (directly or transitively) places itself
    Cycle,
    DepthLimit,
    /// The placement names a symbol with no definition
    MissingDefinition,
    /// The symbol is an external reference; its geometry is in another file
    ExternalReference,
    /// The drawing already expanded the maximum number of placements
    PlacementLimit,
}

/// A placement whose symbol was not expanded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Truncation {
    pub placement_id: String,
    pub block: String,
    /// Symbol names from the outermost placement down to the truncated one
    pub path: Vec<String>,
    pub reason: TruncationReason,
}

/// An entity in world coordinates (raw drawing units) with its effective layer
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEntity {
    /// Stable id derived from the placement path
    pub id: String,
    pub layer: String,
    pub data: EntityData,
    pub handle: Option<String>,
    pub line: usize,
    pub block_path: Vec<String>,
    /// Placed with unequal axis scales or shear; curved lengths are approximate
    pub distorted: bool,
}

/// One symbol placement in world coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub id: String,
    pub name: String,
    pub layer: String,
    pub position: Point2D,
    /// Degrees
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub block_path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub line: usize,
    /// Number of placements this entry stands for after merging
    pub merged: u32,
}

/// Flattened drawing
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub entities: Vec<WorldEntity>,
    pub placements: Vec<Placement>,
    pub truncations: Vec<Truncation>,
    /// Entities and placements dropped because their layer is frozen or off
    pub hidden: usize,
}

struct Frame<'d> {
    entities: &'d [Entity],
    transform: Transform2D,
    path: Vec<String>,
    id_prefix: Option<String>,
    inherited_layer: Option<String>,
}

/// Resolves the model space of a drawing through its symbol definitions
pub struct BlockResolver<'d> {
    drawing: &'d Drawing,
    max_depth: usize,
    max_placements: usize,
}

impl<'d> BlockResolver<'d> {
    pub fn new(drawing: &'d Drawing) -> Self {
        Self {
            drawing,
            max_depth: MAX_BLOCK_DEPTH,
            max_placements: MAX_PLACEMENTS,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_placements(mut self, max_placements: usize) -> Self {
        self.max_placements = max_placements;
        self
    }

    pub fn resolve(&self) -> Resolution {
        let mut out = Resolution::default();
        let mut worklist = vec![Frame {
            entities: &self.drawing.entities,
            transform: Transform2D::identity(),
            path: Vec::new(),
            id_prefix: None,
            inherited_layer: None,
        }];

        while let Some(frame) = worklist.pop() {
            for (index, entity) in frame.entities.iter().enumerate() {
                let id = match &frame.id_prefix {
                    Some(prefix) => format!("{}/{}", prefix, index),
                    None => match &entity.handle {
                        Some(handle) => format!("h{}", handle),
                        None => format!("e{}", index),
                    },
                };
                let layer = effective_layer(&entity.layer, frame.inherited_layer.as_deref());

                if self.drawing.is_layer_hidden(&layer) {
                    out.hidden += 1;
                    continue;
                }

                match &entity.data {
                    EntityData::Insert(insert) => {
                        self.expand_insert(&frame, entity, insert, id, layer, &mut out, &mut worklist);
                    }
                    // attribute templates inside a symbol are replaced by the placement's values
                    EntityData::Attribute(_) if !frame.path.is_empty() => {}
                    data => out.entities.push(WorldEntity {
                        id,
                        layer,
                        data: frame.transform.apply_to_entity(data),
                        handle: entity.handle.clone(),
                        line: entity.line,
                        block_path: frame.path.clone(),
                        distorted: !frame.transform.is_conformal(),
                    }),
                }
            }
        }

        out
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_insert(
        &self,
        frame: &Frame<'d>,
        entity: &Entity,
        insert: &Insert,
        id: String,
        layer: String,
        out: &mut Resolution,
        worklist: &mut Vec<Frame<'d>>,
    ) {
        let block = self.drawing.block(&insert.name);
        let base_point = block.map(|b| b.base_point).unwrap_or(Point2D::ORIGIN);

        // Attribute positions are stored in the parent's coordinates
        for (k, attr) in insert.attributes.iter().enumerate() {
            if attr.text.trim().is_empty() {
                continue;
            }
            out.entities.push(WorldEntity {
                id: format!("{}:attr{}", id, k),
                layer: layer.clone(),
                data: EntityData::Attribute(AttributeDef {
                    tag: attr.tag.clone(),
                    default_text: attr.text.clone(),
                    position: frame.transform.apply(&attr.position),
                }),
                handle: entity.handle.clone(),
                line: entity.line,
                block_path: frame.path.clone(),
                distorted: !frame.transform.is_conformal(),
            });
        }

        let is_array = insert.instance_count() > 1;
        let (sin, cos) = insert.rotation.to_radians().sin_cos();

        for row in 0..insert.rows.max(1) {
            for col in 0..insert.columns.max(1) {
                // Array spacing is measured along the rotated, unscaled axes
                let dx = col as f64 * insert.column_spacing;
                let dy = row as f64 * insert.row_spacing;
                let cell_position = Point2D::new(
                    insert.position.x + dx * cos - dy * sin,
                    insert.position.y + dx * sin + dy * cos,
                );
                let local = Transform2D::from_placement(
                    cell_position,
                    insert.rotation,
                    insert.scale_x,
                    insert.scale_y,
                    base_point,
                );
                let transform = frame.transform.then(&local);
                let placement_id = if is_array {
                    format!("{}@{}.{}", id, col, row)
                } else {
                    id.clone()
                };

                if out.placements.len() >= self.max_placements {
                    tracing::warn!(
                        placement = %placement_id,
                        block = %insert.name,
                        limit = self.max_placements,
                        "placement limit reached"
                    );
                    let mut path = frame.path.clone();
                    path.push(insert.name.clone());
                    out.truncations.push(Truncation {
                        placement_id,
                        block: insert.name.clone(),
                        path,
                        reason: TruncationReason::PlacementLimit,
                    });
                    return;
                }
                let (scale_x, scale_y) = transform.axis_scales();

                out.placements.push(Placement {
                    id: placement_id.clone(),
                    name: insert.name.clone(),
                    layer: layer.clone(),
                    position: frame.transform.apply(&cell_position),
                    rotation: transform.rotation_degrees(),
                    scale_x,
                    scale_y,
                    block_path: frame.path.clone(),
                    handle: entity.handle.clone(),
                    line: entity.line,
                    merged: 1,
                });

                let reason = match block {
                    None => Some(TruncationReason::MissingDefinition),
                    Some(b) if b.is_xref() => Some(TruncationReason::ExternalReference),
                    Some(_) if frame.path.iter().any(|n| n == &insert.name) => {
                        Some(TruncationReason::Cycle)
                    }
                    Some(_) if frame.path.len() >= self.max_depth => {
                        Some(TruncationReason::DepthLimit)
                    }
                    Some(_) => None,
                };

                let mut path = frame.path.clone();
                path.push(insert.name.clone());

                if let Some(reason) = reason {
                    tracing::warn!(
                        placement = %placement_id,
                        block = %insert.name,
                        depth = path.len(),
                        reason = ?reason,
                        "symbol resolution truncated"
                    );
                    out.truncations.push(Truncation {
                        placement_id,
                        block: insert.name.clone(),
                        path,
                        reason,
                    });
                    continue;
                }

                if let Some(block) = block {
                    worklist.push(Frame {
                        entities: &block.entities,
                        transform,
                        path,
                        id_prefix: Some(placement_id),
                        inherited_layer: Some(layer.clone()),
                    });
                }
            }
        }
    }
}

/// Entities drawn on layer `0` inside a symbol take the placement's layer
fn effective_layer(layer: &str, inherited: Option<&str>) -> String {
    match inherited {
        Some(parent) if layer == "0" => parent.to_string(),
        _ => layer.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use takeoff_core::{BlockDefinition, Line};

    fn line(layer: &str, x1: f64, x2: f64) -> Entity {
        Entity::new(
            layer,
            EntityData::Line(Line {
                start: Point2D::new(x1, 0.0),
                end: Point2D::new(x2, 0.0),
            }),
        )
    }

    fn insert(layer: &str, name: &str, x: f64, y: f64) -> Entity {
        Entity::new(layer, EntityData::Insert(Insert::new(name, Point2D::new(x, y))))
    }

    fn add_block(drawing: &mut Drawing, name: &str, entities: Vec<Entity>) {
        drawing.blocks.insert(
            name.to_string(),
            BlockDefinition {
                name: name.to_string(),
                base_point: Point2D::ORIGIN,
                flags: 0,
                entities,
            },
        );
    }

    #[test]
    fn test_nested_transform_and_layer_inheritance() {
        let mut drawing = Drawing::new();
        add_block(&mut drawing, "INNER", vec![line("0", 0.0, 1.0)]);
        let mut outer_insert = Insert::new("INNER", Point2D::new(10.0, 0.0));
        outer_insert.scale_x = 2.0;
        outer_insert.scale_y = 2.0;
        add_block(
            &mut drawing,
            "OUTER",
            vec![Entity::new("0", EntityData::Insert(outer_insert))],
        );
        drawing.entities.push(insert("FURNITURE", "OUTER", 100.0, 0.0).with_handle("2F"));

        let res = BlockResolver::new(&drawing).resolve();
        assert!(res.truncations.is_empty());
        assert_eq!(res.placements.len(), 2);
        assert_eq!(res.entities.len(), 1);

        let world = &res.entities[0];
        assert_eq!(world.layer, "FURNITURE");
        assert_eq!(world.id, "h2F/0/0");
        assert_eq!(world.block_path, vec!["OUTER".to_string(), "INNER".to_string()]);
        match &world.data {
            EntityData::Line(l) => {
                assert_relative_eq!(l.start.x, 110.0);
                assert_relative_eq!(l.end.x, 112.0);
            }
            other => panic!("expected line, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_terminates() {
        let mut drawing = Drawing::new();
        add_block(
            &mut drawing,
            "LOOP",
            vec![line("A", 0.0, 5.0), insert("A", "LOOP", 1.0, 0.0)],
        );
        drawing.entities.push(insert("A", "LOOP", 0.0, 0.0));

        let res = BlockResolver::new(&drawing).resolve();
        assert!(!res.entities.is_empty());
        assert_eq!(res.truncations.len(), 1);
        assert_eq!(res.truncations[0].reason, TruncationReason::Cycle);
        assert_eq!(res.truncations[0].path, vec!["LOOP".to_string(), "LOOP".to_string()]);
    }

    #[test]
    fn test_mutual_cycle_and_depth_limit() {
        let mut drawing = Drawing::new();
        add_block(&mut drawing, "A", vec![line("X", 0.0, 1.0), insert("X", "B", 0.0, 0.0)]);
        add_block(&mut drawing, "B", vec![insert("X", "A", 0.0, 0.0)]);
        drawing.entities.push(insert("X", "A", 0.0, 0.0));
        let res = BlockResolver::new(&drawing).resolve();
        assert_eq!(res.entities.len(), 1);
        assert_eq!(res.truncations[0].reason, TruncationReason::Cycle);

        // a chain of six distinct symbols stops at depth 5
        let mut deep = Drawing::new();
        for level in 0..6 {
            let name = format!("L{}", level);
            let mut entities = vec![line("X", 0.0, 1.0)];
            if level < 5 {
                entities.push(insert("X", &format!("L{}", level + 1), 0.0, 0.0));
            }
            add_block(&mut deep, &name, entities);
        }
        deep.entities.push(insert("X", "L0", 0.0, 0.0));
        let res = BlockResolver::new(&deep).resolve();
        assert_eq!(res.entities.len(), 5);
        assert_eq!(res.truncations.len(), 1);
        assert_eq!(res.truncations[0].reason, TruncationReason::DepthLimit);
    }

    #[test]
    fn test_array_insert_and_stable_ids() {
        let mut drawing = Drawing::new();
        add_block(&mut drawing, "DESK", vec![line("0", 0.0, 1.0)]);
        let mut desks = Insert::new("DESK", Point2D::ORIGIN);
        desks.columns = 3;
        desks.rows = 2;
        desks.column_spacing = 2.0;
        desks.row_spacing = 3.0;
        drawing
            .entities
            .push(Entity::new("OFFICE", EntityData::Insert(desks)).with_handle("A0"));

        let first = BlockResolver::new(&drawing).resolve();
        assert_eq!(first.placements.len(), 6);
        assert_eq!(first.entities.len(), 6);
        assert!(first.placements.iter().any(|p| p.id == "hA0@2.1"
            && p.position == Point2D::new(4.0, 3.0)));

        let second = BlockResolver::new(&drawing).resolve();
        let ids = |r: &Resolution| r.entities.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_placement_limit_stops_array_expansion() {
        let mut drawing = Drawing::new();
        add_block(&mut drawing, "SEAT", vec![line("0", 0.0, 0.5)]);
        let mut seats = Insert::new("SEAT", Point2D::ORIGIN);
        seats.columns = 1000;
        seats.rows = 1000;
        seats.column_spacing = 1.0;
        seats.row_spacing = 1.0;
        drawing.entities.push(Entity::new("HALL", EntityData::Insert(seats)));
        drawing.entities.push(insert("HALL", "SEAT", 0.0, 0.0));

        let res = BlockResolver::new(&drawing).with_max_placements(50).resolve();
        assert_eq!(res.placements.len(), 50);
        assert_eq!(res.entities.len(), 50);
        assert_eq!(res.truncations.len(), 2);
        assert!(res
            .truncations
            .iter()
            .all(|t| t.reason == TruncationReason::PlacementLimit));
    }

    #[test]
    fn test_external_reference_is_counted_not_expanded() {
        let mut drawing = Drawing::new();
        add_block(&mut drawing, "SITE", vec![line("0", 0.0, 100.0)]);
        if let Some(site) = drawing.blocks.get_mut("SITE") {
            site.flags = 4;
        }
        drawing.entities.push(insert("XREF", "SITE", 0.0, 0.0));
        let res = BlockResolver::new(&drawing).resolve();
        assert_eq!(res.placements.len(), 1);
        assert!(res.entities.is_empty());
        assert_eq!(res.truncations[0].reason, TruncationReason::ExternalReference);
    }

    #[test]
    fn test_missing_definition_still_counts() {
        let mut drawing = Drawing::new();
        drawing.entities.push(insert("DOORS", "XREF_DOOR", 0.0, 0.0));
        let res = BlockResolver::new(&drawing).resolve();
        assert_eq!(res.placements.len(), 1);
        assert_eq!(res.truncations[0].reason, TruncationReason::MissingDefinition);
    }
}
