// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! 2D affine transforms for symbol placements
//!
//! A placement maps block coordinates to its parent's coordinates by
//! `T(position) · R(rotation) · S(scale_x, scale_y) · T(-base_point)`.
//! Nested placements compose parent-first, the same way placement
//! hierarchies compose in 3D scene graphs.

use nalgebra::{Matrix3, Vector2};
use takeoff_core::{
    Arc, AttributeDef, BoundaryLoop, Circle, Dimension, Ellipse, EntityData, Hatch, Leader, Line,
    Point2D, Polyline, PolylineVertex, Solid, Spline, Text,
};

/// Homogeneous 2D affine transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    matrix: Matrix3<f64>,
}

impl Transform2D {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            matrix: Matrix3::new_translation(&Vector2::new(dx, dy)),
        }
    }

    /// Rotation about the origin, in degrees
    pub fn rotation(degrees: f64) -> Self {
        Self {
            matrix: Matrix3::new_rotation(degrees.to_radians()),
        }
    }

    pub fn scaling(sx: f64, sy: f64) -> Self {
        Self {
            matrix: Matrix3::new_nonuniform_scaling(&Vector2::new(sx, sy)),
        }
    }

    /// Transform of a single placement relative to its parent
    pub fn from_placement(
        position: Point2D,
        rotation_degrees: f64,
        scale_x: f64,
        scale_y: f64,
        base_point: Point2D,
    ) -> Self {
        Self::translation(position.x, position.y)
            .then(&Self::rotation(rotation_degrees))
            .then(&Self::scaling(scale_x, scale_y))
            .then(&Self::translation(-base_point.x, -base_point.y))
    }

    /// `self ∘ child`: apply `child` first, then `self`
    pub fn then(&self, child: &Transform2D) -> Transform2D {
        Transform2D {
            matrix: self.matrix * child.matrix,
        }
    }

    #[inline]
    pub fn apply(&self, p: &Point2D) -> Point2D {
        let m = &self.matrix;
        Point2D::new(
            m[(0, 0)] * p.x + m[(0, 1)] * p.y + m[(0, 2)],
            m[(1, 0)] * p.x + m[(1, 1)] * p.y + m[(1, 2)],
        )
    }

    /// Apply only the linear part (directions and offsets)
    #[inline]
    pub fn apply_vector(&self, v: &Point2D) -> Point2D {
        let m = &self.matrix;
        Point2D::new(
            m[(0, 0)] * v.x + m[(0, 1)] * v.y,
            m[(1, 0)] * v.x + m[(1, 1)] * v.y,
        )
    }

    /// Determinant of the linear part
    #[inline]
    pub fn determinant(&self) -> f64 {
        let m = &self.matrix;
        m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
    }

    /// Factor by which areas scale
    #[inline]
    pub fn area_scale(&self) -> f64 {
        self.determinant().abs()
    }

    /// Mean linear scale; exact for uniform scaling
    #[inline]
    pub fn linear_scale(&self) -> f64 {
        self.area_scale().sqrt()
    }

    /// Orientation-reversing (negative scale on one axis)
    #[inline]
    pub fn is_mirrored(&self) -> bool {
        self.determinant() < 0.0
    }

    /// Angle of the transformed x axis, in degrees
    pub fn rotation_degrees(&self) -> f64 {
        self.matrix[(1, 0)].atan2(self.matrix[(0, 0)]).to_degrees()
    }

    /// Lengths of the transformed unit axes
    pub fn axis_scales(&self) -> (f64, f64) {
        let m = &self.matrix;
        (m[(0, 0)].hypot(m[(1, 0)]), m[(0, 1)].hypot(m[(1, 1)]))
    }

    /// Equal axis scales and no shear: circles stay circles
    pub fn is_conformal(&self) -> bool {
        let m = &self.matrix;
        let (sx, sy) = self.axis_scales();
        let shear = m[(0, 0)] * m[(0, 1)] + m[(1, 0)] * m[(1, 1)];
        let tolerance = 1e-9 * sx.max(sy);
        (sx - sy).abs() <= tolerance && shear.abs() <= tolerance * sx.max(sy)
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite())
    }

    /// Map an angle (degrees) through the linear part
    fn map_angle(&self, degrees: f64) -> f64 {
        let r = degrees.to_radians();
        let d = self.apply_vector(&Point2D::new(r.cos(), r.sin()));
        d.y.atan2(d.x).to_degrees()
    }

    /// Transform entity geometry into the parent coordinate system.
    ///
    /// Points map exactly. Radii and text heights use the mean linear scale,
    /// so circles under non-uniform scaling keep their area rather than
    /// becoming ellipses. Placements are expanded by the resolver and are
    /// returned with only their position mapped.
    pub fn apply_to_entity(&self, data: &EntityData) -> EntityData {
        let mirrored = self.is_mirrored();
        let scale = self.linear_scale();

        match data {
            EntityData::Line(line) => EntityData::Line(Line {
                start: self.apply(&line.start),
                end: self.apply(&line.end),
            }),
            EntityData::Polyline(poly) => EntityData::Polyline(Polyline {
                vertices: poly
                    .vertices
                    .iter()
                    .map(|v| self.apply_vertex(v, mirrored))
                    .collect(),
                closed: poly.closed,
            }),
            EntityData::Arc(arc) => {
                let a1 = self.map_angle(arc.start_angle);
                let a2 = self.map_angle(arc.end_angle);
                // a reflection reverses the direction of travel
                let (start_angle, end_angle) = if mirrored { (a2, a1) } else { (a1, a2) };
                EntityData::Arc(Arc {
                    center: self.apply(&arc.center),
                    radius: arc.radius * scale,
                    start_angle,
                    end_angle,
                })
            }
            EntityData::Circle(circle) => EntityData::Circle(Circle {
                center: self.apply(&circle.center),
                radius: circle.radius * scale,
            }),
            EntityData::Ellipse(ellipse) => {
                let major_axis = self.apply_vector(&ellipse.major_axis);
                let old_major = ellipse.major_axis.x.hypot(ellipse.major_axis.y);
                let new_major = major_axis.x.hypot(major_axis.y);
                // minor axis follows from the area scale: a'b' = |det| · ab
                let ratio = if new_major > 0.0 {
                    ellipse.ratio * old_major * old_major * self.area_scale()
                        / (new_major * new_major)
                } else {
                    ellipse.ratio
                };
                let (start_param, end_param) = if mirrored {
                    (-ellipse.end_param, -ellipse.start_param)
                } else {
                    (ellipse.start_param, ellipse.end_param)
                };
                EntityData::Ellipse(Ellipse {
                    center: self.apply(&ellipse.center),
                    major_axis,
                    ratio,
                    start_param,
                    end_param,
                })
            }
            EntityData::Spline(spline) => EntityData::Spline(Spline {
                control_points: spline.control_points.iter().map(|p| self.apply(p)).collect(),
                fit_points: spline.fit_points.iter().map(|p| self.apply(p)).collect(),
                closed: spline.closed,
            }),
            EntityData::Hatch(hatch) => EntityData::Hatch(Hatch {
                pattern: hatch.pattern.clone(),
                solid_fill: hatch.solid_fill,
                loops: hatch
                    .loops
                    .iter()
                    .map(|l| BoundaryLoop {
                        vertices: l
                            .vertices
                            .iter()
                            .map(|v| self.apply_vertex(v, mirrored))
                            .collect(),
                        external: l.external,
                    })
                    .collect(),
            }),
            EntityData::Solid(solid) => EntityData::Solid(Solid {
                corners: solid.corners.iter().map(|p| self.apply(p)).collect(),
            }),
            EntityData::Insert(insert) => {
                let mut moved = insert.clone();
                moved.position = self.apply(&insert.position);
                EntityData::Insert(moved)
            }
            EntityData::Text(text) => EntityData::Text(Text {
                content: text.content.clone(),
                position: self.apply(&text.position),
                height: text.height * scale,
            }),
            EntityData::Dimension(dim) => EntityData::Dimension(Dimension {
                text: dim.text.clone(),
                measurement: dim.measurement,
                position: self.apply(&dim.position),
            }),
            EntityData::Leader(leader) => EntityData::Leader(Leader {
                vertices: leader.vertices.iter().map(|p| self.apply(p)).collect(),
                text: leader.text.clone(),
            }),
            EntityData::Attribute(attr) => EntityData::Attribute(AttributeDef {
                tag: attr.tag.clone(),
                default_text: attr.default_text.clone(),
                position: self.apply(&attr.position),
            }),
        }
    }

    fn apply_vertex(&self, v: &PolylineVertex, mirrored: bool) -> PolylineVertex {
        PolylineVertex::new(
            self.apply(&v.point),
            if mirrored { -v.bulge } else { v.bulge },
        )
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_placement_maps_base_point_to_position() {
        let t = Transform2D::from_placement(
            Point2D::new(100.0, 50.0),
            90.0,
            2.0,
            2.0,
            Point2D::new(1.0, 0.0),
        );
        let p = t.apply(&Point2D::new(1.0, 0.0));
        assert_relative_eq!(p.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 50.0, epsilon = 1e-9);

        // (2,0) is one unit along block x: scaled to 2, rotated onto +y
        let q = t.apply(&Point2D::new(2.0, 0.0));
        assert_relative_eq!(q.x, 100.0, epsilon = 1e-9);
        assert_relative_eq!(q.y, 52.0, epsilon = 1e-9);
        assert_relative_eq!(t.linear_scale(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(t.rotation_degrees(), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_conformal_placements() {
        let rotated = Transform2D::from_placement(Point2D::ORIGIN, 30.0, 2.0, 2.0, Point2D::ORIGIN);
        assert!(rotated.is_conformal());

        let stretched = Transform2D::from_placement(Point2D::ORIGIN, 30.0, 2.0, 1.0, Point2D::ORIGIN);
        assert!(!stretched.is_conformal());

        // rotation between two non-uniform scalings shears
        let sheared = Transform2D::scaling(1.0, 2.0)
            .then(&Transform2D::rotation(45.0))
            .then(&Transform2D::scaling(2.0, 1.0));
        assert!(!sheared.is_conformal());
    }

    #[test]
    fn test_composition_order() {
        let parent = Transform2D::translation(10.0, 0.0);
        let child = Transform2D::scaling(3.0, 3.0);
        let p = parent.then(&child).apply(&Point2D::new(1.0, 1.0));
        assert_eq!(p, Point2D::new(13.0, 3.0));
    }

    #[test]
    fn test_mirrored_arc_keeps_sweep() {
        let arc = EntityData::Arc(Arc {
            center: Point2D::ORIGIN,
            radius: 1.0,
            start_angle: 0.0,
            end_angle: 90.0,
        });
        let mirror = Transform2D::scaling(-1.0, 1.0);
        assert!(mirror.is_mirrored());
        assert!(mirror.is_conformal());
        match mirror.apply_to_entity(&arc) {
            EntityData::Arc(a) => {
                assert_relative_eq!(a.start_angle, 90.0, epsilon = 1e-9);
                assert_relative_eq!(a.end_angle, 180.0, epsilon = 1e-9);
                assert_relative_eq!(a.sweep(), std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
            }
            other => panic!("expected arc, got {:?}", other),
        }
    }
}
