// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed drawing entities
//!
//! Every entity type the reader understands is a variant of [`EntityData`].
//! Types outside this set never become entities; the parser only counts them.

use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A 2D point in raw drawing units
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const ORIGIN: Point2D = Point2D { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point2D) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &Point2D) -> Point2D {
        Point2D::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Polyline vertex with the bulge of the segment that starts at it.
///
/// `bulge = tan(θ/4)` where θ is the included angle of the arc segment;
/// zero means a straight segment, negative means clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PolylineVertex {
    pub point: Point2D,
    pub bulge: f64,
}

impl PolylineVertex {
    pub fn new(point: Point2D, bulge: f64) -> Self {
        Self { point, bulge }
    }

    pub fn straight(x: f64, y: f64) -> Self {
        Self::new(Point2D::new(x, y), 0.0)
    }
}

pub type VertexList = SmallVec<[PolylineVertex; 8]>;

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub start: Point2D,
    pub end: Point2D,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub vertices: VertexList,
    pub closed: bool,
}

/// Circular arc; angles in degrees, counter-clockwise from start to end
#[derive(Debug, Clone, PartialEq)]
pub struct Arc {
    pub center: Point2D,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

impl Arc {
    /// Included angle in radians, always in `(0, 2π]`
    pub fn sweep(&self) -> f64 {
        let mut sweep = (self.end_angle - self.start_angle).rem_euclid(360.0);
        if sweep == 0.0 {
            sweep = 360.0;
        }
        sweep.to_radians()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Circle {
    pub center: Point2D,
    pub radius: f64,
}

/// Ellipse or elliptical arc; parameters in radians
#[derive(Debug, Clone, PartialEq)]
pub struct Ellipse {
    pub center: Point2D,
    /// Major axis end point relative to the center
    pub major_axis: Point2D,
    /// Minor/major axis ratio
    pub ratio: f64,
    pub start_param: f64,
    pub end_param: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spline {
    pub control_points: Vec<Point2D>,
    pub fit_points: Vec<Point2D>,
    pub closed: bool,
}

/// One boundary loop of a filled region
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryLoop {
    pub vertices: VertexList,
    /// Outer/external loop per the hatch path flags
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hatch {
    pub pattern: String,
    pub solid_fill: bool,
    pub loops: Vec<BoundaryLoop>,
}

/// Filled triangle or quadrilateral, corners in drawing order
#[derive(Debug, Clone, PartialEq)]
pub struct Solid {
    pub corners: SmallVec<[Point2D; 4]>,
}

/// Attribute value attached to a symbol placement
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValue {
    pub tag: String,
    pub text: String,
    pub position: Point2D,
}

/// Symbol placement (`INSERT`)
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub name: String,
    pub position: Point2D,
    /// Rotation in degrees
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub columns: u32,
    pub rows: u32,
    pub column_spacing: f64,
    pub row_spacing: f64,
    pub attributes: Vec<AttributeValue>,
}

impl Insert {
    pub fn new(name: impl Into<String>, position: Point2D) -> Self {
        Self {
            name: name.into(),
            position,
            rotation: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            columns: 1,
            rows: 1,
            column_spacing: 0.0,
            row_spacing: 0.0,
            attributes: Vec::new(),
        }
    }

    /// Number of placements this insert stands for (array inserts expand)
    pub fn instance_count(&self) -> u32 {
        self.columns.max(1).saturating_mul(self.rows.max(1))
    }
}

/// Free text (`TEXT`, `MTEXT`)
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub content: String,
    pub position: Point2D,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    /// Display text after override resolution
    pub text: String,
    pub measurement: Option<f64>,
    pub position: Point2D,
}

/// Leader line, with the note content for multileaders
#[derive(Debug, Clone, PartialEq)]
pub struct Leader {
    pub vertices: Vec<Point2D>,
    pub text: Option<String>,
}

/// Attribute definition (template) or a free-standing attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub tag: String,
    pub default_text: String,
    pub position: Point2D,
}

/// Measurable geometry vs annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EntityClass {
    Measurable,
    Annotation,
}

/// Entity payload
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Line(Line),
    Polyline(Polyline),
    Arc(Arc),
    Circle(Circle),
    Ellipse(Ellipse),
    Spline(Spline),
    Hatch(Hatch),
    Solid(Solid),
    Insert(Insert),
    Text(Text),
    Dimension(Dimension),
    Leader(Leader),
    Attribute(AttributeDef),
}

impl EntityData {
    pub fn class(&self) -> EntityClass {
        match self {
            EntityData::Line(_)
            | EntityData::Polyline(_)
            | EntityData::Arc(_)
            | EntityData::Circle(_)
            | EntityData::Ellipse(_)
            | EntityData::Spline(_)
            | EntityData::Hatch(_)
            | EntityData::Solid(_)
            | EntityData::Insert(_) => EntityClass::Measurable,
            EntityData::Text(_)
            | EntityData::Dimension(_)
            | EntityData::Leader(_)
            | EntityData::Attribute(_) => EntityClass::Annotation,
        }
    }

    /// Stable, lowercase type tag used in evidence and histograms
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityData::Line(_) => "line",
            EntityData::Polyline(_) => "polyline",
            EntityData::Arc(_) => "arc",
            EntityData::Circle(_) => "circle",
            EntityData::Ellipse(_) => "ellipse",
            EntityData::Spline(_) => "spline",
            EntityData::Hatch(_) => "hatch",
            EntityData::Solid(_) => "solid",
            EntityData::Insert(_) => "insert",
            EntityData::Text(_) => "text",
            EntityData::Dimension(_) => "dimension",
            EntityData::Leader(_) => "leader",
            EntityData::Attribute(_) => "attribute",
        }
    }
}

/// A parsed entity with its common header
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Hex handle (group code 5), when the writer emitted one
    pub handle: Option<String>,
    pub layer: String,
    /// Line of the `0 <TYPE>` marker in the decoded text
    pub line: usize,
    pub data: EntityData,
}

impl Entity {
    pub fn new(layer: impl Into<String>, data: EntityData) -> Self {
        Self {
            handle: None,
            layer: layer.into(),
            line: 0,
            data,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    #[inline]
    pub fn class(&self) -> EntityClass {
        self.data.class()
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.data.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_classification_is_exhaustive() {
        let text = EntityData::Text(Text {
            content: "A-01".into(),
            position: Point2D::ORIGIN,
            height: 2.5,
        });
        assert_eq!(text.class(), EntityClass::Annotation);

        let insert = EntityData::Insert(Insert::new("DOOR", Point2D::ORIGIN));
        assert_eq!(insert.class(), EntityClass::Measurable);
        assert_eq!(insert.type_name(), "insert");
    }

    #[test]
    fn test_arc_sweep_wraps() {
        let arc = Arc {
            center: Point2D::ORIGIN,
            radius: 1.0,
            start_angle: 270.0,
            end_angle: 90.0,
        };
        assert_relative_eq!(arc.sweep(), std::f64::consts::PI, epsilon = 1e-12);

        let full = Arc {
            start_angle: 30.0,
            end_angle: 30.0,
            ..arc
        };
        assert_relative_eq!(full.sweep(), 2.0 * std::f64::consts::PI, epsilon = 1e-12);
    }
}
