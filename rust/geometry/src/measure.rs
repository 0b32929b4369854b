// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Measurement primitives in raw drawing units
//!
//! Lengths of straight and curved segments, polygon areas (bulge-aware),
//! and centroids. Callers convert results to SI.

use std::f64::consts::{PI, TAU};
use takeoff_core::{Ellipse, Hatch, Point2D, PolylineVertex, Solid, Spline};

#[inline]
pub fn segment_length(a: &Point2D, b: &Point2D) -> f64 {
    a.distance_to(b)
}

/// Included angle of a bulged segment, in radians
#[inline]
pub fn bulge_angle(bulge: f64) -> f64 {
    4.0 * bulge.abs().atan()
}

/// Radius of the arc through a chord with the given bulge
#[inline]
pub fn bulge_radius(chord: f64, bulge: f64) -> f64 {
    chord / (2.0 * (bulge_angle(bulge) / 2.0).sin())
}

/// Arc length of a bulged segment.
///
/// `angle = 4·atan(|bulge|)`, `R = chord / (2·sin(angle/2))` and
/// `L = 2R·asin(chord / 2R)`. Past a semicircle (`|bulge| > 1`) the arcsine
/// only yields the minor arc, so the major arc uses `R·angle`.
pub fn bulge_arc_length(chord: f64, bulge: f64) -> f64 {
    if bulge == 0.0 || chord == 0.0 {
        return chord;
    }
    let angle = bulge_angle(bulge);
    let radius = bulge_radius(chord, bulge);
    if bulge.abs() <= 1.0 {
        2.0 * radius * (chord / (2.0 * radius)).min(1.0).asin()
    } else {
        radius * angle
    }
}

/// Length of the segment from `a` to `b` with `a`'s bulge
#[inline]
pub fn vertex_segment_length(a: &PolylineVertex, b: &PolylineVertex) -> f64 {
    bulge_arc_length(segment_length(&a.point, &b.point), a.bulge)
}

/// Polyline length; `closed` adds the wrap segment from the last vertex to the first
pub fn polyline_length(vertices: &[PolylineVertex], closed: bool) -> f64 {
    let mut total: f64 = vertices
        .windows(2)
        .map(|w| vertex_segment_length(&w[0], &w[1]))
        .sum();
    if closed && vertices.len() > 2 {
        if let (Some(last), Some(first)) = (vertices.last(), vertices.first()) {
            total += vertex_segment_length(last, first);
        }
    }
    total
}

/// Circular arc length from radius and included angle (radians)
#[inline]
pub fn arc_length(radius: f64, sweep: f64) -> f64 {
    radius * sweep
}

/// Ellipse arc length.
///
/// Ramanujan's perimeter approximation, scaled by the parametric span.
pub fn ellipse_length(ellipse: &Ellipse) -> f64 {
    let a = ellipse.major_axis.x.hypot(ellipse.major_axis.y);
    let b = a * ellipse.ratio.abs();
    let perimeter = PI * (3.0 * (a + b) - ((3.0 * a + b) * (a + 3.0 * b)).sqrt());

    let mut span = (ellipse.end_param - ellipse.start_param).rem_euclid(TAU);
    if span == 0.0 {
        span = TAU;
    }
    perimeter * span / TAU
}

/// Which polygon a spline length was measured along
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplineBasis {
    FitPoints,
    /// Control polygon; overestimates the curve
    ControlPolygon,
}

pub fn spline_length(spline: &Spline) -> (f64, SplineBasis) {
    let (points, basis) = if spline.fit_points.len() >= 2 {
        (&spline.fit_points, SplineBasis::FitPoints)
    } else {
        (&spline.control_points, SplineBasis::ControlPolygon)
    };
    let mut total: f64 = points.windows(2).map(|w| w[0].distance_to(&w[1])).sum();
    if spline.closed && points.len() > 2 {
        if let (Some(last), Some(first)) = (points.last(), points.first()) {
            total += last.distance_to(first);
        }
    }
    (total, basis)
}

/// Signed Shoelace sum, positive for counter-clockwise rings
pub fn signed_shoelace_area(points: &[Point2D]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let p = &points[i];
        let q = &points[(i + 1) % n];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

/// `0.5 · |Σ(x_i·y_{i+1} − x_{i+1}·y_i)|`
#[inline]
pub fn shoelace_area(points: &[Point2D]) -> f64 {
    signed_shoelace_area(points).abs()
}

/// Signed area between a bulged segment's chord and its arc
fn signed_bulge_segment_area(a: &PolylineVertex, b: &PolylineVertex) -> f64 {
    if a.bulge == 0.0 {
        return 0.0;
    }
    let chord = segment_length(&a.point, &b.point);
    if chord == 0.0 {
        return 0.0;
    }
    let angle = bulge_angle(a.bulge);
    let radius = bulge_radius(chord, a.bulge);
    let area = radius * radius / 2.0 * (angle - angle.sin());
    area.copysign(a.bulge)
}

/// Area of a closed ring whose segments may be arcs.
///
/// A positive bulge curves to the right of the travel direction, which is
/// outward for a counter-clockwise ring, so the circular segment areas add
/// with the bulge sign to the signed Shoelace area.
pub fn polygon_area(vertices: &[PolylineVertex]) -> f64 {
    let n = vertices.len();
    if n < 2 {
        return 0.0;
    }
    let points: Vec<Point2D> = vertices.iter().map(|v| v.point).collect();
    let mut signed = signed_shoelace_area(&points);
    for i in 0..n {
        signed += signed_bulge_segment_area(&vertices[i], &vertices[(i + 1) % n]);
    }
    signed.abs()
}

/// Area-weighted centroid of a ring; the vertex mean for degenerate rings
pub fn centroid(points: &[Point2D]) -> Point2D {
    if points.is_empty() {
        return Point2D::ORIGIN;
    }
    let n = points.len();
    let area = signed_shoelace_area(points);
    if area.abs() < 1e-12 {
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        return Point2D::new(sx / n as f64, sy / n as f64);
    }
    let (mut cx, mut cy) = (0.0, 0.0);
    for i in 0..n {
        let p = &points[i];
        let q = &points[(i + 1) % n];
        let cross = p.x * q.y - q.x * p.y;
        cx += (p.x + q.x) * cross;
        cy += (p.y + q.y) * cross;
    }
    Point2D::new(cx / (6.0 * area), cy / (6.0 * area))
}

/// Filled region area, summed across boundary loops
pub fn hatch_area(hatch: &Hatch) -> f64 {
    hatch.loops.iter().map(|l| polygon_area(&l.vertices)).sum()
}

#[inline]
pub fn solid_area(solid: &Solid) -> f64 {
    shoelace_area(&solid.corners)
}

/// True when a polyline's last vertex returns to its first
pub fn is_implicitly_closed(vertices: &[PolylineVertex], tolerance: f64) -> bool {
    match (vertices.first(), vertices.last()) {
        (Some(first), Some(last)) if vertices.len() > 3 => {
            first.point.distance_to(&last.point) <= tolerance
        }
        _ => false,
    }
}
