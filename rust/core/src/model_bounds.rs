// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drawing bounds accumulation
//!
//! Bounds feed the dynamic noise threshold: the smallest length worth
//! measuring is a fixed fraction of the drawing's diagonal, so the
//! threshold follows the drawing's size instead of a constant.

use crate::entities::Point2D;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Axis-aligned 2D bounds
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DrawingBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    /// Number of points sampled
    pub sample_count: usize,
}

impl DrawingBounds {
    /// Create new bounds initialized to invalid state
    pub fn new() -> Self {
        Self {
            min_x: f64::MAX,
            min_y: f64::MAX,
            max_x: f64::MIN,
            max_y: f64::MIN,
            sample_count: 0,
        }
    }

    /// Check if bounds are valid (at least one point added)
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.sample_count > 0
    }

    #[inline]
    pub fn expand(&mut self, x: f64, y: f64) {
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.sample_count += 1;
    }

    #[inline]
    pub fn expand_point(&mut self, p: &Point2D) {
        self.expand(p.x, p.y);
    }

    /// Include a circle-like extent around a center
    pub fn expand_radius(&mut self, center: &Point2D, radius: f64) {
        let r = radius.abs();
        self.expand(center.x - r, center.y - r);
        self.expand(center.x + r, center.y + r);
    }

    pub fn width(&self) -> f64 {
        if self.is_valid() {
            self.max_x - self.min_x
        } else {
            0.0
        }
    }

    pub fn height(&self) -> f64 {
        if self.is_valid() {
            self.max_y - self.min_y
        } else {
            0.0
        }
    }

    /// Length of the bounding-box diagonal; zero when invalid
    #[inline]
    pub fn diagonal(&self) -> f64 {
        self.width().hypot(self.height())
    }

    pub fn centroid(&self) -> Point2D {
        if !self.is_valid() {
            return Point2D::ORIGIN;
        }
        Point2D::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Same bounds in another linear scale
    pub fn scaled(&self, factor: f64) -> DrawingBounds {
        if !self.is_valid() {
            return *self;
        }
        DrawingBounds {
            min_x: self.min_x * factor,
            min_y: self.min_y * factor,
            max_x: self.max_x * factor,
            max_y: self.max_y * factor,
            sample_count: self.sample_count,
        }
    }
}

impl Default for DrawingBounds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal() {
        let mut bounds = DrawingBounds::new();
        assert_eq!(bounds.diagonal(), 0.0);
        bounds.expand(0.0, 0.0);
        bounds.expand(30.0, 40.0);
        assert_eq!(bounds.diagonal(), 50.0);
        assert_eq!(bounds.scaled(2.0).diagonal(), 100.0);
        assert_eq!(bounds.centroid(), Point2D::new(15.0, 20.0));
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut bounds = DrawingBounds::new();
        bounds.expand(f64::NAN, 1.0);
        assert!(!bounds.is_valid());
    }
}
