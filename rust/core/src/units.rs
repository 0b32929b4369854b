// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drawing unit resolution and conversion to SI
//!
//! The effective unit of a drawing is chosen in this order: the caller's
//! preference, the `$INSUNITS` header code, an optional extent-based guess,
//! and finally meters.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Linear units a drawing may be authored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DrawingUnit {
    Millimeter,
    Centimeter,
    Meter,
}

impl DrawingUnit {
    /// Multiplier from one drawing unit to meters
    #[inline]
    pub fn meters_per_unit(self) -> f64 {
        match self {
            DrawingUnit::Millimeter => 1e-3,
            DrawingUnit::Centimeter => 1e-2,
            DrawingUnit::Meter => 1.0,
        }
    }

    /// Map a `$INSUNITS` code; codes outside mm/cm/m are not recognized
    pub fn from_insunits(code: i32) -> Option<Self> {
        match code {
            4 => Some(DrawingUnit::Millimeter),
            5 => Some(DrawingUnit::Centimeter),
            6 => Some(DrawingUnit::Meter),
            _ => None,
        }
    }

    pub fn insunits_code(self) -> i32 {
        match self {
            DrawingUnit::Millimeter => 4,
            DrawingUnit::Centimeter => 5,
            DrawingUnit::Meter => 6,
        }
    }

    /// Parse a user-facing unit name (`mm`, `cm`, `m`, long forms, either spelling)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mm" | "millimeter" | "millimetre" | "millimeters" | "millimetres" => {
                Some(DrawingUnit::Millimeter)
            }
            "cm" | "centimeter" | "centimetre" | "centimeters" | "centimetres" => {
                Some(DrawingUnit::Centimeter)
            }
            "m" | "meter" | "metre" | "meters" | "metres" => Some(DrawingUnit::Meter),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            DrawingUnit::Millimeter => "mm",
            DrawingUnit::Centimeter => "cm",
            DrawingUnit::Meter => "m",
        }
    }
}

impl std::fmt::Display for DrawingUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Where the effective unit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum UnitSource {
    Preferred,
    Declared,
    Inferred,
    Default,
}

/// Effective unit of a drawing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UnitResolution {
    pub unit: DrawingUnit,
    pub source: UnitSource,
}

impl UnitResolution {
    #[inline]
    pub fn to_si_length(&self, raw: f64) -> f64 {
        to_si_length(raw, self.unit)
    }

    #[inline]
    pub fn to_si_area(&self, raw: f64) -> f64 {
        to_si_area(raw, self.unit)
    }
}

/// Choose the effective unit: preference, then declared header code, then meters
pub fn resolve_unit(preferred: Option<DrawingUnit>, declared: Option<i32>) -> UnitResolution {
    resolve_unit_with_guess(preferred, declared, None)
}

/// Like [`resolve_unit`], with an extent-based guess consulted before the default
pub fn resolve_unit_with_guess(
    preferred: Option<DrawingUnit>,
    declared: Option<i32>,
    guess: Option<DrawingUnit>,
) -> UnitResolution {
    if let Some(unit) = preferred {
        return UnitResolution {
            unit,
            source: UnitSource::Preferred,
        };
    }
    if let Some(unit) = declared.and_then(DrawingUnit::from_insunits) {
        return UnitResolution {
            unit,
            source: UnitSource::Declared,
        };
    }
    if let Some(unit) = guess {
        return UnitResolution {
            unit,
            source: UnitSource::Inferred,
        };
    }
    UnitResolution {
        unit: DrawingUnit::Meter,
        source: UnitSource::Default,
    }
}

/// Guess the unit from the raw extent diagonal.
///
/// Building drawings span tens to hundreds of meters; a raw diagonal in the
/// thousands only makes sense in millimeters.
pub fn guess_unit_from_extent(raw_diagonal: f64) -> Option<DrawingUnit> {
    if raw_diagonal.is_finite() && raw_diagonal > 2_000.0 {
        Some(DrawingUnit::Millimeter)
    } else {
        None
    }
}

#[inline]
pub fn to_si_length(raw: f64, unit: DrawingUnit) -> f64 {
    raw * unit.meters_per_unit()
}

#[inline]
pub fn to_si_area(raw: f64, unit: DrawingUnit) -> f64 {
    let f = unit.meters_per_unit();
    raw * f * f
}

#[inline]
pub fn from_si_length(si: f64, unit: DrawingUnit) -> f64 {
    si / unit.meters_per_unit()
}

#[inline]
pub fn from_si_area(si: f64, unit: DrawingUnit) -> f64 {
    let f = unit.meters_per_unit();
    si / (f * f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL: [DrawingUnit; 3] = [
        DrawingUnit::Millimeter,
        DrawingUnit::Centimeter,
        DrawingUnit::Meter,
    ];

    #[test]
    fn test_insunits_codes() {
        assert_eq!(DrawingUnit::from_insunits(4), Some(DrawingUnit::Millimeter));
        assert_eq!(DrawingUnit::from_insunits(5), Some(DrawingUnit::Centimeter));
        assert_eq!(DrawingUnit::from_insunits(6), Some(DrawingUnit::Meter));
        assert_eq!(DrawingUnit::from_insunits(1), None);
        assert_eq!(DrawingUnit::from_insunits(0), None);
        for unit in ALL {
            assert_eq!(DrawingUnit::from_insunits(unit.insunits_code()), Some(unit));
        }
    }

    #[test]
    fn test_round_trip_every_unit() {
        for unit in ALL {
            for raw in [0.0, 1.0, 12.345, 98_765.4321, -3.5] {
                assert_relative_eq!(from_si_length(to_si_length(raw, unit), unit), raw, epsilon = 1e-9);
                assert_relative_eq!(from_si_area(to_si_area(raw, unit), unit), raw, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_area_uses_squared_factor() {
        assert_relative_eq!(to_si_area(100_000_000.0, DrawingUnit::Millimeter), 100.0);
        assert_relative_eq!(to_si_area(10_000.0, DrawingUnit::Centimeter), 1.0);
    }

    #[test]
    fn test_resolution_order() {
        let r = resolve_unit(Some(DrawingUnit::Centimeter), Some(4));
        assert_eq!(r.unit, DrawingUnit::Centimeter);
        assert_eq!(r.source, UnitSource::Preferred);

        let r = resolve_unit(None, Some(4));
        assert_eq!(r.unit, DrawingUnit::Millimeter);
        assert_eq!(r.source, UnitSource::Declared);

        let r = resolve_unit(None, Some(99));
        assert_eq!(r.unit, DrawingUnit::Meter);
        assert_eq!(r.source, UnitSource::Default);

        let r = resolve_unit_with_guess(None, None, guess_unit_from_extent(35_000.0));
        assert_eq!(r.unit, DrawingUnit::Millimeter);
        assert_eq!(r.source, UnitSource::Inferred);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(DrawingUnit::parse("MM"), Some(DrawingUnit::Millimeter));
        assert_eq!(DrawingUnit::parse(" metre "), Some(DrawingUnit::Meter));
        assert_eq!(DrawingUnit::parse("ft"), None);
    }
}
