// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Takeoff Core
//!
//! Tolerant reader for ASCII DXF drawings. Produces a typed entity model
//! with the layer, symbol and unit information quantity takeoff needs.
//!
//! ## Overview
//!
//! - **Decoding**: UTF-8 with a Windows-1252 fallback, BOM and line-ending
//!   normalization
//! - **Pair reading**: group-code/value pairs with single-pair look-back
//! - **Entity model**: lines, polylines with bulges, arcs, circles,
//!   ellipses, splines, hatches, solids, symbol placements and annotations
//! - **Units**: `$INSUNITS` resolution and SI conversion
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use takeoff_core::{Drawing, EntityData};
//!
//! let drawing = Drawing::from_bytes(&std::fs::read("plan.dxf")?)?;
//! for entity in &drawing.entities {
//!     if let EntityData::Line(line) = &entity.data {
//!         println!("{}: {:?} -> {:?}", entity.layer, line.start, line.end);
//!     }
//! }
//! for skipped in &drawing.skipped {
//!     println!("line {}: {} skipped ({})", skipped.line, skipped.entity_type, skipped.reason);
//! }
//! ```
//!
//! Malformed entities never abort a read; only a stream that cannot be
//! decoded or is not DXF at all returns an [`Error`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization support for units, bounds and diagnostics

pub mod decode;
pub mod document;
pub mod entities;
pub mod error;
pub mod model_bounds;
pub mod parser;
pub mod reader;
pub mod text;
pub mod units;

pub use decode::{decode_drawing_bytes, DecodedText, TextEncoding};
pub use document::{BlockDefinition, Drawing, HeaderVars, LayerDef, SkippedEntity};
pub use entities::{
    Arc, AttributeDef, AttributeValue, BoundaryLoop, Circle, Dimension, Ellipse, Entity,
    EntityClass, EntityData, Hatch, Insert, Leader, Line, Point2D, Polyline, PolylineVertex,
    Solid, Spline, Text, VertexList,
};
pub use error::{Error, Result};
pub use model_bounds::DrawingBounds;
pub use parser::parse_drawing;
pub use reader::{GroupPair, GroupReader};
pub use text::{decode_special_codes, strip_mtext_formatting};
pub use units::{
    from_si_area, from_si_length, guess_unit_from_extent, resolve_unit, resolve_unit_with_guess,
    to_si_area, to_si_length, DrawingUnit, UnitResolution, UnitSource,
};
