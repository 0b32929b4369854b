// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsed drawing: header variables, layers, symbol definitions, entities

use crate::decode::{decode_drawing_bytes, TextEncoding};
use crate::entities::{Entity, Point2D};
use crate::error::Result;
use crate::model_bounds::DrawingBounds;
use crate::parser::parse_drawing;
use rustc_hash::FxHashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Header variables relevant to measurement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderVars {
    pub acad_version: Option<String>,
    /// Raw `$INSUNITS` code
    pub insunits: Option<i32>,
    pub extmin: Option<Point2D>,
    pub extmax: Option<Point2D>,
}

impl HeaderVars {
    /// Declared extents, when both corners are present and sensible
    pub fn declared_bounds(&self) -> Option<DrawingBounds> {
        let (min, max) = (self.extmin?, self.extmax?);
        if max.x < min.x || max.y < min.y {
            // AutoCAD writes inverted 1e20 extents for empty drawings
            return None;
        }
        let mut bounds = DrawingBounds::new();
        bounds.expand_point(&min);
        bounds.expand_point(&max);
        Some(bounds)
    }
}

/// Layer table record
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LayerDef {
    pub name: String,
    pub frozen: bool,
    /// Layer switched off (negative color number)
    pub off: bool,
}

/// Symbol definition from the BLOCKS section
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDefinition {
    pub name: String,
    pub base_point: Point2D,
    pub flags: i32,
    pub entities: Vec<Entity>,
}

impl BlockDefinition {
    /// External reference (geometry lives in another file)
    pub fn is_xref(&self) -> bool {
        self.flags & 4 != 0
    }
}

/// A malformed entity that was excluded from the drawing
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkippedEntity {
    pub entity_type: String,
    pub line: usize,
    pub layer: Option<String>,
    pub reason: String,
}

/// A fully read drawing
#[derive(Debug, Clone)]
pub struct Drawing {
    pub encoding: TextEncoding,
    pub header: HeaderVars,
    pub layers: Vec<LayerDef>,
    pub blocks: FxHashMap<String, BlockDefinition>,
    /// Model-space entities in file order
    pub entities: Vec<Entity>,
    pub skipped: Vec<SkippedEntity>,
    /// Entity types outside the supported set, by type name
    pub ignored_types: FxHashMap<String, usize>,
}

impl Drawing {
    pub fn new() -> Self {
        Self {
            encoding: TextEncoding::Utf8,
            header: HeaderVars::default(),
            layers: Vec::new(),
            blocks: FxHashMap::default(),
            entities: Vec::new(),
            skipped: Vec::new(),
            ignored_types: FxHashMap::default(),
        }
    }

    /// Decode and parse raw drawing bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded = decode_drawing_bytes(bytes)?;
        let mut drawing = parse_drawing(&decoded.text)?;
        drawing.encoding = decoded.encoding;
        Ok(drawing)
    }

    /// Parse already-decoded text
    pub fn parse(text: &str) -> Result<Self> {
        parse_drawing(text)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerDef> {
        self.layers.iter().find(|l| l.name.eq_ignore_ascii_case(name))
    }

    /// Frozen or switched-off layers do not contribute geometry
    pub fn is_layer_hidden(&self, name: &str) -> bool {
        self.layer(name).map(|l| l.frozen || l.off).unwrap_or(false)
    }

    pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
        self.blocks.get(name)
    }
}

impl Default for Drawing {
    fn default() -> Self {
        Self::new()
    }
}
