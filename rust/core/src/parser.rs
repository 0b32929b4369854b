// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DXF section and entity parser
//!
//! Structural problems (a group code that is not a number, no sections at
//! all) abort with [`Error::Format`]. Problems inside one entity only drop
//! that entity and are recorded as a [`SkippedEntity`].

use smallvec::SmallVec;

use crate::document::{BlockDefinition, Drawing, LayerDef, SkippedEntity};
use crate::entities::*;
use crate::error::{Error, Result};
use crate::reader::{GroupPair, GroupReader};
use crate::text::{decode_special_codes, strip_mtext_formatting};

type BuildResult = std::result::Result<EntityData, String>;

/// Parse a decoded DXF text into a [`Drawing`]
pub fn parse_drawing(text: &str) -> Result<Drawing> {
    DrawingParser::new(text).parse()
}

struct DrawingParser<'a> {
    reader: GroupReader<'a>,
    drawing: Drawing,
}

impl<'a> DrawingParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            reader: GroupReader::new(text),
            drawing: Drawing::new(),
        }
    }

    fn parse(mut self) -> Result<Drawing> {
        let mut sections = 0usize;

        while let Some(pair) = self.reader.next_pair()? {
            match (pair.code, pair.value) {
                (999, _) => continue,
                (0, "SECTION") => {
                    let name = self.reader.next_pair()?.ok_or_else(|| {
                        Error::format(pair.line, "SECTION without a name")
                    })?;
                    if name.code != 2 {
                        return Err(Error::format(
                            name.line,
                            format!("SECTION name uses group code {} (expected 2)", name.code),
                        ));
                    }
                    sections += 1;
                    match name.value {
                        "HEADER" => self.parse_header()?,
                        "TABLES" => self.parse_tables()?,
                        "BLOCKS" => self.parse_blocks()?,
                        "ENTITIES" => {
                            let entities = self.parse_entity_list("ENDSEC")?;
                            self.drawing.entities.extend(entities);
                        }
                        _ => self.skip_section()?,
                    }
                }
                (0, "EOF") => break,
                (0, other) => {
                    return Err(Error::format(
                        pair.line,
                        format!("unexpected marker {} outside a section", other),
                    ))
                }
                (code, _) => {
                    return Err(Error::format(
                        pair.line,
                        format!("unexpected group code {} outside a section", code),
                    ))
                }
            }
        }

        if sections == 0 {
            return Err(Error::format(
                self.reader.line(),
                "no SECTION found; the stream is not a DXF drawing",
            ));
        }

        Ok(self.drawing)
    }

    fn skip_section(&mut self) -> Result<()> {
        while let Some(pair) = self.reader.next_pair()? {
            if pair.is_marker("ENDSEC") {
                break;
            }
        }
        Ok(())
    }

    fn parse_header(&mut self) -> Result<()> {
        let mut variable: Option<&'a str> = None;
        let mut extmin = Point2D::ORIGIN;
        let mut extmax = Point2D::ORIGIN;

        while let Some(pair) = self.reader.next_pair()? {
            if pair.code == 0 {
                if !pair.is_marker("ENDSEC") {
                    self.reader.put_back(pair);
                }
                break;
            }
            if pair.code == 9 {
                variable = Some(pair.value);
                continue;
            }
            let header = &mut self.drawing.header;
            match (variable, pair.code) {
                (Some("$ACADVER"), 1) => header.acad_version = Some(pair.value.to_string()),
                (Some("$INSUNITS"), 70) => header.insunits = pair.as_i32(),
                (Some("$EXTMIN"), 10) => {
                    extmin.x = pair.as_f64().unwrap_or(0.0);
                }
                (Some("$EXTMIN"), 20) => {
                    extmin.y = pair.as_f64().unwrap_or(0.0);
                    header.extmin = Some(extmin);
                }
                (Some("$EXTMAX"), 10) => {
                    extmax.x = pair.as_f64().unwrap_or(0.0);
                }
                (Some("$EXTMAX"), 20) => {
                    extmax.y = pair.as_f64().unwrap_or(0.0);
                    header.extmax = Some(extmax);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_tables(&mut self) -> Result<()> {
        while let Some(pair) = self.reader.next_pair()? {
            if pair.is_marker("ENDSEC") {
                break;
            }
            if pair.is_marker("LAYER") {
                let body = self.reader.read_body()?;
                if let Some(layer) = layer_from_body(&body) {
                    self.drawing.layers.push(layer);
                }
            }
        }
        Ok(())
    }

    fn parse_blocks(&mut self) -> Result<()> {
        while let Some(pair) = self.reader.next_pair()? {
            if pair.is_marker("ENDSEC") {
                break;
            }
            if !pair.is_marker("BLOCK") {
                continue;
            }

            let body = self.reader.read_body()?;
            let name = str_value(&body, 2)
                .or_else(|| str_value(&body, 3))
                .unwrap_or_default()
                .to_string();
            let flags = i32_value(&body, 70).unwrap_or(0);
            let base_point = Point2D::new(
                f64_value(&body, 10).unwrap_or(0.0),
                f64_value(&body, 20).unwrap_or(0.0),
            );

            let entities = self.parse_entity_list("ENDBLK")?;

            if name.is_empty() {
                self.drawing.skipped.push(SkippedEntity {
                    entity_type: "BLOCK".to_string(),
                    line: pair.line,
                    layer: None,
                    reason: "block definition without a name".to_string(),
                });
                continue;
            }

            self.drawing.blocks.insert(
                name.clone(),
                BlockDefinition {
                    name,
                    base_point,
                    flags,
                    entities,
                },
            );
        }
        Ok(())
    }

    /// Parse entities until the `terminator` marker (consumed) or the end of
    /// the enclosing section (left for the caller).
    fn parse_entity_list(&mut self, terminator: &str) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();

        while let Some(pair) = self.reader.next_pair()? {
            if pair.code != 0 {
                continue;
            }
            if pair.value == terminator {
                self.reader.read_body()?;
                break;
            }
            if pair.value == "ENDSEC" || pair.value == "EOF" {
                self.reader.put_back(pair);
                break;
            }
            if let Some(entity) = self.parse_entity(pair)? {
                entities.push(entity);
            }
        }

        Ok(entities)
    }

    fn parse_entity(&mut self, marker: GroupPair<'a>) -> Result<Option<Entity>> {
        let type_name = marker.value;
        let body = self.reader.read_body()?;

        let built = match type_name {
            "LINE" => build_line(&body),
            "LWPOLYLINE" => build_lwpolyline(&body),
            "POLYLINE" => {
                let vertices = self.read_sequence("VERTEX")?;
                build_polyline(&body, &vertices)
            }
            "ARC" => build_arc(&body),
            "CIRCLE" => build_circle(&body),
            "ELLIPSE" => build_ellipse(&body),
            "SPLINE" => build_spline(&body),
            "HATCH" => build_hatch(&body),
            "SOLID" => build_solid(&body),
            "INSERT" => {
                let attribs = if i32_value(&body, 66) == Some(1) {
                    self.read_sequence("ATTRIB")?
                } else {
                    Vec::new()
                };
                build_insert(&body, &attribs)
            }
            "TEXT" => build_text(&body),
            "MTEXT" => build_mtext(&body),
            "DIMENSION" => build_dimension(&body),
            "LEADER" => build_leader(&body),
            "MLEADER" | "MULTILEADER" => build_mleader(&body),
            "ATTDEF" | "ATTRIB" => build_attribute(&body),
            _ => {
                *self
                    .drawing
                    .ignored_types
                    .entry(type_name.to_string())
                    .or_insert(0) += 1;
                return Ok(None);
            }
        };

        let layer = str_value(&body, 8).unwrap_or("0").to_string();
        match built {
            Ok(data) => Ok(Some(Entity {
                handle: str_value(&body, 5).map(str::to_string),
                layer,
                line: marker.line,
                data,
            })),
            Err(reason) => {
                self.drawing.skipped.push(SkippedEntity {
                    entity_type: type_name.to_string(),
                    line: marker.line,
                    layer: Some(layer),
                    reason,
                });
                Ok(None)
            }
        }
    }

    /// Read the sub-entities that follow a `POLYLINE` or an `INSERT` with
    /// attributes, up to and including `SEQEND`.
    fn read_sequence(&mut self, item: &str) -> Result<Vec<Vec<GroupPair<'a>>>> {
        let mut items = Vec::new();
        while let Some(pair) = self.reader.next_pair()? {
            if pair.is_marker(item) {
                items.push(self.reader.read_body()?);
            } else if pair.is_marker("SEQEND") {
                self.reader.read_body()?;
                break;
            } else {
                // missing SEQEND
                self.reader.put_back(pair);
                break;
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Field access helpers
// ---------------------------------------------------------------------------

fn find<'b, 'a>(body: &'b [GroupPair<'a>], code: i32) -> Option<&'b GroupPair<'a>> {
    body.iter().find(|p| p.code == code)
}

fn str_value<'a>(body: &[GroupPair<'a>], code: i32) -> Option<&'a str> {
    find(body, code).map(|p| p.value)
}

fn i32_value(body: &[GroupPair<'_>], code: i32) -> Option<i32> {
    find(body, code).and_then(|p| p.as_i32())
}

fn f64_value(body: &[GroupPair<'_>], code: i32) -> Option<f64> {
    find(body, code).and_then(|p| p.as_f64())
}

/// Optional float: absent gives the default, present but unreadable is an error
fn opt_f64(body: &[GroupPair<'_>], code: i32, default: f64) -> std::result::Result<f64, String> {
    match find(body, code) {
        None => Ok(default),
        Some(p) => p
            .as_f64()
            .ok_or_else(|| format!("group {}: invalid number \"{}\"", code, p.value)),
    }
}

fn req_f64(body: &[GroupPair<'_>], code: i32, what: &str) -> std::result::Result<f64, String> {
    let p = find(body, code).ok_or_else(|| format!("missing {} (group {})", what, code))?;
    p.as_f64()
        .ok_or_else(|| format!("{} (group {}): invalid number \"{}\"", what, code, p.value))
}

/// Point from an x code and its matching y code (x + 10)
fn req_point(body: &[GroupPair<'_>], x_code: i32, what: &str) -> std::result::Result<Point2D, String> {
    Ok(Point2D::new(
        req_f64(body, x_code, what)?,
        req_f64(body, x_code + 10, what)?,
    ))
}

fn opt_point(body: &[GroupPair<'_>], x_code: i32) -> std::result::Result<Option<Point2D>, String> {
    match (find(body, x_code), find(body, x_code + 10)) {
        (Some(_), Some(_)) => Ok(Some(req_point(body, x_code, "point")?)),
        _ => Ok(None),
    }
}

/// Collect an ordered point list where each x code starts a new point
fn point_list(body: &[GroupPair<'_>], x_code: i32) -> std::result::Result<Vec<Point2D>, String> {
    let y_code = x_code + 10;
    let mut points: Vec<(f64, Option<f64>)> = Vec::new();
    for p in body {
        if p.code == x_code {
            let x = p
                .as_f64()
                .ok_or_else(|| format!("group {}: invalid number \"{}\"", x_code, p.value))?;
            points.push((x, None));
        } else if p.code == y_code {
            let y = p
                .as_f64()
                .ok_or_else(|| format!("group {}: invalid number \"{}\"", y_code, p.value))?;
            match points.last_mut() {
                Some(last) if last.1.is_none() => last.1 = Some(y),
                _ => return Err(format!("group {} without a preceding {}", y_code, x_code)),
            }
        }
    }
    points
        .into_iter()
        .map(|(x, y)| {
            y.map(|y| Point2D::new(x, y))
                .ok_or_else(|| format!("point without y coordinate (group {})", y_code))
        })
        .collect()
}

/// OCS extrusion pointing down (0,0,-1) mirrors X in world coordinates
fn is_mirrored(body: &[GroupPair<'_>]) -> bool {
    f64_value(body, 230).map(|z| z < 0.0).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Entity builders
// ---------------------------------------------------------------------------

fn layer_from_body(body: &[GroupPair<'_>]) -> Option<LayerDef> {
    let name = str_value(body, 2)?.to_string();
    let flags = i32_value(body, 70).unwrap_or(0);
    let color = i32_value(body, 62).unwrap_or(7);
    Some(LayerDef {
        name,
        frozen: flags & 1 != 0,
        off: color < 0,
    })
}

fn build_line(body: &[GroupPair<'_>]) -> BuildResult {
    Ok(EntityData::Line(Line {
        start: req_point(body, 10, "start point")?,
        end: req_point(body, 11, "end point")?,
    }))
}

fn build_lwpolyline(body: &[GroupPair<'_>]) -> BuildResult {
    let flags = i32_value(body, 70).unwrap_or(0);
    let mirrored = is_mirrored(body);
    let mut vertices: VertexList = SmallVec::new();
    let mut pending_y = false;

    for p in body {
        match p.code {
            10 => {
                if pending_y {
                    return Err("vertex without y coordinate".to_string());
                }
                let x = p
                    .as_f64()
                    .ok_or_else(|| format!("vertex x: invalid number \"{}\"", p.value))?;
                vertices.push(PolylineVertex::straight(x, 0.0));
                pending_y = true;
            }
            20 => {
                let y = p
                    .as_f64()
                    .ok_or_else(|| format!("vertex y: invalid number \"{}\"", p.value))?;
                match vertices.last_mut() {
                    Some(v) if pending_y => v.point.y = y,
                    _ => return Err("y coordinate before any vertex".to_string()),
                }
                pending_y = false;
            }
            42 => {
                let bulge = p
                    .as_f64()
                    .ok_or_else(|| format!("bulge: invalid number \"{}\"", p.value))?;
                match vertices.last_mut() {
                    Some(v) => v.bulge = bulge,
                    None => return Err("bulge before any vertex".to_string()),
                }
            }
            _ => {}
        }
    }

    if pending_y {
        return Err("vertex without y coordinate".to_string());
    }
    if vertices.len() < 2 {
        return Err(format!("polyline has {} vertices", vertices.len()));
    }
    if mirrored {
        for v in vertices.iter_mut() {
            v.point.x = -v.point.x;
            v.bulge = -v.bulge;
        }
    }

    Ok(EntityData::Polyline(Polyline {
        vertices,
        closed: flags & 1 != 0,
    }))
}

fn build_polyline(body: &[GroupPair<'_>], vertex_bodies: &[Vec<GroupPair<'_>>]) -> BuildResult {
    let flags = i32_value(body, 70).unwrap_or(0);
    if flags & (16 | 64) != 0 {
        return Err("polygon/polyface mesh polylines are 3D and not measured".to_string());
    }

    let mut vertices: VertexList = SmallVec::new();
    for vb in vertex_bodies {
        let vflags = i32_value(vb, 70).unwrap_or(0);
        // spline frame control points are not on the curve
        if vflags & 16 != 0 {
            continue;
        }
        vertices.push(PolylineVertex::new(
            req_point(vb, 10, "vertex")?,
            opt_f64(vb, 42, 0.0)?,
        ));
    }

    if vertices.len() < 2 {
        return Err(format!("polyline has {} vertices", vertices.len()));
    }

    Ok(EntityData::Polyline(Polyline {
        vertices,
        closed: flags & 1 != 0,
    }))
}

fn build_arc(body: &[GroupPair<'_>]) -> BuildResult {
    let mut center = req_point(body, 10, "center")?;
    let radius = req_f64(body, 40, "radius")?;
    if radius <= 0.0 {
        return Err(format!("non-positive radius {}", radius));
    }
    let mut start_angle = opt_f64(body, 50, 0.0)?;
    let mut end_angle = opt_f64(body, 51, 360.0)?;
    if is_mirrored(body) {
        center.x = -center.x;
        let (s, e) = (180.0 - end_angle, 180.0 - start_angle);
        start_angle = s;
        end_angle = e;
    }
    Ok(EntityData::Arc(Arc {
        center,
        radius,
        start_angle,
        end_angle,
    }))
}

fn build_circle(body: &[GroupPair<'_>]) -> BuildResult {
    let mut center = req_point(body, 10, "center")?;
    let radius = req_f64(body, 40, "radius")?;
    if radius <= 0.0 {
        return Err(format!("non-positive radius {}", radius));
    }
    if is_mirrored(body) {
        center.x = -center.x;
    }
    Ok(EntityData::Circle(Circle { center, radius }))
}

fn build_ellipse(body: &[GroupPair<'_>]) -> BuildResult {
    let ratio = req_f64(body, 40, "axis ratio")?;
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(format!("axis ratio {} outside (0, 1]", ratio));
    }
    Ok(EntityData::Ellipse(Ellipse {
        center: req_point(body, 10, "center")?,
        major_axis: req_point(body, 11, "major axis")?,
        ratio,
        start_param: opt_f64(body, 41, 0.0)?,
        end_param: opt_f64(body, 42, std::f64::consts::TAU)?,
    }))
}

fn build_spline(body: &[GroupPair<'_>]) -> BuildResult {
    let flags = i32_value(body, 70).unwrap_or(0);
    let control_points = point_list(body, 10)?;
    let fit_points = point_list(body, 11)?;
    if control_points.len() < 2 && fit_points.len() < 2 {
        return Err("spline without enough control or fit points".to_string());
    }
    Ok(EntityData::Spline(Spline {
        control_points,
        fit_points,
        closed: flags & 1 != 0,
    }))
}

fn build_solid(body: &[GroupPair<'_>]) -> BuildResult {
    let p1 = req_point(body, 10, "first corner")?;
    let p2 = req_point(body, 11, "second corner")?;
    let p3 = req_point(body, 12, "third corner")?;
    let p4 = opt_point(body, 13)?;

    // Corners are stored in zig-zag order: 1, 2, 4, 3 walks the outline
    let mut corners: SmallVec<[Point2D; 4]> = SmallVec::new();
    corners.push(p1);
    corners.push(p2);
    match p4 {
        Some(p4) if p4 != p3 => {
            corners.push(p4);
            corners.push(p3);
        }
        _ => corners.push(p3),
    }
    Ok(EntityData::Solid(Solid { corners }))
}

fn build_insert(body: &[GroupPair<'_>], attrib_bodies: &[Vec<GroupPair<'_>>]) -> BuildResult {
    let name = str_value(body, 2)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "insert without block name".to_string())?;

    let mut insert = Insert::new(name, opt_point(body, 10)?.unwrap_or(Point2D::ORIGIN));
    insert.scale_x = opt_f64(body, 41, 1.0)?;
    insert.scale_y = opt_f64(body, 42, 1.0)?;
    insert.rotation = opt_f64(body, 50, 0.0)?;
    if insert.scale_x == 0.0 || insert.scale_y == 0.0 {
        return Err("insert with zero scale".to_string());
    }

    insert.columns = array_count(body, 70)?;
    insert.rows = array_count(body, 71)?;
    insert.column_spacing = opt_f64(body, 44, 0.0)?;
    insert.row_spacing = opt_f64(body, 45, 0.0)?;

    for ab in attrib_bodies {
        // a broken attribute does not invalidate the placement
        if let Ok(EntityData::Attribute(def)) = build_attribute(ab) {
            insert.attributes.push(AttributeValue {
                tag: def.tag,
                text: def.default_text,
                position: def.position,
            });
        }
    }

    Ok(EntityData::Insert(insert))
}

/// Array counts are 16-bit integers; larger values mean a corrupt entity
fn array_count(body: &[GroupPair<'_>], code: i32) -> std::result::Result<u32, String> {
    match i32_value(body, code) {
        Some(n) if n > i32::from(i16::MAX) => Err(format!("array count {} out of range", n)),
        Some(n) => Ok(n.max(1) as u32),
        None => Ok(1),
    }
}

fn build_text(body: &[GroupPair<'_>]) -> BuildResult {
    Ok(EntityData::Text(Text {
        content: decode_special_codes(str_value(body, 1).unwrap_or_default()),
        position: opt_point(body, 10)?.unwrap_or(Point2D::ORIGIN),
        height: opt_f64(body, 40, 0.0)?,
    }))
}

fn build_mtext(body: &[GroupPair<'_>]) -> BuildResult {
    // Long content is split into 250-char chunks under code 3, the tail under code 1
    let mut raw = String::new();
    for p in body.iter().filter(|p| p.code == 3) {
        raw.push_str(p.value);
    }
    if let Some(tail) = str_value(body, 1) {
        raw.push_str(tail);
    }
    Ok(EntityData::Text(Text {
        content: strip_mtext_formatting(&raw),
        position: opt_point(body, 10)?.unwrap_or(Point2D::ORIGIN),
        height: opt_f64(body, 40, 0.0)?,
    }))
}

fn build_dimension(body: &[GroupPair<'_>]) -> BuildResult {
    let measurement = f64_value(body, 42);
    let formatted = measurement.map(format_measurement).unwrap_or_default();
    let text = match str_value(body, 1) {
        Some(o) if !o.is_empty() && o != " " => {
            strip_mtext_formatting(&o.replace("<>", &formatted))
        }
        _ => formatted,
    };
    let position = match opt_point(body, 11)? {
        Some(p) => p,
        None => opt_point(body, 10)?.unwrap_or(Point2D::ORIGIN),
    };
    Ok(EntityData::Dimension(Dimension {
        text,
        measurement,
        position,
    }))
}

fn format_measurement(value: f64) -> String {
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn build_leader(body: &[GroupPair<'_>]) -> BuildResult {
    let vertices = point_list(body, 10)?;
    if vertices.is_empty() {
        return Err("leader without vertices".to_string());
    }
    Ok(EntityData::Leader(Leader {
        vertices,
        text: None,
    }))
}

fn build_mleader(body: &[GroupPair<'_>]) -> BuildResult {
    // Multileader context data repeats 10/20 for several roles; the first is
    // the content base point, which is where the note sits.
    let anchor = opt_point(body, 10)?;
    let text = str_value(body, 304)
        .map(strip_mtext_formatting)
        .filter(|t| !t.is_empty());
    Ok(EntityData::Leader(Leader {
        vertices: anchor.into_iter().collect(),
        text,
    }))
}

fn build_attribute(body: &[GroupPair<'_>]) -> BuildResult {
    Ok(EntityData::Attribute(AttributeDef {
        tag: str_value(body, 2).unwrap_or_default().to_string(),
        default_text: decode_special_codes(str_value(body, 1).unwrap_or_default()),
        position: opt_point(body, 10)?.unwrap_or(Point2D::ORIGIN),
    }))
}

// ---------------------------------------------------------------------------
// HATCH boundary parsing
// ---------------------------------------------------------------------------

/// Sequential cursor over an entity body; hatch boundaries are positional
struct PairCursor<'b, 'a> {
    pairs: &'b [GroupPair<'a>],
    pos: usize,
}

impl<'b, 'a> PairCursor<'b, 'a> {
    fn new(pairs: &'b [GroupPair<'a>]) -> Self {
        Self { pairs, pos: 0 }
    }

    fn next(&mut self) -> Option<&'b GroupPair<'a>> {
        let p = self.pairs.get(self.pos);
        if p.is_some() {
            self.pos += 1;
        }
        p
    }

    fn peek_code(&self) -> Option<i32> {
        self.pairs.get(self.pos).map(|p| p.code)
    }

    fn peek_code_at(&self, offset: usize) -> Option<i32> {
        self.pairs.get(self.pos + offset).map(|p| p.code)
    }

    fn expect(&mut self, code: i32) -> std::result::Result<&'b GroupPair<'a>, String> {
        match self.next() {
            Some(p) if p.code == code => Ok(p),
            Some(p) => Err(format!(
                "hatch boundary: expected group {}, found {} at line {}",
                code, p.code, p.line
            )),
            None => Err(format!("hatch boundary: missing group {}", code)),
        }
    }

    fn expect_f64(&mut self, code: i32) -> std::result::Result<f64, String> {
        let p = self.expect(code)?;
        p.as_f64()
            .ok_or_else(|| format!("hatch boundary: invalid number \"{}\"", p.value))
    }

    fn expect_i32(&mut self, code: i32) -> std::result::Result<i32, String> {
        let p = self.expect(code)?;
        p.as_i32()
            .ok_or_else(|| format!("hatch boundary: invalid integer \"{}\"", p.value))
    }
}

fn build_hatch(body: &[GroupPair<'_>]) -> BuildResult {
    let mut cursor = PairCursor::new(body);
    let mut pattern = String::new();
    let mut solid_fill = false;
    let mut loops = Vec::new();

    while let Some(p) = cursor.next() {
        match p.code {
            2 => pattern = p.value.to_string(),
            70 => solid_fill = p.as_i32() == Some(1),
            91 if loops.is_empty() => {
                let count = p
                    .as_i32()
                    .ok_or_else(|| format!("invalid boundary count \"{}\"", p.value))?;
                for _ in 0..count.max(0) {
                    loops.push(parse_boundary_loop(&mut cursor)?);
                }
            }
            _ => {}
        }
    }

    if loops.is_empty() {
        return Err("hatch without boundary loops".to_string());
    }

    Ok(EntityData::Hatch(Hatch {
        pattern,
        solid_fill,
        loops,
    }))
}

fn parse_boundary_loop(cursor: &mut PairCursor<'_, '_>) -> std::result::Result<BoundaryLoop, String> {
    let flags = cursor.expect_i32(92)?;
    let external = flags & 1 != 0;

    let vertices = if flags & 2 != 0 {
        let has_bulge = cursor.expect_i32(72)? != 0;
        cursor.expect_i32(73)?;
        let count = cursor.expect_i32(93)?;
        let mut vertices: VertexList = SmallVec::new();
        for _ in 0..count.max(0) {
            let x = cursor.expect_f64(10)?;
            let y = cursor.expect_f64(20)?;
            let bulge = if has_bulge && cursor.peek_code() == Some(42) {
                cursor.expect_f64(42)?
            } else {
                0.0
            };
            vertices.push(PolylineVertex::new(Point2D::new(x, y), bulge));
        }
        vertices
    } else {
        let count = cursor.expect_i32(93)?;
        let mut vertices: VertexList = SmallVec::new();
        for _ in 0..count.max(0) {
            parse_boundary_edge(cursor, &mut vertices)?;
        }
        vertices
    };

    // Source boundary object references
    if cursor.peek_code() == Some(97) {
        let refs = cursor.expect_i32(97)?;
        for _ in 0..refs.max(0) {
            if cursor.peek_code() == Some(330) {
                cursor.next();
            }
        }
    }

    if vertices.len() < 3 {
        return Err(format!("hatch boundary loop has {} vertices", vertices.len()));
    }

    Ok(BoundaryLoop { vertices, external })
}

/// Append the points of one edge, excluding its end point (the next edge's start)
fn parse_boundary_edge(
    cursor: &mut PairCursor<'_, '_>,
    out: &mut VertexList,
) -> std::result::Result<(), String> {
    match cursor.expect_i32(72)? {
        1 => {
            let start = Point2D::new(cursor.expect_f64(10)?, cursor.expect_f64(20)?);
            cursor.expect_f64(11)?;
            cursor.expect_f64(21)?;
            out.push(PolylineVertex::new(start, 0.0));
        }
        2 => {
            let center = Point2D::new(cursor.expect_f64(10)?, cursor.expect_f64(20)?);
            let radius = cursor.expect_f64(40)?;
            let start = cursor.expect_f64(50)?.to_radians();
            let end = cursor.expect_f64(51)?.to_radians();
            let ccw = cursor.expect_i32(73)? != 0;
            let major = Point2D::new(radius, 0.0);
            sample_elliptic_edge(center, major, 1.0, start, end, ccw, out);
        }
        3 => {
            let center = Point2D::new(cursor.expect_f64(10)?, cursor.expect_f64(20)?);
            let major = Point2D::new(cursor.expect_f64(11)?, cursor.expect_f64(21)?);
            let ratio = cursor.expect_f64(40)?;
            let start = cursor.expect_f64(50)?.to_radians();
            let end = cursor.expect_f64(51)?.to_radians();
            let ccw = cursor.expect_i32(73)? != 0;
            sample_elliptic_edge(center, major, ratio, start, end, ccw, out);
        }
        4 => parse_spline_edge(cursor, out)?,
        other => return Err(format!("unknown hatch edge type {}", other)),
    }
    Ok(())
}

/// Sample an arc or elliptical arc edge in ~10° steps.
///
/// Clockwise edges store their angles mirrored about the x axis.
fn sample_elliptic_edge(
    center: Point2D,
    major: Point2D,
    ratio: f64,
    start: f64,
    end: f64,
    ccw: bool,
    out: &mut VertexList,
) {
    let mut sweep = (end - start).rem_euclid(std::f64::consts::TAU);
    if sweep == 0.0 {
        sweep = std::f64::consts::TAU;
    }
    let (start, sweep) = if ccw { (start, sweep) } else { (-start, -sweep) };

    let major_len = major.x.hypot(major.y);
    let axis_angle = major.y.atan2(major.x);
    let minor_len = major_len * ratio;
    let steps = ((sweep.abs() / 10f64.to_radians()).ceil() as usize).max(4);

    for i in 0..steps {
        let t = start + sweep * (i as f64) / (steps as f64);
        let (lx, ly) = (major_len * t.cos(), minor_len * t.sin());
        let (s, c) = axis_angle.sin_cos();
        out.push(PolylineVertex::straight(
            center.x + lx * c - ly * s,
            center.y + lx * s + ly * c,
        ));
    }
}

fn parse_spline_edge(
    cursor: &mut PairCursor<'_, '_>,
    out: &mut VertexList,
) -> std::result::Result<(), String> {
    cursor.expect_i32(94)?;
    let rational = cursor.expect_i32(73)? != 0;
    cursor.expect_i32(74)?;
    let knots = cursor.expect_i32(95)?;
    let controls = cursor.expect_i32(96)?;

    for _ in 0..knots.max(0) {
        cursor.expect_f64(40)?;
    }

    let mut control_points = Vec::with_capacity(controls.max(0) as usize);
    for _ in 0..controls.max(0) {
        let x = cursor.expect_f64(10)?;
        let y = cursor.expect_f64(20)?;
        if rational && cursor.peek_code() == Some(42) {
            cursor.next();
        }
        control_points.push(Point2D::new(x, y));
    }

    // Optional fit data; a zero fit count is followed by the loop's own 97
    let mut fit_points = Vec::new();
    if cursor.peek_code() == Some(97) {
        match cursor.peek_code_at(1) {
            Some(11) => {
                let fits = cursor.expect_i32(97)?;
                for _ in 0..fits.max(0) {
                    let x = cursor.expect_f64(11)?;
                    let y = cursor.expect_f64(21)?;
                    fit_points.push(Point2D::new(x, y));
                }
            }
            Some(97) => {
                cursor.next();
            }
            _ => {}
        }
    }
    while matches!(cursor.peek_code(), Some(12) | Some(22) | Some(13) | Some(23)) {
        cursor.next();
    }

    let points = if fit_points.len() >= 2 {
        fit_points
    } else {
        control_points
    };
    for p in points.iter().take(points.len().saturating_sub(1)) {
        out.push(PolylineVertex::new(*p, 0.0));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_entities(body: &str) -> String {
        format!("0\nSECTION\n2\nENTITIES\n{}0\nENDSEC\n0\nEOF\n", body)
    }

    #[test]
    fn test_header_units_and_extents() {
        let text = "0\nSECTION\n2\nHEADER\n9\n$ACADVER\n1\nAC1027\n9\n$INSUNITS\n70\n4\n\
                    9\n$EXTMIN\n10\n0.0\n20\n0.0\n30\n0.0\n9\n$EXTMAX\n10\n30000.0\n20\n40000.0\n30\n0.0\n\
                    0\nENDSEC\n0\nEOF\n";
        let drawing = parse_drawing(text).unwrap();
        assert_eq!(drawing.header.insunits, Some(4));
        assert_eq!(drawing.header.acad_version.as_deref(), Some("AC1027"));
        let bounds = drawing.header.declared_bounds().unwrap();
        assert_eq!(bounds.diagonal(), 50000.0);
    }

    #[test]
    fn test_line_and_lwpolyline() {
        let text = wrap_entities(
            "0\nLINE\n5\n1A\n8\nWALLS\n10\n0\n20\n0\n11\n10\n21\n0\n\
             0\nLWPOLYLINE\n8\nWALLS\n90\n3\n70\n1\n10\n0\n20\n0\n42\n1.0\n10\n10\n20\n0\n10\n10\n20\n10\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        assert_eq!(drawing.entities.len(), 2);
        assert_eq!(drawing.entities[0].handle.as_deref(), Some("1A"));
        assert_eq!(drawing.entities[0].layer, "WALLS");
        match &drawing.entities[1].data {
            EntityData::Polyline(p) => {
                assert!(p.closed);
                assert_eq!(p.vertices.len(), 3);
                assert_eq!(p.vertices[0].bulge, 1.0);
                assert_eq!(p.vertices[2].point, Point2D::new(10.0, 10.0));
            }
            other => panic!("expected polyline, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_entity_is_skipped() {
        let text = wrap_entities(
            "0\nLINE\n8\nWALLS\n10\nabc\n20\n0\n11\n10\n21\n0\n\
             0\nCIRCLE\n8\nPIPES\n10\n0\n20\n0\n40\n0.5\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        assert_eq!(drawing.entities.len(), 1);
        assert_eq!(drawing.skipped.len(), 1);
        assert_eq!(drawing.skipped[0].entity_type, "LINE");
        assert_eq!(drawing.skipped[0].layer.as_deref(), Some("WALLS"));
    }

    #[test]
    fn test_oversized_array_insert_is_skipped() {
        let text = wrap_entities(
            "0\nINSERT\n8\nDESKS\n2\nDESK\n10\n0\n20\n0\n70\n70000\n71\n70000\n\
             0\nINSERT\n8\nDESKS\n2\nDESK\n10\n0\n20\n0\n70\n3\n71\n-2\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        assert_eq!(drawing.skipped.len(), 1);
        assert_eq!(drawing.skipped[0].entity_type, "INSERT");
        assert!(drawing.skipped[0].reason.contains("70000"));
        match &drawing.entities[0].data {
            EntityData::Insert(ins) => assert_eq!(ins.instance_count(), 3),
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_types_counted() {
        let text = wrap_entities("0\n3DSOLID\n8\nX\n1\nACIS\n0\nVIEWPORT\n8\n0\n");
        let drawing = parse_drawing(&text).unwrap();
        assert!(drawing.entities.is_empty());
        assert!(drawing.skipped.is_empty());
        assert_eq!(drawing.ignored_types.get("3DSOLID"), Some(&1));
    }

    #[test]
    fn test_not_dxf_is_format_error() {
        assert!(matches!(
            parse_drawing("hello world\nthis is not a drawing\n"),
            Err(Error::Format { .. })
        ));
        assert!(matches!(parse_drawing("999\ncomment only\n"), Err(Error::Format { .. })));
    }

    #[test]
    fn test_blocks_and_insert_with_attributes() {
        let text = "0\nSECTION\n2\nBLOCKS\n\
                    0\nBLOCK\n8\n0\n2\nDOOR\n70\n0\n10\n0\n20\n0\n\
                    0\nLINE\n8\n0\n10\n0\n20\n0\n11\n900\n21\n0\n\
                    0\nENDBLK\n8\n0\n\
                    0\nENDSEC\n\
                    0\nSECTION\n2\nENTITIES\n\
                    0\nINSERT\n8\nDOORS\n66\n1\n2\nDOOR\n10\n100\n20\n200\n50\n90\n\
                    0\nATTRIB\n8\nDOORS\n2\nTAG\n1\nP-01\n10\n100\n20\n200\n\
                    0\nSEQEND\n8\nDOORS\n\
                    0\nENDSEC\n0\nEOF\n";
        let drawing = parse_drawing(text).unwrap();
        let block = drawing.block("DOOR").unwrap();
        assert_eq!(block.entities.len(), 1);

        assert_eq!(drawing.entities.len(), 1);
        match &drawing.entities[0].data {
            EntityData::Insert(ins) => {
                assert_eq!(ins.name, "DOOR");
                assert_eq!(ins.rotation, 90.0);
                assert_eq!(ins.attributes.len(), 1);
                assert_eq!(ins.attributes[0].text, "P-01");
            }
            other => panic!("expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_old_style_polyline() {
        let text = wrap_entities(
            "0\nPOLYLINE\n8\nSLAB\n66\n1\n70\n1\n\
             0\nVERTEX\n8\nSLAB\n10\n0\n20\n0\n\
             0\nVERTEX\n8\nSLAB\n10\n5\n20\n0\n\
             0\nVERTEX\n8\nSLAB\n10\n5\n20\n5\n\
             0\nSEQEND\n8\nSLAB\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        match &drawing.entities[0].data {
            EntityData::Polyline(p) => {
                assert!(p.closed);
                assert_eq!(p.vertices.len(), 3);
            }
            other => panic!("expected polyline, got {:?}", other),
        }
    }

    #[test]
    fn test_hatch_polyline_and_edge_loops() {
        let text = wrap_entities(
            "0\nHATCH\n8\nFLOOR\n10\n0\n20\n0\n30\n0\n2\nSOLID\n70\n1\n91\n2\n\
             92\n3\n72\n0\n73\n1\n93\n4\n10\n0\n20\n0\n10\n4\n20\n0\n10\n4\n20\n4\n10\n0\n20\n4\n97\n0\n\
             92\n0\n93\n3\n\
             72\n1\n10\n1\n20\n1\n11\n2\n21\n1\n\
             72\n1\n10\n2\n20\n1\n11\n2\n21\n2\n\
             72\n1\n10\n2\n20\n2\n11\n1\n21\n1\n\
             97\n0\n75\n1\n76\n1\n98\n1\n10\n0.5\n20\n0.5\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        assert!(drawing.skipped.is_empty(), "{:?}", drawing.skipped);
        match &drawing.entities[0].data {
            EntityData::Hatch(h) => {
                assert!(h.solid_fill);
                assert_eq!(h.loops.len(), 2);
                assert!(h.loops[0].external);
                assert_eq!(h.loops[0].vertices.len(), 4);
                assert_eq!(h.loops[1].vertices.len(), 3);
            }
            other => panic!("expected hatch, got {:?}", other),
        }
    }

    #[test]
    fn test_mtext_and_dimension_text() {
        let text = wrap_entities(
            "0\nMTEXT\n8\nTEXT\n10\n1\n20\n2\n40\n2.5\n1\n{\\fArial;BA\\U+00D1O}\\PNPT +0.20\n\
             0\nDIMENSION\n8\nDIM\n11\n5\n21\n5\n42\n3450.0\n1\n<> mm\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        match &drawing.entities[0].data {
            EntityData::Text(t) => assert_eq!(t.content, "BAÑO NPT +0.20"),
            other => panic!("expected text, got {:?}", other),
        }
        match &drawing.entities[1].data {
            EntityData::Dimension(d) => {
                assert_eq!(d.text, "3450 mm");
                assert_eq!(d.measurement, Some(3450.0));
            }
            other => panic!("expected dimension, got {:?}", other),
        }
    }

    #[test]
    fn test_solid_corner_order() {
        let text = wrap_entities(
            "0\nSOLID\n8\nFILL\n10\n0\n20\n0\n11\n1\n21\n0\n12\n0\n22\n1\n13\n1\n23\n1\n",
        );
        let drawing = parse_drawing(&text).unwrap();
        match &drawing.entities[0].data {
            EntityData::Solid(s) => {
                assert_eq!(
                    s.corners.as_slice(),
                    &[
                        Point2D::new(0.0, 0.0),
                        Point2D::new(1.0, 0.0),
                        Point2D::new(1.0, 1.0),
                        Point2D::new(0.0, 1.0)
                    ]
                );
            }
            other => panic!("expected solid, got {:?}", other),
        }
    }
}
