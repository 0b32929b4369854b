// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bill-of-quantities lines and their expected measurement kind
//!
//! The declared unit decides the kind when it is recognized. Otherwise a
//! keyword classifier looks at the description; when that is inconclusive
//! the kind stays unknown.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use takeoff_geometry::ItemKind;

/// One input row of the bill of quantities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqLine {
    pub row_index: usize,
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_qty: Option<f64>,
}

impl BoqLine {
    pub fn new(row_index: usize, description: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            row_index,
            description: description.into(),
            unit: unit.into(),
            declared_qty: None,
        }
    }

    pub fn with_declared_qty(mut self, qty: f64) -> Self {
        self.declared_qty = Some(qty);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    Length,
    Area,
    Count,
    /// Lump-sum or service line, no geometry needed
    Global,
    /// A unit with no 2D measure (volume, weight, time) or no clue at all
    Unknown,
}

impl MeasurementKind {
    /// The detected item kind that can satisfy this line
    pub fn item_kind(self) -> Option<ItemKind> {
        match self {
            MeasurementKind::Length => Some(ItemKind::Length),
            MeasurementKind::Area => Some(ItemKind::Area),
            MeasurementKind::Count => Some(ItemKind::Count),
            MeasurementKind::Global | MeasurementKind::Unknown => None,
        }
    }
}

impl std::fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MeasurementKind::Length => "length",
            MeasurementKind::Area => "area",
            MeasurementKind::Count => "count",
            MeasurementKind::Global => "global",
            MeasurementKind::Unknown => "unknown",
        })
    }
}

/// How the expected kind was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindSource {
    Unit,
    Description,
    Undetermined,
}

/// Deterministic unit → kind table. `None` for empty or unrecognized units.
pub fn kind_from_unit(unit: &str) -> Option<MeasurementKind> {
    let key: String = unit
        .trim()
        .to_lowercase()
        .replace('²', "2")
        .replace('³', "3")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.' && *c != '^')
        .collect();

    let kind = match key.as_str() {
        "m" | "ml" | "lm" | "mt" | "mts" | "mtl" | "metro" | "metros" | "metrolineal"
        | "metroslineales" | "lf" => MeasurementKind::Length,
        "m2" | "mt2" | "mts2" | "sqm" | "metrocuadrado" | "metroscuadrados" => {
            MeasurementKind::Area
        }
        "u" | "un" | "und" | "unid" | "unidad" | "unidades" | "pza" | "pz" | "pieza"
        | "piezas" | "ea" | "each" | "pc" | "pcs" | "nr" | "no" | "jgo" | "juego" | "pto"
        | "punto" | "set" => MeasurementKind::Count,
        "gl" | "glb" | "global" | "sg" | "ls" | "lumpsum" | "est" | "sum" => {
            MeasurementKind::Global
        }
        "m3" | "mt3" | "kg" | "t" | "ton" | "l" | "lt" | "h" | "hr" | "hh" | "dia" | "mes" => {
            MeasurementKind::Unknown
        }
        _ => return None,
    };
    Some(kind)
}

const LENGTH_TERMS: &[&str] = &[
    "zocalo", "contrazocalo", "rodapie", "tuberia", "tubo", "caneria", "cable", "cableado",
    "cornisa", "moldura", "baranda", "barandal", "pasamanos", "canaleta", "ducto", "junta",
    "skirting", "baseboard", "pipe", "piping", "duct", "conduit", "handrail", "railing",
    "gutter", "trim", "molding", "cerco", "fence",
];

const AREA_TERMS: &[&str] = &[
    "piso", "porcelanato", "ceramica", "ceramico", "pintura", "tarrajeo", "enlucido",
    "revoque", "contrapiso", "cielorraso", "cielo raso", "losa", "alfombra", "impermeabilizacion",
    "superficie", "floor", "flooring", "paint", "painting", "plaster", "tile", "tiling",
    "ceiling", "drywall", "slab", "cladding", "membrane", "waterproofing", "carpet",
];

const COUNT_TERMS: &[&str] = &[
    "puerta", "ventana", "luminaria", "lampara", "tomacorriente", "interruptor", "inodoro",
    "lavatorio", "lavamanos", "griferia", "sumidero", "valvula", "registro", "extintor",
    "door", "window", "luminaire", "fixture", "outlet", "socket", "switch", "toilet", "sink",
    "faucet", "valve", "extinguisher",
];

const GLOBAL_TERMS: &[&str] = &[
    "movilizacion", "desmovilizacion", "limpieza", "permisos", "transporte", "supervision",
    "instalacion de faena", "mobilization", "demobilization", "cleanup", "cleaning", "permits",
    "transport",
];

fn term_regex(terms: &[&str]) -> Option<Regex> {
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    // word boundaries; optional plural suffix
    Regex::new(&format!(r"\b(?:{})(?:s|es)?\b", alternation)).ok()
}

fn kind_patterns() -> &'static [(MeasurementKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(MeasurementKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (MeasurementKind::Length, LENGTH_TERMS),
            (MeasurementKind::Area, AREA_TERMS),
            (MeasurementKind::Count, COUNT_TERMS),
            (MeasurementKind::Global, GLOBAL_TERMS),
        ]
        .iter()
        .filter_map(|(kind, terms)| term_regex(terms).map(|re| (*kind, re)))
        .collect()
    })
}

/// Whether a normalized word is one of the classifier's kind terms
pub fn is_kind_term(word: &str) -> bool {
    kind_patterns()
        .iter()
        .any(|(_, pattern)| pattern.find(word).is_some_and(|m| m.len() == word.len()))
}

/// Keyword classifier over the description. Ties are inconclusive.
pub fn classify_description(description: &str) -> Option<MeasurementKind> {
    let text = normalize(description);
    let mut best: Option<(MeasurementKind, usize)> = None;
    let mut tied = false;
    for (kind, pattern) in kind_patterns() {
        let hits = pattern.find_iter(&text).count();
        if hits == 0 {
            continue;
        }
        match best {
            Some((_, n)) if hits == n => tied = true,
            Some((_, n)) if hits < n => {}
            _ => {
                best = Some((*kind, hits));
                tied = false;
            }
        }
    }
    if tied {
        None
    } else {
        best.map(|(kind, _)| kind)
    }
}

/// Expected measurement kind of a line and how it was decided
pub fn expected_kind(line: &BoqLine) -> (MeasurementKind, KindSource) {
    if let Some(kind) = kind_from_unit(&line.unit) {
        return (kind, KindSource::Unit);
    }
    match classify_description(&line.description) {
        Some(kind) => (kind, KindSource::Description),
        None => (MeasurementKind::Unknown, KindSource::Undetermined),
    }
}

/// Section headers and note rows carry no quantity
pub fn is_title_line(line: &BoqLine) -> bool {
    let description = line.description.trim();
    if description.is_empty() {
        return true;
    }
    if !line.unit.trim().is_empty() || line.declared_qty.is_some() {
        return false;
    }
    let has_letters = description.chars().any(char::is_alphabetic);
    let all_upper = has_letters && !description.chars().any(char::is_lowercase);
    let lower = normalize(description);
    let is_note = ["nota", "note", "obs", "observacion"]
        .iter()
        .any(|p| lower.starts_with(p));
    all_upper || is_note || description.ends_with(':') || !has_letters
}

/// Lowercase and strip Latin accents
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' | 'ã' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' | 'õ' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

const STOPWORDS: &[&str] = &[
    "de", "del", "la", "el", "los", "las", "en", "y", "con", "para", "por", "un", "una", "al",
    "tipo", "segun", "incluye", "inc", "of", "the", "and", "with", "for", "in", "on", "to",
    "type", "incl",
];

/// Normalized word tokens without stopwords or single characters
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}
