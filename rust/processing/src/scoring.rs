// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Candidate scoring
//!
//! ```text
//! score = (0.5·lexical + 0.3·kind_support [+ 0.2·proximity]) / applicable weight
//!         − 0.3 · profile confidence        (layers profiled as annotation only)
//! ```
//!
//! Proximity only takes part when the line names a label found in the drawing.
//! Lexical similarity is `0.7 · best token match + 0.3 · description coverage`.

use crate::boq::tokenize;
use regex::Regex;
use std::sync::OnceLock;
use takeoff_geometry::LayerProfile;

pub const WEIGHT_LEXICAL: f64 = 0.5;
pub const WEIGHT_KIND_SUPPORT: f64 = 0.3;
pub const WEIGHT_PROXIMITY: f64 = 0.2;
pub const ANNOTATION_PENALTY: f64 = 0.3;

pub const LEXICAL_BEST_SHARE: f64 = 0.7;
pub const LEXICAL_COVERAGE_SHARE: f64 = 0.3;

/// Jaro-Winkler similarity below this is no match
pub const FUZZY_MATCH_FLOOR: f64 = 0.88;
const PREFIX_MATCH_SCORE: f64 = 0.9;
const MIN_PREFIX_LEN: usize = 4;

/// Bilingual synonym groups, singular normalized forms
const SYNONYMS: &[&[&str]] = &[
    &["muro", "pared", "tabique", "wall", "mur"],
    &["puerta", "door", "pta"],
    &["ventana", "window"],
    &["piso", "suelo", "floor", "pavimento", "solado"],
    &["cielo", "cielorraso", "techo", "ceiling", "clg"],
    &["losa", "slab"],
    &["columna", "pilar", "column", "col"],
    &["viga", "beam"],
    &["tuberia", "tubo", "caneria", "pipe", "piping"],
    &["ducto", "duct"],
    &["luminaria", "lampara", "light", "lighting", "luminaire", "lum"],
    &["zocalo", "rodapie", "skirting", "baseboard"],
    &["escalera", "stair"],
    &["baranda", "barandal", "pasamano", "railing", "handrail"],
    &["pintura", "paint"],
    &["ceramica", "ceramico", "tile", "porcelanato"],
    &["inodoro", "toilet", "wc"],
    &["lavatorio", "lavamano", "lavabo", "sink"],
    &["tomacorriente", "enchufe", "outlet", "socket"],
    &["interruptor", "switch"],
    &["mueble", "mobiliario", "furniture"],
    &["vidrio", "glass", "glazing"],
    &["cubierta", "techumbre", "roof"],
];

/// Inputs of one candidate score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub lexical: f64,
    pub kind_support: f64,
    /// `None` when the line carries no resolvable label
    pub proximity: Option<f64>,
    /// Profile confidence when the layer is likely annotation
    pub annotation_confidence: Option<f64>,
}

/// Weighted candidate score, clamped to [0, 1]
pub fn candidate_score(inputs: &ScoreInputs) -> f64 {
    let mut weighted = WEIGHT_LEXICAL * inputs.lexical + WEIGHT_KIND_SUPPORT * inputs.kind_support;
    let mut total = WEIGHT_LEXICAL + WEIGHT_KIND_SUPPORT;
    if let Some(proximity) = inputs.proximity {
        weighted += WEIGHT_PROXIMITY * proximity;
        total += WEIGHT_PROXIMITY;
    }
    let mut score = weighted / total;
    if let Some(confidence) = inputs.annotation_confidence {
        score -= ANNOTATION_PENALTY * confidence;
    }
    score.clamp(0.0, 1.0)
}

/// Penalty input for a layer profile
pub fn annotation_confidence(profile: Option<&LayerProfile>) -> Option<f64> {
    profile
        .filter(|p| p.likely_annotation)
        .map(|p| p.confidence)
}

/// Crude Spanish/English singular
pub fn singularize(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let n = chars.len();
    if n > 4 && token.ends_with("es") && !is_vowel(chars[n - 3]) {
        return chars[..n - 2].iter().collect();
    }
    if n > 3 && token.ends_with('s') && !token.ends_with("ss") {
        return chars[..n - 1].iter().collect();
    }
    token.to_string()
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

fn synonyms(a: &str, b: &str) -> bool {
    SYNONYMS
        .iter()
        .any(|group| group.contains(&a) && group.contains(&b))
}

/// Whether a normalized token belongs to a synonym group
pub fn is_synonym_term(token: &str) -> bool {
    let token = singularize(token);
    SYNONYMS.iter().any(|group| group.contains(&token.as_str()))
}

/// Similarity of two normalized tokens in [0, 1]
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (singularize(a), singularize(b));
    if a == b || synonyms(&a, &b) {
        return 1.0;
    }
    let shorter = a.chars().count().min(b.chars().count());
    if shorter >= MIN_PREFIX_LEN && (a.starts_with(b.as_str()) || b.starts_with(a.as_str())) {
        return PREFIX_MATCH_SCORE;
    }
    let jw = strsim::jaro_winkler(&a, &b);
    if jw >= FUZZY_MATCH_FLOOR {
        jw
    } else {
        0.0
    }
}

/// Lexical similarity of a description against a candidate's identifiers
/// (layer name, symbol names, alias terms)
pub fn lexical_score(description: &str, identifiers: &[String]) -> f64 {
    let desc_tokens = tokenize(description);
    let id_tokens: Vec<String> = identifiers.iter().flat_map(|s| tokenize(s)).collect();
    if desc_tokens.is_empty() || id_tokens.is_empty() {
        return 0.0;
    }

    let per_token: Vec<f64> = desc_tokens
        .iter()
        .map(|d| {
            id_tokens
                .iter()
                .map(|i| token_similarity(d, i))
                .fold(0.0, f64::max)
        })
        .collect();

    let best = per_token.iter().copied().fold(0.0, f64::max);
    let coverage = per_token.iter().filter(|&&s| s > 0.0).count() as f64 / per_token.len() as f64;
    LEXICAL_BEST_SHARE * best + LEXICAL_COVERAGE_SHARE * coverage
}

fn generic_symbol_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)^(?:\*[a-z]\d+|a\$c[0-9a-f]+|\d+|(?:block|bloque|blk|symbol|simbolo|sym)[-_ ]?\d*|.{1,2})$",
            )
            .ok()
        })
        .as_ref()
}

/// Symbol names that say nothing about what they depict
/// (`*U12`, `A$C1F2`, `BLOCK3`, `17`, two-character names)
pub fn is_generic_symbol_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || name.starts_with('*') {
        return true;
    }
    generic_symbol_pattern()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_weights_without_proximity() {
        let score = candidate_score(&ScoreInputs {
            lexical: 0.85,
            kind_support: 1.0,
            proximity: None,
            annotation_confidence: None,
        });
        assert_relative_eq!(score, (0.5 * 0.85 + 0.3) / 0.8);
    }

    #[test]
    fn test_proximity_and_penalty() {
        let base = ScoreInputs {
            lexical: 1.0,
            kind_support: 1.0,
            proximity: Some(0.0),
            annotation_confidence: None,
        };
        assert_relative_eq!(candidate_score(&base), 0.8);
        let penalized = ScoreInputs {
            annotation_confidence: Some(1.0),
            ..base
        };
        assert_relative_eq!(candidate_score(&penalized), 0.5);
    }

    #[test]
    fn test_bilingual_lexical_match() {
        let score = lexical_score("Muro perimetral", &["WALLS".to_string()]);
        assert_relative_eq!(score, 0.7 + 0.3 * 0.5);

        assert_eq!(lexical_score("Muro perimetral", &["E-LIGHTING".to_string()]), 0.0);
        assert_eq!(token_similarity("paredes", "muro"), 1.0);
        assert_eq!(token_similarity("puertas", "door"), 1.0);
        assert_eq!(token_similarity("ventanal", "ventana"), 0.9);
    }

    #[test]
    fn test_generic_symbol_names() {
        assert!(is_generic_symbol_name("*U12"));
        assert!(is_generic_symbol_name("A$C1F2B"));
        assert!(is_generic_symbol_name("BLOCK3"));
        assert!(is_generic_symbol_name("17"));
        assert!(is_generic_symbol_name("P1"));
        assert!(!is_generic_symbol_name("PUERTA_90"));
        assert!(!is_generic_symbol_name("WC-SUSPENDED"));
    }
}
