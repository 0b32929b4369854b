// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geometry-support decisions: can a layer answer a line of a given kind?

use crate::boq::MeasurementKind;
use serde::Serialize;
use takeoff_geometry::LayerSummary;

/// Accumulated area below this is not a real region, m²
pub const MIN_SUPPORTED_AREA: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "fallback", rename_all = "snake_case")]
pub enum Fallback {
    /// Wall-type area derived from run length
    LengthTimesHeight {
        length: f64,
        height: f64,
        derived_area: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportStatus {
    Supported,
    /// Not directly supported; a derivation exists but is only suggested
    Fallback(Fallback),
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportCheck {
    pub kind: MeasurementKind,
    pub status: SupportStatus,
    pub justification: String,
    /// The metric that was present but insufficient, SI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_metric: Option<f64>,
}

impl SupportCheck {
    pub fn is_supported(&self) -> bool {
        self.status == SupportStatus::Supported
    }

    fn new(kind: MeasurementKind, status: SupportStatus, justification: String) -> Self {
        Self {
            kind,
            status,
            justification,
            available_metric: None,
        }
    }

    fn with_metric(mut self, metric: f64) -> Self {
        self.available_metric = Some(metric);
        self
    }
}

/// Decide whether a layer's totals support a line of the given kind
pub fn check_support(
    kind: MeasurementKind,
    layer: &LayerSummary,
    wall_height: f64,
) -> SupportCheck {
    match kind {
        MeasurementKind::Area => {
            if layer.area > MIN_SUPPORTED_AREA {
                SupportCheck::new(
                    kind,
                    SupportStatus::Supported,
                    format!("{:.2} m2 of closed regions", layer.area),
                )
            } else if layer.length > 0.0 {
                let derived_area = layer.length * wall_height;
                SupportCheck::new(
                    kind,
                    SupportStatus::Fallback(Fallback::LengthTimesHeight {
                        length: layer.length,
                        height: wall_height,
                        derived_area,
                    }),
                    format!(
                        "no closed regions; {:.2} m of length × {:.2} m height would give {:.2} m2",
                        layer.length, wall_height, derived_area
                    ),
                )
                .with_metric(layer.length)
            } else if layer.count > 0 {
                SupportCheck::new(
                    kind,
                    SupportStatus::Unsupported,
                    format!(
                        "only {} symbol placements; deriving area by exploding symbols is not implemented",
                        layer.count
                    ),
                )
                .with_metric(layer.count as f64)
            } else {
                SupportCheck::new(kind, SupportStatus::Unsupported, "no area geometry".to_string())
            }
        }
        MeasurementKind::Length => {
            if layer.length > 0.0 {
                SupportCheck::new(
                    kind,
                    SupportStatus::Supported,
                    format!("{:.2} m of length", layer.length),
                )
            } else {
                insufficient(kind, layer, "no length geometry")
            }
        }
        MeasurementKind::Count => {
            if layer.count > 0 {
                SupportCheck::new(
                    kind,
                    SupportStatus::Supported,
                    format!("{} symbol placements", layer.count),
                )
            } else {
                insufficient(kind, layer, "no symbol placements")
            }
        }
        MeasurementKind::Global | MeasurementKind::Unknown => SupportCheck::new(
            kind,
            SupportStatus::Supported,
            "no geometry required".to_string(),
        ),
    }
}

/// Unsupported, reporting whatever other metric the layer does carry
fn insufficient(kind: MeasurementKind, layer: &LayerSummary, what: &str) -> SupportCheck {
    let check = SupportCheck::new(kind, SupportStatus::Unsupported, what.to_string());
    if layer.area > 0.0 {
        SupportCheck {
            justification: format!("{}; layer has {:.2} m2 of area", what, layer.area),
            ..check
        }
        .with_metric(layer.area)
    } else if layer.length > 0.0 {
        SupportCheck {
            justification: format!("{}; layer has {:.2} m of length", what, layer.length),
            ..check
        }
        .with_metric(layer.length)
    } else if layer.count > 0 {
        SupportCheck {
            justification: format!("{}; layer has {} placements", what, layer.count),
            ..check
        }
        .with_metric(layer.count as f64)
    } else {
        check
    }
}
