// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Drawing + BOQ → staging rows through the public pipeline.

use approx::assert_relative_eq;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use takeoff_processing::{
    BoqLine, ItemKind, Overrides, RankedCandidate, RefineError, RefineRequest, ReviewStatus,
    RowOverride, SemanticRefiner, Suggestion, TakeoffConfig, TakeoffPipeline,
};

fn line(layer: &str, x1: f64, y1: f64, x2: f64, y2: f64) -> String {
    format!(
        "0\nLINE\n8\n{}\n10\n{}\n20\n{}\n11\n{}\n21\n{}\n",
        layer, x1, y1, x2, y2
    )
}

/// 10 m × 10 m room in millimeters with two doors. `closed_region` adds the
/// room outline as a closed polyline.
fn drawing(closed_region: bool) -> Vec<u8> {
    let mut text = String::from("0\nSECTION\n2\nHEADER\n9\n$INSUNITS\n70\n4\n0\nENDSEC\n");

    text.push_str("0\nSECTION\n2\nBLOCKS\n");
    text.push_str("0\nBLOCK\n8\n0\n2\nPUERTA\n70\n0\n10\n0\n20\n0\n");
    text.push_str(&line("0", 0.0, 0.0, 900.0, 0.0));
    text.push_str("0\nENDBLK\n8\n0\n0\nENDSEC\n");

    text.push_str("0\nSECTION\n2\nENTITIES\n");
    text.push_str(&line("WALLS", 0.0, 0.0, 10_000.0, 0.0));
    text.push_str(&line("WALLS", 10_000.0, 0.0, 10_000.0, 10_000.0));
    text.push_str(&line("WALLS", 10_000.0, 10_000.0, 0.0, 10_000.0));
    text.push_str(&line("WALLS", 0.0, 10_000.0, 0.0, 0.0));
    if closed_region {
        text.push_str(
            "0\nLWPOLYLINE\n8\nWALLS\n90\n4\n70\n1\n\
             10\n0\n20\n0\n10\n10000\n20\n0\n10\n10000\n20\n10000\n10\n0\n20\n10000\n",
        );
    }
    text.push_str("0\nINSERT\n8\nDOORS\n2\nPUERTA\n10\n2000\n20\n0\n");
    text.push_str("0\nINSERT\n8\nDOORS\n2\nPUERTA\n10\n6000\n20\n0\n");
    text.push_str("0\nENDSEC\n0\nEOF\n");
    text.into_bytes()
}

fn boq() -> Vec<BoqLine> {
    vec![
        BoqLine::new(1, "OBRAS CIVILES", ""),
        BoqLine::new(2, "Muro perimetral", "m2"),
        BoqLine::new(3, "Puertas contraplacadas", "und"),
        BoqLine::new(4, "Movilización y desmovilización", "glb"),
        BoqLine::new(5, "Concreto f'c 210", "m3"),
        BoqLine::new(6, "Zócalo de cerámica", "ml"),
        BoqLine::new(7, "Revestimiento", "m2"),
    ]
}

fn overrides() -> Overrides {
    let mut overrides = Overrides::default();
    overrides.insert(6, RowOverride::Ignore);
    overrides
}

#[test]
fn test_closed_region_is_approved() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let report = pipeline.run(&drawing(true), &boq(), &overrides()).unwrap();

    assert_eq!(report.rows.len(), 7);
    let row = report.row(2).unwrap();
    assert_eq!(row.status, ReviewStatus::Approved);
    assert_eq!(row.chosen_layer.as_deref(), Some("WALLS"));
    assert_relative_eq!(row.qty_final.unwrap(), 100.0, epsilon = 1e-6);
    assert_relative_eq!(row.confidence, (0.5 * 0.85 + 0.3) / 0.8, epsilon = 1e-9);

    let doors = report.row(3).unwrap();
    assert_eq!(doors.status, ReviewStatus::Approved);
    assert_eq!(doors.qty_final, Some(2.0));
}

#[test]
fn test_open_lines_suggest_length_times_height() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let report = pipeline.run(&drawing(false), &boq(), &overrides()).unwrap();

    let row = report.row(2).unwrap();
    assert_eq!(row.status, ReviewStatus::PendingNoGeometry);
    assert_eq!(row.qty_final, None);
    match &row.suggestions[0] {
        Suggestion::DeriveAreaFromLength {
            layer,
            length,
            height,
            area,
        } => {
            assert_eq!(layer, "WALLS");
            assert_relative_eq!(*length, 40.0, epsilon = 1e-6);
            assert_eq!(*height, 2.5);
            assert_relative_eq!(*area, 100.0, epsilon = 1e-6);
        }
        other => panic!("expected a derived-area suggestion, got {:?}", other),
    }
    assert!(row.suggestions.contains(&Suggestion::ManualEntry));
    assert!(row.candidates.iter().all(|c| c.rejected));
}

#[test]
fn test_every_line_gets_exactly_one_row() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let lines = boq();
    let report = pipeline.run(&drawing(true), &lines, &overrides()).unwrap();

    let indices: Vec<usize> = report.rows.iter().map(|r| r.line_ref.row_index).collect();
    let expected: Vec<usize> = lines.iter().map(|l| l.row_index).collect();
    assert_eq!(indices, expected);

    assert_eq!(report.row(1).unwrap().status, ReviewStatus::Title);
    assert_eq!(report.row(4).unwrap().status, ReviewStatus::PendingSemantics);
    assert_eq!(report.row(5).unwrap().status, ReviewStatus::PendingSemantics);
    assert_eq!(report.row(6).unwrap().status, ReviewStatus::Ignored);
    for index in [1, 4, 5, 6] {
        assert_eq!(report.row(index).unwrap().qty_final, None);
    }

    let counted: usize = report.stats.rows_by_status.values().sum();
    assert_eq!(counted, lines.len());
}

#[test]
fn test_source_items_match_expected_kind() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let report = pipeline.run(&drawing(true), &boq(), &overrides()).unwrap();

    for row in &report.rows {
        let Some(kind) = row.expected_kind.item_kind() else {
            assert!(row.source_items.is_empty());
            continue;
        };
        assert!(row.source_items.iter().all(|i| i.kind() == kind));
        if let Some(qty) = row.qty_final {
            let sum: f64 = row.source_items.iter().map(|i| i.si_value()).sum();
            assert_relative_eq!(qty, sum, epsilon = 1e-9);
        }
    }
    assert!(report.items.iter().any(|i| i.kind() == ItemKind::Count));
}

#[test]
fn test_report_serializes_null_quantities() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let report = pipeline.run(&drawing(false), &boq(), &overrides()).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["rows"][0]["status"], "title");
    assert!(json["rows"][0]["qty_final"].is_null());
    assert_eq!(json["rows"][1]["status"], "pending_no_geometry");
    assert_eq!(json["rows"][1]["suggestions"][0]["action"], "derive_area_from_length");
    assert_eq!(json["stats"]["unit"]["unit"], "millimeter");
}

#[test]
fn test_undecodable_drawing_is_an_error() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let err = pipeline.run(b"", &boq(), &Overrides::default()).unwrap_err();
    assert!(err.is_drawing_error());
}

/// Log sink shared with a test subscriber
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_corrupt_array_insert_does_not_abort_the_run() {
    let text = String::from_utf8(drawing(true)).unwrap().replace(
        "0\nINSERT\n8\nDOORS\n2\nPUERTA\n10\n6000\n20\n0\n",
        "0\nINSERT\n8\nDOORS\n2\nPUERTA\n10\n6000\n20\n0\n70\n70000\n71\n70000\n",
    );
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer({
            let logs = logs.clone();
            move || logs.clone()
        })
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let report = tracing::subscriber::with_default(subscriber, || {
        pipeline.run(text.as_bytes(), &boq(), &overrides())
    })
    .unwrap();

    assert!(report.skipped.iter().any(|s| s.entity_type == "INSERT"));
    let logged = logs.contents();
    assert!(logged.contains("WARN"));
    assert!(logged.contains("entity skipped"));
    assert!(logged.contains("array count 70000 out of range"));
    assert_eq!(report.row(3).unwrap().qty_final, Some(1.0));
    assert_relative_eq!(report.row(2).unwrap().qty_final.unwrap(), 100.0, epsilon = 1e-6);
}

struct Offline;

#[async_trait]
impl SemanticRefiner for Offline {
    async fn refine(&self, _request: RefineRequest) -> Result<Vec<RankedCandidate>, RefineError> {
        Err(RefineError::Unavailable("offline".into()))
    }
}

struct Prefers(&'static str);

#[async_trait]
impl SemanticRefiner for Prefers {
    async fn refine(&self, request: RefineRequest) -> Result<Vec<RankedCandidate>, RefineError> {
        assert!(!request.candidates.is_empty());
        Ok(vec![RankedCandidate {
            layer: self.0.to_string(),
            score: 0.9,
        }])
    }
}

#[tokio::test]
async fn test_refiner_failure_keeps_deterministic_result() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let cancel = AtomicBool::new(false);
    let report = pipeline
        .run_with_refiner(&drawing(true), &boq(), &overrides(), &Offline, &cancel)
        .await
        .unwrap();

    let refine = report.stats.refine.unwrap();
    assert_eq!(refine.attempted, 1);
    assert_eq!(refine.failed, 1);

    let row = report.row(7).unwrap();
    assert_eq!(row.status, ReviewStatus::Pending);
    assert_eq!(row.qty_final, None);
    assert!(!row.refined);
    assert!(row.warnings.iter().any(|w| w.contains("unavailable")));
    assert_eq!(report.row(2).unwrap().status, ReviewStatus::Approved);
}

#[tokio::test]
async fn test_refiner_ranking_is_applied() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let cancel = AtomicBool::new(false);
    let report = pipeline
        .run_with_refiner(&drawing(true), &boq(), &overrides(), &Prefers("WALLS"), &cancel)
        .await
        .unwrap();

    let row = report.row(7).unwrap();
    assert!(row.refined);
    assert_eq!(row.status, ReviewStatus::Approved);
    assert_eq!(row.chosen_layer.as_deref(), Some("WALLS"));
    assert_relative_eq!(row.qty_final.unwrap(), 100.0, epsilon = 1e-6);
    assert_eq!(report.stats.refine.unwrap().refined, 1);
}

#[tokio::test]
async fn test_cancelled_refinement_sends_nothing() {
    let pipeline = TakeoffPipeline::new(TakeoffConfig::default());
    let cancel = AtomicBool::new(true);
    let report = pipeline
        .run_with_refiner(&drawing(true), &boq(), &overrides(), &Prefers("WALLS"), &cancel)
        .await
        .unwrap();

    let refine = report.stats.refine.unwrap();
    assert_eq!(refine.attempted, 0);
    assert_eq!(refine.cancelled, 1);
    assert!(!report.row(7).unwrap().refined);
}

/// Tracks requests in flight and fails one row
struct Flaky {
    fail_row: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl SemanticRefiner for Flaky {
    async fn refine(&self, request: RefineRequest) -> Result<Vec<RankedCandidate>, RefineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.row_index == self.fail_row {
            return Err(RefineError::Unavailable("rate limited".into()));
        }
        Ok(vec![RankedCandidate {
            layer: request.candidates[0].layer.clone(),
            score: 0.95,
        }])
    }
}

#[tokio::test]
async fn test_refinement_is_bounded_and_isolates_failures() {
    let mut config = TakeoffConfig::default();
    config.refine_confidence_below = 1.0;
    config.refine_concurrency = 2;
    let pipeline = TakeoffPipeline::new(config);
    let refiner = Flaky {
        fail_row: 3,
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    };
    let cancel = AtomicBool::new(false);
    let report = pipeline
        .run_with_refiner(&drawing(true), &boq(), &overrides(), &refiner, &cancel)
        .await
        .unwrap();

    let refine = report.stats.refine.unwrap();
    assert_eq!(refine.attempted, 3);
    assert_eq!(refine.failed, 1);
    assert_eq!(refine.refined, 2);
    assert_eq!(refiner.peak.load(Ordering::SeqCst), 2);

    // rows 2 and 3 share the first batch
    assert!(report.row(2).unwrap().refined);
    assert!(report.row(7).unwrap().refined);
    let failed = report.row(3).unwrap();
    assert!(!failed.refined);
    assert_eq!(failed.qty_final, Some(2.0));
    assert!(failed.warnings.iter().any(|w| w.contains("rate limited")));
}
