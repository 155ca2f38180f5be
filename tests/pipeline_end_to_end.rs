//! End-to-end pipeline runs over synthetic images.

mod common;

use std::sync::Arc;

use freshness_gate::classifier::{ClassifierOutput, FixedClassifier, ImageTensor};
use freshness_gate::core::config::{Config, GateVariant};
use freshness_gate::ledger::Ledger;
use freshness_gate::logger::{ActivitySink, MemorySink};
use freshness_gate::pipeline::{Inspector, RECORD_TYPE, Rejection, Verdict};
use freshness_gate::{FgError, Result};
use tempfile::TempDir;

fn inspector_with(
    dir: &TempDir,
    config: &Config,
    probabilities: Vec<f64>,
) -> (Inspector, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let shared: Arc<dyn ActivitySink> = sink.clone();
    let ledger = Ledger::open(&dir.path().join("ledger.jsonl"), Arc::clone(&shared)).unwrap();
    let inspector = Inspector::with_ledger(
        config,
        Arc::new(FixedClassifier::new(probabilities)),
        Arc::new(ledger),
        shared,
    );
    (inspector, sink)
}

#[test]
fn healthy_produce_is_recorded_with_classifier_label() {
    let dir = TempDir::new().unwrap();
    let (inspector, sink) =
        inspector_with(&dir, &Config::default(), vec![0.7, 0.1, 0.1, 0.05, 0.05]);
    let bytes = common::png_bytes(&common::healthy_produce(200));

    let verdict = inspector.classify(&bytes, "orange.png").unwrap();
    let recorded = verdict.recorded().expect("healthy produce should be recorded");
    assert_eq!(recorded.decision.label, "Fresh");
    assert!((recorded.decision.confidence - 70.0).abs() < 1e-9);
    assert!(!recorded.decision.overridden);
    assert!(!recorded.severity.flagged);
    assert_eq!(recorded.image_hash.len(), 64);

    let block = &recorded.block;
    assert_eq!(block.index, 1);
    assert_eq!(block.data["type"], RECORD_TYPE);
    assert_eq!(block.data["filename"], "orange.png");
    assert_eq!(block.data["image_hash"], recorded.image_hash.as_str());
    assert_eq!(block.data["freshness_level"], "Fresh");

    let names = sink.names();
    for expected in ["gate.accepted", "severity.scored", "ledger.appended"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}: {names:?}");
    }
    assert!(inspector.verify_audit());
}

#[test]
fn decayed_produce_overrides_a_confident_classifier() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.gate.variant = GateVariant::Contour;
    let (inspector, sink) = inspector_with(&dir, &config, vec![0.9, 0.04, 0.03, 0.02, 0.01]);
    let bytes = common::png_bytes(&common::decayed_produce(200));

    let severity = inspector.severity_only(&bytes).unwrap();
    assert!(severity.flagged, "{severity:?}");

    let verdict = inspector.classify(&bytes, "bruised.png").unwrap();
    let recorded = verdict.recorded().expect("decayed produce should be recorded");
    assert_eq!(recorded.decision.label, "Rotten");
    assert!(recorded.decision.overridden);
    assert_eq!(recorded.decision.top_k[0].label, "Rotten");
    assert!(sink.names().iter().any(|n| n == "decision.override"));
}

#[test]
fn flat_graphic_never_reaches_the_ledger() {
    let dir = TempDir::new().unwrap();
    let (inspector, _) = inspector_with(&dir, &Config::default(), vec![1.0, 0.0, 0.0, 0.0, 0.0]);
    let bytes = common::png_bytes(&common::flat_graphic(120));
    let verdict = inspector.classify(&bytes, "logo.png").unwrap();
    assert!(matches!(
        verdict,
        Verdict::Rejected(Rejection::NotSubject { .. })
    ));
    assert_eq!(inspector.ledger().len(), 1);
    assert!(inspector.audit_trail(10, None).is_empty());
}

#[test]
fn low_confidence_is_rejected_without_a_ledger_entry() {
    let dir = TempDir::new().unwrap();
    let (inspector, sink) =
        inspector_with(&dir, &Config::default(), vec![0.30, 0.25, 0.2, 0.15, 0.10]);
    let bytes = common::png_bytes(&common::healthy_produce(200));
    let verdict = inspector.classify(&bytes, "blurry.png").unwrap();
    match verdict.rejection() {
        Some(Rejection::LowConfidence { confidence, .. }) => {
            assert!((confidence - 30.0).abs() < 1e-9);
        }
        other => panic!("expected low confidence, got {other:?}"),
    }
    assert_eq!(inspector.ledger().len(), 1);
    assert!(sink.names().iter().any(|n| n == "decision.low_confidence"));
}

#[test]
fn classifier_failure_is_a_service_error_with_no_partial_write() {
    struct Broken;
    impl freshness_gate::classifier::Classifier for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn predict(&self, _: &ImageTensor) -> Result<ClassifierOutput> {
            Err(FgError::ClassifierUnavailable {
                details: "offline".to_string(),
            })
        }
    }

    let dir = TempDir::new().unwrap();
    let sink: Arc<dyn ActivitySink> = Arc::new(MemorySink::new());
    let ledger = Ledger::open(&dir.path().join("ledger.jsonl"), Arc::clone(&sink)).unwrap();
    let inspector =
        Inspector::with_ledger(&Config::default(), Arc::new(Broken), Arc::new(ledger), sink);
    let bytes = common::png_bytes(&common::healthy_produce(200));
    let err = inspector.classify(&bytes, "orange.png").unwrap_err();
    assert_eq!(err.code(), "FG-3001");
    assert_eq!(inspector.ledger().len(), 1);
}

#[test]
fn audit_trail_lists_recorded_decisions_newest_first() {
    let dir = TempDir::new().unwrap();
    let (inspector, _) =
        inspector_with(&dir, &Config::default(), vec![0.7, 0.1, 0.1, 0.05, 0.05]);
    let bytes = common::png_bytes(&common::healthy_produce(160));
    for name in ["a.png", "b.png", "c.png"] {
        assert!(inspector.classify(&bytes, name).unwrap().recorded().is_some());
    }
    let trail = inspector.audit_trail(2, None);
    let names: Vec<_> = trail
        .iter()
        .map(|b| b.data["filename"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c.png", "b.png"]);
}

#[test]
fn batch_classification_keeps_the_chain_linear() {
    let dir = TempDir::new().unwrap();
    let (inspector, _) =
        inspector_with(&dir, &Config::default(), vec![0.7, 0.1, 0.1, 0.05, 0.05]);
    let healthy = common::png_bytes(&common::healthy_produce(160));
    let flat = common::png_bytes(&common::flat_graphic(64));
    let items: Vec<(String, Vec<u8>)> = (0..8)
        .map(|i| {
            let bytes = if i % 4 == 3 { flat.clone() } else { healthy.clone() };
            (format!("img-{i}.png"), bytes)
        })
        .collect();

    let results = inspector.classify_batch(items, 4);
    assert_eq!(results.len(), 8);
    let recorded = results
        .iter()
        .filter(|(_, r)| r.as_ref().is_ok_and(|v| v.recorded().is_some()))
        .count();
    assert_eq!(recorded, 6);
    assert_eq!(inspector.ledger().len(), 7);
    assert!(inspector.verify_audit());
}

#[test]
fn inspector_from_config_opens_the_configured_ledger() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger.path = dir.path().join("nested").join("ledger.jsonl");
    let inspector = Inspector::from_config(
        &config,
        Arc::new(FixedClassifier::new(vec![0.7, 0.1, 0.1, 0.05, 0.05])),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    assert_eq!(inspector.ledger().len(), 1);
    assert!(config.ledger.path.exists());
}
