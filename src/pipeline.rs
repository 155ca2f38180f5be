//! Upstream caller contract: `classify`, `audit_trail`, `verify_audit`.
//!
//! One pipeline run per image: decode, extract, gate, severity, classifier,
//! combine, append. Runs share nothing mutable except the ledger.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;
use serde::Serialize;
use serde_json::{Value, json};

use crate::assess::{
    Combined, Decision, DecisionCombiner, GateDecision, SeverityAssessment, SeverityScorer,
    SubjectGate, gate_for,
};
use crate::classifier::{Classifier, ImageTensor};
use crate::core::config::Config;
use crate::core::errors::{FgError, Result};
use crate::ledger::{Ledger, LedgerBlock, now_timestamp, sha256_hex};
use crate::logger::{ActivityEvent, ActivitySink};
use crate::vision::{FeatureExtractor, FeatureVector, Region, decode};

/// Payload `type` of recorded decisions.
pub const RECORD_TYPE: &str = "freshness_check";

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why an image produced no ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// The subject gate refused the image.
    NotSubject {
        reason: String,
        score: u32,
        hard_reject: Option<&'static str>,
    },
    /// Final confidence fell under the floor.
    LowConfidence {
        label: String,
        confidence: f64,
        floor: f64,
    },
}

impl Rejection {
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NotSubject { reason, .. } => format!("not a produce image: {reason}"),
            Self::LowConfidence { confidence, floor, .. } => format!(
                "image quality too poor: confidence {confidence:.1}% is below {floor:.1}%"
            ),
        }
    }
}

/// An accepted, recorded decision and the evidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedDecision {
    pub source: String,
    pub image_hash: String,
    pub decision: Decision,
    pub gate: GateDecision,
    pub severity: SeverityAssessment,
    pub block: LedgerBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Recorded(Box<RecordedDecision>),
    Rejected(Rejection),
}

impl Verdict {
    #[must_use]
    pub fn recorded(&self) -> Option<&RecordedDecision> {
        match self {
            Self::Recorded(recorded) => Some(recorded),
            Self::Rejected(_) => None,
        }
    }

    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Recorded(_) => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }
}

/// Gate-only result for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateReport {
    pub gate: &'static str,
    pub features: FeatureVector,
    pub decision: GateDecision,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// The heuristic stages alone: extraction, subject gate, severity. Holds no
/// ledger and no classifier, so diagnostics never touch audit state.
pub struct Analyzer {
    extractor: FeatureExtractor,
    gate: Box<dyn SubjectGate>,
    scorer: SeverityScorer,
}

impl Analyzer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            extractor: FeatureExtractor::subject(),
            gate: gate_for(config.gate.variant),
            scorer: SeverityScorer::new(config.severity.clone()),
        }
    }

    /// Validate `config` first; use this for user-supplied settings.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Run the subject gate alone.
    pub fn gate_only(&self, bytes: &[u8]) -> Result<GateReport> {
        let image = decode(bytes)?;
        let features = self.extractor.extract(&image, Region::Full)?;
        let decision = self.gate.evaluate(&features);
        Ok(GateReport {
            gate: self.gate.name(),
            features,
            decision,
        })
    }

    /// Run the severity scorer alone.
    pub fn severity_only(&self, bytes: &[u8]) -> Result<SeverityAssessment> {
        self.scorer.assess_image(&decode(bytes)?)
    }
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

pub struct Inspector {
    analyzer: Analyzer,
    combiner: DecisionCombiner,
    classifier: Arc<dyn Classifier>,
    input_size: u32,
    ledger: Arc<Ledger>,
    sink: Arc<dyn ActivitySink>,
}

impl Inspector {
    /// Wire every stage from `config`, opening the configured ledger.
    pub fn from_config(
        config: &Config,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn ActivitySink>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = Ledger::open_or_import(
            &config.ledger.path,
            config.ledger.legacy_import.as_deref(),
            Arc::clone(&sink),
        )?;
        Ok(Self::with_ledger(config, classifier, Arc::new(ledger), sink))
    }

    /// Wire every stage around an already-open ledger.
    #[must_use]
    pub fn with_ledger(
        config: &Config,
        classifier: Arc<dyn Classifier>,
        ledger: Arc<Ledger>,
        sink: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            analyzer: Analyzer::new(config),
            combiner: DecisionCombiner::new(&config.decision),
            classifier,
            input_size: config.classifier.input_size,
            ledger,
            sink,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    #[must_use]
    pub const fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn gate_only(&self, bytes: &[u8]) -> Result<GateReport> {
        self.analyzer.gate_only(bytes)
    }

    pub fn severity_only(&self, bytes: &[u8]) -> Result<SeverityAssessment> {
        self.analyzer.severity_only(bytes)
    }

    /// Full pipeline for one encoded image. Undecodable input and classifier
    /// failures are errors; gate and floor rejections are verdicts.
    pub fn classify(&self, bytes: &[u8], source: &str) -> Result<Verdict> {
        let image_hash = sha256_hex(bytes);
        let image = decode(bytes)?;

        let Analyzer {
            extractor,
            gate: subject_gate,
            scorer,
        } = &self.analyzer;
        let features = extractor.extract(&image, Region::Full)?;
        let gate = subject_gate.evaluate(&features);
        if !gate.accepted {
            self.sink.record(
                ActivityEvent::info("gate.rejected")
                    .with("source", source)
                    .with("gate", subject_gate.name())
                    .with("score", gate.score)
                    .with("hard_reject", gate.hard_reject)
                    .with("reason", &gate.reason),
            );
            return Ok(Verdict::Rejected(Rejection::NotSubject {
                reason: gate.reason,
                score: gate.score,
                hard_reject: gate.hard_reject,
            }));
        }
        self.sink.record(
            ActivityEvent::info("gate.accepted")
                .with("source", source)
                .with("gate", subject_gate.name())
                .with("score", gate.score),
        );

        let severity = scorer.assess_image(&image)?;
        self.sink.record(
            ActivityEvent::info("severity.scored")
                .with("source", source)
                .with("score", severity.score)
                .with("raw_score", severity.raw_score)
                .with("flagged", severity.flagged)
                .with("background_penalty", severity.background_penalty),
        );

        let decision = match self.decide(&image, &severity)? {
            Combined::Accepted(decision) => decision,
            Combined::BelowFloor {
                label,
                confidence,
                floor,
            } => {
                self.sink.record(
                    ActivityEvent::warn("decision.low_confidence")
                        .with("source", source)
                        .with("label", &label)
                        .with("confidence", confidence)
                        .with("floor", floor),
                );
                return Ok(Verdict::Rejected(Rejection::LowConfidence {
                    label,
                    confidence,
                    floor,
                }));
            }
        };
        if decision.overridden {
            self.sink.record(
                ActivityEvent::warn("decision.override")
                    .with("source", source)
                    .with("label", &decision.label)
                    .with("severity_score", severity.score),
            );
        }

        let block = self
            .ledger
            .append(record_payload(source, &image_hash, &decision, &severity))?;
        Ok(Verdict::Recorded(Box::new(RecordedDecision {
            source: source.to_string(),
            image_hash,
            decision,
            gate,
            severity,
            block,
        })))
    }

    fn decide(&self, image: &RgbImage, severity: &SeverityAssessment) -> Result<Combined> {
        let tensor = ImageTensor::prepare(image, self.input_size);
        let output = self.classifier.predict(&tensor)?;
        self.combiner.combine(&output, severity)
    }

    /// Classify many images on `workers` threads. Results come back in input
    /// order; only ledger appends are serialised.
    pub fn classify_batch(
        &self,
        items: Vec<(String, Vec<u8>)>,
        workers: usize,
    ) -> Vec<(String, Result<Verdict>)> {
        let total = items.len();
        let workers = workers.clamp(1, total.max(1));
        let (job_tx, job_rx): (Sender<(usize, String, Vec<u8>)>, Receiver<_>) =
            crossbeam_channel::bounded(workers * 2);
        let (done_tx, done_rx) = crossbeam_channel::unbounded();

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (slot, source, bytes) in &job_rx {
                        let verdict = self.classify(&bytes, &source);
                        if done_tx.send((slot, source, verdict)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);
            for (slot, (source, bytes)) in items.into_iter().enumerate() {
                if job_tx.send((slot, source, bytes)).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let mut slots: Vec<Option<(String, Result<Verdict>)>> =
            std::iter::repeat_with(|| None).take(total).collect();
        for (slot, source, verdict) in done_rx {
            slots[slot] = Some((source, verdict));
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(slot, result)| {
                result.unwrap_or_else(|| {
                    (
                        format!("#{slot}"),
                        Err(FgError::ChannelClosed {
                            component: "classify_batch",
                        }),
                    )
                })
            })
            .collect()
    }

    /// Recent recorded decisions, newest first. Defaults to [`RECORD_TYPE`].
    #[must_use]
    pub fn audit_trail(&self, limit: usize, type_filter: Option<&str>) -> Vec<LedgerBlock> {
        self.ledger
            .recent_records(limit, Some(type_filter.unwrap_or(RECORD_TYPE)))
    }

    #[must_use]
    pub fn verify_audit(&self) -> bool {
        self.ledger.verify()
    }
}

fn record_payload(
    source: &str,
    image_hash: &str,
    decision: &Decision,
    severity: &SeverityAssessment,
) -> Value {
    json!({
        "type": RECORD_TYPE,
        "image_hash": image_hash,
        "filename": source,
        "freshness_level": decision.label,
        "confidence": (decision.confidence * 100.0).round() / 100.0,
        "overridden": decision.overridden,
        "severity_score": severity.score,
        "top_k": decision.top_k,
        "timestamp": now_timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb};
    use tempfile::TempDir;

    use super::*;
    use crate::classifier::FixedClassifier;
    use crate::logger::{MemorySink, NullSink};

    fn png(image: &RgbImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn inspector(dir: &TempDir, sink: Arc<dyn ActivitySink>) -> Inspector {
        let ledger = Ledger::open(&dir.path().join("ledger.jsonl"), Arc::clone(&sink)).unwrap();
        Inspector::with_ledger(
            &Config::default(),
            Arc::new(FixedClassifier::new(vec![0.7, 0.1, 0.1, 0.05, 0.05])),
            Arc::new(ledger),
            sink,
        )
    }

    #[test]
    fn undecodable_input_is_indeterminate_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let inspector = inspector(&dir, Arc::new(NullSink));
        let err = inspector.classify(b"not an image", "junk.bin").unwrap_err();
        assert!(err.is_indeterminate());
        assert_eq!(inspector.ledger().len(), 1);
    }

    #[test]
    fn single_pixel_image_is_insufficient_data_not_a_panic() {
        let dir = TempDir::new().unwrap();
        let inspector = inspector(&dir, Arc::new(NullSink));
        let tiny = png(&RgbImage::from_pixel(1, 1, Rgb([10, 10, 10])));
        assert_eq!(inspector.classify(&tiny, "dot.png").unwrap_err().code(), "FG-2002");
        assert_eq!(inspector.gate_only(&tiny).unwrap_err().code(), "FG-2002");
        assert_eq!(inspector.severity_only(&tiny).unwrap_err().code(), "FG-2002");
        assert_eq!(inspector.ledger().len(), 1);

        let results = inspector.classify_batch(vec![("dot".to_string(), tiny)], 2);
        assert_eq!(results[0].1.as_ref().unwrap_err().code(), "FG-2002");
    }

    #[test]
    fn analyzer_runs_without_any_ledger() {
        let dir = TempDir::new().unwrap();
        let analyzer = Analyzer::new(&Config::default());
        let flat = png(&RgbImage::from_pixel(64, 64, Rgb([30, 90, 200])));
        let report = analyzer.gate_only(&flat).unwrap();
        assert!(!report.decision.accepted);
        assert!(analyzer.severity_only(&flat).is_ok());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn flat_graphic_is_rejected_by_the_gate() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::new());
        let inspector = inspector(&dir, sink.clone());
        let flat = RgbImage::from_pixel(64, 64, Rgb([30, 90, 200]));
        let verdict = inspector.classify(&png(&flat), "flat.png").unwrap();
        match verdict.rejection() {
            Some(Rejection::NotSubject { hard_reject, .. }) => {
                assert_eq!(*hard_reject, Some("simple_graphic"));
            }
            other => panic!("expected gate rejection, got {other:?}"),
        }
        assert_eq!(inspector.ledger().len(), 1);
        assert!(sink.names().contains(&"gate.rejected".to_string()));
    }

    #[test]
    fn payload_carries_fingerprint_and_label() {
        let decision = Decision {
            label: "Ripe".to_string(),
            label_index: 2,
            confidence: 66.666,
            top_k: Vec::new(),
            probabilities: vec![0.0; 5],
            overridden: false,
            info: None,
        };
        let severity = SeverityScorer::default().assess(&FeatureVector::default());
        let payload = record_payload("a.png", "abc", &decision, &severity);
        assert_eq!(payload["type"], RECORD_TYPE);
        assert_eq!(payload["image_hash"], "abc");
        assert_eq!(payload["filename"], "a.png");
        assert_eq!(payload["freshness_level"], "Ripe");
        assert_eq!(payload["confidence"], 66.67);
    }

    #[test]
    fn batch_preserves_input_order() {
        let dir = TempDir::new().unwrap();
        let inspector = inspector(&dir, Arc::new(NullSink));
        let items = vec![
            ("a".to_string(), b"nope".to_vec()),
            ("b".to_string(), png(&RgbImage::from_pixel(32, 32, Rgb([0, 0, 0])))),
            ("c".to_string(), Vec::new()),
        ];
        let results = inspector.classify_batch(items, 3);
        let names: Vec<_> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(results[0].1.is_err());
        assert!(results[1].1.as_ref().unwrap().rejection().is_some());
        assert!(results[2].1.is_err());
    }

    #[test]
    fn rejection_messages_are_human_readable() {
        let low = Rejection::LowConfidence {
            label: "Fresh".to_string(),
            confidence: 44.9,
            floor: 45.0,
        };
        assert!(low.message().contains("too poor"));
        let gate = Rejection::NotSubject {
            reason: "simple graphic".to_string(),
            score: 0,
            hard_reject: Some("simple_graphic"),
        };
        assert!(gate.message().contains("simple graphic"));
    }
}
