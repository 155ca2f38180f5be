//! Subject gate: decides whether an image plausibly shows a single piece of
//! produce before anything expensive runs.
//!
//! Two rule-sets sit behind [`SubjectGate`]. [`ShapeRules`] rejects wheels,
//! frames and reflective bodywork through circle/line evidence;
//! [`ContourRules`] rejects boxes and screens through large quadrilaterals.
//! Hard rejects run in order and the first match wins; otherwise a weighted
//! score plus an acceptance predicate decides.

#![allow(missing_docs)]

use serde::Serialize;

use crate::assess::{Contribution, award_first, total_points};
use crate::core::config::GateVariant;
use crate::vision::FeatureVector;

/// Outcome of the gate for one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateDecision {
    pub accepted: bool,
    /// Weighted score clamped to `0..=100`; zero for hard rejects.
    pub score: u32,
    /// Diagnostic text, never parsed downstream.
    pub reason: String,
    /// Name of the hard-reject rule that fired, if any.
    pub hard_reject: Option<&'static str>,
    pub contributions: Vec<Contribution>,
}

impl GateDecision {
    fn hard(rule: &HardReject) -> Self {
        Self {
            accepted: false,
            score: 0,
            reason: rule.reason.to_string(),
            hard_reject: Some(rule.name),
            contributions: Vec::new(),
        }
    }
}

/// A rule-set that accepts or rejects an image from its features.
pub trait SubjectGate: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, features: &FeatureVector) -> GateDecision;
}

/// Build the gate selected by configuration.
#[must_use]
pub fn gate_for(variant: GateVariant) -> Box<dyn SubjectGate> {
    match variant {
        GateVariant::Shape => Box::new(ShapeRules),
        GateVariant::Contour => Box::new(ContourRules),
    }
}

struct HardReject {
    name: &'static str,
    reason: &'static str,
    fires: fn(&FeatureVector) -> bool,
}

fn first_hard_reject<'a>(rules: &'a [HardReject], fv: &FeatureVector) -> Option<&'a HardReject> {
    rules.iter().find(|rule| (rule.fires)(fv))
}

/// Score terms shared by both rule-sets; only the shape bonus differs.
fn common_score(fv: &FeatureVector, shape_bonus: (&'static str, bool)) -> Vec<Contribution> {
    let mut out = Vec::new();
    award_first(
        &mut out,
        "fruit_color",
        &[
            (fv.fruit_color_ratio >= 0.30, 40),
            (fv.fruit_color_ratio >= 0.15, 25),
            (fv.fruit_color_ratio >= 0.08, 10),
        ],
    );
    award_first(
        &mut out,
        "texture",
        &[(fv.texture_variance > 80.0 && fv.texture_variance < 3000.0, 25)],
    );
    award_first(&mut out, "shading", &[(fv.brightness_std > 20.0, 20)]);
    award_first(
        &mut out,
        "color_richness",
        &[
            (fv.unique_color_count > 500, 15),
            (fv.unique_color_count > 150, 10),
        ],
    );
    award_first(&mut out, shape_bonus.0, &[(shape_bonus.1, 10)]);
    award_first(&mut out, "soft_edges", &[(fv.edge_ratio < 0.08, 10)]);
    out
}

fn scored(accepted: bool, contributions: Vec<Contribution>, detail: String) -> GateDecision {
    let raw = total_points(&contributions);
    GateDecision {
        accepted,
        score: raw.min(100),
        reason: format!("Score:{raw}, {detail}"),
        hard_reject: None,
        contributions,
    }
}

/// Circle/line rule-set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeRules;

const SHAPE_REJECTS: [HardReject; 6] = [
    HardReject {
        name: "simple_graphic",
        reason: "simple graphic",
        fires: |fv| fv.unique_color_count < 50,
    },
    HardReject {
        name: "many_circles",
        reason: "many circular structures",
        fires: |fv| fv.circle_count >= 2 && fv.edge_ratio > 0.12,
    },
    HardReject {
        name: "reflective_surface",
        reason: "reflective/metallic surface",
        fires: |fv| fv.histogram_peak_ratio > 0.20 && fv.edge_ratio > 0.20 && fv.circle_count >= 1,
    },
    HardReject {
        name: "sharp_edges",
        reason: "excessive sharp edges",
        fires: |fv| fv.edge_ratio > 0.30,
    },
    HardReject {
        name: "linear_structure",
        reason: "artificial linear structure",
        fires: |fv| fv.line_count > 30 && fv.edge_ratio > 0.15,
    },
    HardReject {
        name: "uniform_fill",
        reason: "uniform fill / flat color",
        fires: |fv| fv.brightness_std < 10.0,
    },
];

impl SubjectGate for ShapeRules {
    fn name(&self) -> &'static str {
        "shape"
    }

    fn evaluate(&self, fv: &FeatureVector) -> GateDecision {
        if let Some(rule) = first_hard_reject(&SHAPE_REJECTS, fv) {
            return GateDecision::hard(rule);
        }
        let contributions = common_score(fv, ("few_circles", fv.circle_count <= 1));
        let accepted = total_points(&contributions) >= 40
            && fv.fruit_color_ratio >= 0.06
            && fv.circle_count < 3
            && fv.edge_ratio < 0.30
            && (fv.line_count <= 30 || fv.edge_ratio < 0.15);
        scored(
            accepted,
            contributions,
            format!(
                "Colors:{:.0}%, Circles:{}",
                fv.fruit_color_ratio * 100.0,
                fv.circle_count
            ),
        )
    }
}

/// Rectangle/contour rule-set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContourRules;

const CONTOUR_REJECTS: [HardReject; 4] = [
    HardReject {
        name: "simple_graphic",
        reason: "simple graphic",
        fires: |fv| fv.unique_color_count < 50,
    },
    HardReject {
        name: "rectangles",
        reason: "rectangular objects",
        fires: |fv| fv.rectangle_count >= 2,
    },
    HardReject {
        name: "sharp_edges",
        reason: "mechanical object",
        fires: |fv| fv.edge_ratio > 0.25,
    },
    HardReject {
        name: "uniform_fill",
        reason: "uniform fill / flat color",
        fires: |fv| fv.brightness_std < 10.0,
    },
];

impl SubjectGate for ContourRules {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn evaluate(&self, fv: &FeatureVector) -> GateDecision {
        if let Some(rule) = first_hard_reject(&CONTOUR_REJECTS, fv) {
            return GateDecision::hard(rule);
        }
        let contributions = common_score(fv, ("no_rectangles", fv.rectangle_count == 0));
        let accepted = total_points(&contributions) >= 45
            && fv.fruit_color_ratio >= 0.08
            && fv.rectangle_count < 2
            && fv.edge_ratio < 0.25;
        scored(
            accepted,
            contributions,
            format!(
                "Colors:{:.0}%, Rectangles:{}",
                fv.fruit_color_ratio * 100.0,
                fv.rectangle_count
            ),
        )
    }
}
