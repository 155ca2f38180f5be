//! Heuristic assessment stages: subject gate, severity scorer, decision
//! combiner.
//!
//! Every stage reports the points it awarded as an ordered list of
//! [`Contribution`]s rather than a bare running total, so a verdict can be
//! explained rule by rule.

pub mod combiner;
pub mod gate;
pub mod severity;

use serde::Serialize;

pub use combiner::{Combined, Decision, DecisionCombiner, RankedLabel};
pub use gate::{ContourRules, GateDecision, ShapeRules, SubjectGate, gate_for};
pub use severity::{SeverityAssessment, SeverityScorer};

/// Points awarded by one named rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Contribution {
    /// Rule name, stable across releases.
    pub indicator: &'static str,
    /// Points awarded, before any clamp.
    pub points: u32,
}

impl Contribution {
    /// Award `points` under `indicator`.
    #[must_use]
    pub const fn new(indicator: &'static str, points: u32) -> Self {
        Self { indicator, points }
    }
}

/// Sum of all awarded points.
#[must_use]
pub fn total_points(contributions: &[Contribution]) -> u32 {
    contributions.iter().map(|c| c.points).sum()
}

/// Push the first tier whose predicate holds; tiers are mutually exclusive.
pub(crate) fn award_first(
    out: &mut Vec<Contribution>,
    indicator: &'static str,
    tiers: &[(bool, u32)],
) {
    if let Some(&(_, points)) = tiers.iter().find(|(hit, _)| *hit) {
        out.push(Contribution::new(indicator, points));
    }
}
