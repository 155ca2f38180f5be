//! Decision combiner: merges the classifier's distribution with the severity
//! verdict and applies the confidence floor.
//!
//! When severity is flagged the classifier is overruled outright. The label
//! becomes the worst level and the distribution collapses onto the two ends
//! of the scale, so top-k always agrees with the forced label.

use serde::Serialize;

use crate::assess::SeverityAssessment;
use crate::classifier::ClassifierOutput;
use crate::core::config::DecisionConfig;
use crate::core::errors::Result;
use crate::core::labels::{LabelInfo, LabelSet};

/// One entry of the top-k list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedLabel {
    /// Label name.
    pub label: String,
    /// Percent, `0..=100`.
    pub confidence: f64,
}

/// Final labelled decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Chosen label name.
    pub label: String,
    /// Ordinal position of `label`, 0 = best.
    pub label_index: usize,
    /// Percent, `0..=100`.
    pub confidence: f64,
    /// Most probable labels, highest first, ties to the lower index.
    pub top_k: Vec<RankedLabel>,
    /// Distribution after any override.
    pub probabilities: Vec<f64>,
    /// True when the severity override replaced the classifier.
    pub overridden: bool,
    /// Display metadata for `label`.
    pub info: Option<LabelInfo>,
}

/// Either a decision worth recording or one that fell under the floor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Combined {
    /// Confident enough to record.
    Accepted(Decision),
    /// Confidence under the configured floor; nothing is recorded.
    BelowFloor {
        /// Label that would have been chosen.
        label: String,
        /// Its confidence in percent.
        confidence: f64,
        /// Floor in effect.
        floor: f64,
    },
}

/// Applies the severity override, the floor and top-k ranking.
#[derive(Debug, Clone)]
pub struct DecisionCombiner {
    labels: LabelSet,
    confidence_floor: f64,
    top_k: usize,
}

impl Default for DecisionCombiner {
    fn default() -> Self {
        Self::new(&DecisionConfig::default())
    }
}

impl DecisionCombiner {
    /// Combiner for the configured label set.
    #[must_use]
    pub fn new(config: &DecisionConfig) -> Self {
        Self {
            labels: config.labels.clone(),
            confidence_floor: config.confidence_floor,
            top_k: config.top_k,
        }
    }

    /// Label set decisions are drawn from.
    #[must_use]
    pub const fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Merge one classifier output with the severity verdict.
    ///
    /// Fails when the distribution does not fit the label set.
    pub fn combine(
        &self,
        output: &ClassifierOutput,
        severity: &SeverityAssessment,
    ) -> Result<Combined> {
        output.validate(self.labels.len())?;

        let (label_index, confidence, probabilities, overridden) = if severity.flagged {
            let confidence = f64::from(severity.score.min(100));
            (
                self.labels.worst_index(),
                confidence,
                self.override_distribution(confidence),
                true,
            )
        } else {
            let index = argmax(&output.probabilities);
            (
                index,
                output.probabilities[index] * 100.0,
                output.probabilities.clone(),
                false,
            )
        };
        let confidence = confidence.clamp(0.0, 100.0);
        let label = self.labels.name(label_index).to_string();

        if confidence < self.confidence_floor {
            return Ok(Combined::BelowFloor {
                label,
                confidence,
                floor: self.confidence_floor,
            });
        }

        Ok(Combined::Accepted(Decision {
            top_k: self.rank(&probabilities),
            info: self.labels.get(label_index).cloned(),
            label,
            label_index,
            confidence,
            probabilities,
            overridden,
        }))
    }

    /// Worst slot gets the severity confidence, best slot the remainder.
    fn override_distribution(&self, confidence: f64) -> Vec<f64> {
        let mut probabilities = vec![0.0; self.labels.len()];
        let share = confidence / 100.0;
        probabilities[self.labels.best_index()] = 1.0 - share;
        probabilities[self.labels.worst_index()] = share;
        probabilities
    }

    /// Highest `top_k` labels, descending; ties go to the lower index.
    #[must_use]
    pub fn rank(&self, probabilities: &[f64]) -> Vec<RankedLabel> {
        let mut order: Vec<usize> = (0..probabilities.len()).collect();
        order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]).then(a.cmp(&b)));
        order
            .into_iter()
            .take(self.top_k)
            .map(|index| RankedLabel {
                label: self.labels.name(index).to_string(),
                confidence: (probabilities[index] * 100.0).min(100.0),
            })
            .collect()
    }
}

/// First index holding the maximum.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (index, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] {
            best = index;
        }
    }
    best
}
