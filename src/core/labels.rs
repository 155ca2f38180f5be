//! Ordinal label set shared by the classifier contract and the decision combiner.
//!
//! Labels are ordered best → worst. Index 0 is the best level and the last
//! index is the worst; the severity override always targets the last index.

use serde::{Deserialize, Serialize};

/// Display metadata attached to one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    /// Label name as reported to callers and stored in the ledger.
    pub name: String,
    /// Hex display colour.
    #[serde(default)]
    pub color: String,
    /// Short condition description.
    #[serde(default)]
    pub description: String,
    /// What to do with an item at this level.
    #[serde(default)]
    pub recommendation: String,
}

impl LabelInfo {
    fn new(name: &str, color: &str, description: &str, recommendation: &str) -> Self {
        Self {
            name: name.to_string(),
            color: color.to_string(),
            description: description.to_string(),
            recommendation: recommendation.to_string(),
        }
    }
}

/// Ordered set of labels, best first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet {
    labels: Vec<LabelInfo>,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::freshness()
    }
}

impl LabelSet {
    /// Build a set from explicit entries. Order is best → worst.
    #[must_use]
    pub fn new(labels: Vec<LabelInfo>) -> Self {
        Self { labels }
    }

    /// Build a set from bare names with no display metadata.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            labels: names
                .into_iter()
                .map(|name| LabelInfo::new(name.as_ref(), "", "", ""))
                .collect(),
        }
    }

    /// The five-level produce freshness scale.
    #[must_use]
    pub fn freshness() -> Self {
        Self::new(vec![
            LabelInfo::new(
                "Fresh",
                "#10b981",
                "Perfect condition! Best time to consume.",
                "Enjoy now or store properly for later use.",
            ),
            LabelInfo::new(
                "Slightly Ripe",
                "#84cc16",
                "Good condition with optimal ripeness.",
                "Great for eating! Consume within 2-3 days.",
            ),
            LabelInfo::new(
                "Ripe",
                "#f59e0b",
                "Fully ripe. Should be consumed soon.",
                "Eat within 1-2 days or use in cooking.",
            ),
            LabelInfo::new(
                "Overripe",
                "#f97316",
                "Past peak freshness. Quality declining.",
                "Use immediately in smoothies or baking.",
            ),
            LabelInfo::new(
                "Rotten",
                "#ef4444",
                "Spoiled. Not safe for consumption.",
                "Discard immediately. Do not consume.",
            ),
        ])
    }

    /// Number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when no levels are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Level at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&LabelInfo> {
        self.labels.get(index)
    }

    /// Name at `index`, or `"unknown"` when out of range.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        self.labels
            .get(index)
            .map_or("unknown", |label| label.name.as_str())
    }

    /// Index of the level called `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|label| label.name == name)
    }

    /// Index of the best ordinal level.
    #[must_use]
    pub const fn best_index(&self) -> usize {
        0
    }

    /// Index of the worst ordinal level.
    #[must_use]
    pub fn worst_index(&self) -> usize {
        self.labels.len().saturating_sub(1)
    }

    /// Levels from best to worst.
    pub fn iter(&self) -> impl Iterator<Item = &LabelInfo> {
        self.labels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_scale_is_ordered_best_to_worst() {
        let labels = LabelSet::freshness();
        assert_eq!(labels.len(), 5);
        assert_eq!(labels.name(labels.best_index()), "Fresh");
        assert_eq!(labels.name(labels.worst_index()), "Rotten");
        assert_eq!(labels.position("Ripe"), Some(2));
    }

    #[test]
    fn out_of_range_name_is_unknown() {
        let labels = LabelSet::from_names(["good", "bad"]);
        assert_eq!(labels.name(7), "unknown");
        assert_eq!(labels.worst_index(), 1);
    }

    #[test]
    fn label_set_round_trips_through_toml_as_array() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            labels: LabelSet,
        }
        let text = toml::to_string(&Wrapper {
            labels: LabelSet::freshness(),
        })
        .expect("serialize");
        let parsed: Wrapper = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.labels, LabelSet::freshness());
    }
}
