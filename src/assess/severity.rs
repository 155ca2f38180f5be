//! Severity scorer: estimates how far decay has progressed from surface
//! statistics over the centre of the image.
//!
//! A crop that shows too little produce colour, or is too dark, is reported
//! as "too poor to judge" with a zero score. That is never evidence of decay.

use std::collections::BTreeMap;

use image::RgbImage;
use serde::Serialize;

use crate::assess::{Contribution, award_first, total_points};
use crate::core::config::SeverityConfig;
use crate::core::errors::Result;
use crate::vision::{FeatureExtractor, FeatureVector, Region};

/// Pre-check floors.
const MIN_PRODUCE_RATIO: f64 = 0.15;
const MIN_BRIGHTNESS: f64 = 80.0;
/// Below this produce ratio the crop is assumed to include background.
const CLEAN_PRODUCE_RATIO: f64 = 0.25;

/// Severity verdict for one crop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityAssessment {
    /// Score reached the flag threshold.
    pub flagged: bool,
    /// Final score after any background penalty, clamped to `0..=100`.
    pub score: u32,
    /// Points before the background penalty.
    pub raw_score: u32,
    /// The crop looked like it included background.
    pub background_penalty: bool,
    /// Set when the crop was too poor to judge.
    pub warning: Option<String>,
    /// Points per rule, in evaluation order.
    pub contributions: Vec<Contribution>,
    /// Ratios in percent plus raw moments, for explanation and tests.
    pub indicators: BTreeMap<String, f64>,
}

impl SeverityAssessment {
    /// True when the pre-check bailed out before scoring.
    #[must_use]
    pub fn is_insufficient(&self) -> bool {
        self.warning.is_some() && !self.background_penalty && self.contributions.is_empty()
    }
}

/// Scores decay evidence over the centre crop.
#[derive(Debug, Clone)]
pub struct SeverityScorer {
    config: SeverityConfig,
    extractor: FeatureExtractor,
}

impl Default for SeverityScorer {
    fn default() -> Self {
        Self::new(SeverityConfig::default())
    }
}

impl SeverityScorer {
    /// Scorer with its own surface-profile extractor.
    #[must_use]
    pub fn new(config: SeverityConfig) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::surface(),
        }
    }

    /// Crop, extract, and score.
    pub fn assess_image(&self, image: &RgbImage) -> Result<SeverityAssessment> {
        let features = self.extractor.extract(
            image,
            Region::Centered {
                border: self.config.crop_fraction,
            },
        )?;
        Ok(self.assess(&features))
    }

    /// Score features already extracted from the centre crop.
    #[must_use]
    pub fn assess(&self, fv: &FeatureVector) -> SeverityAssessment {
        let mut indicators = BTreeMap::new();
        indicators.insert("fruit_color_ratio".to_string(), fv.fruit_color_ratio * 100.0);

        if fv.fruit_color_ratio < MIN_PRODUCE_RATIO || fv.brightness_mean < MIN_BRIGHTNESS {
            indicators.insert("avg_brightness".to_string(), fv.brightness_mean);
            indicators.insert("final_score".to_string(), 0.0);
            return SeverityAssessment {
                flagged: false,
                score: 0,
                raw_score: 0,
                background_penalty: false,
                warning: Some("poor image quality or insufficient produce visible".to_string()),
                contributions: Vec::new(),
                indicators,
            };
        }
        let background_penalty = fv.fruit_color_ratio < CLEAN_PRODUCE_RATIO;

        let contributions = indicator_points(fv);
        let raw_score = total_points(&contributions);
        let (score, flagged) = self.finalize(raw_score, background_penalty);

        for (key, value) in [
            ("very_dark_spots", fv.very_dark_ratio * 100.0),
            ("dark_spots", fv.dark_spot_ratio * 100.0),
            ("brown_areas", fv.brown_area_ratio * 100.0),
            ("texture_variance", fv.texture_variance),
            ("avg_brightness", fv.brightness_mean),
            ("mold_areas", fv.mold_area_ratio * 100.0),
            ("brightness_std", fv.brightness_std),
            ("avg_saturation", fv.saturation_mean),
            ("brown_hue_dominance", fv.brown_hue_ratio * 100.0),
            ("dark_spot_count", fv.dark_spot_count as f64),
            ("contrast", f64::from(fv.contrast_range)),
            ("raw_score", f64::from(raw_score)),
            ("final_score", f64::from(score)),
        ] {
            indicators.insert(key.to_string(), value);
        }
        if background_penalty {
            indicators.insert("background_penalty_applied".to_string(), 1.0);
        }

        SeverityAssessment {
            flagged,
            score: score.min(100),
            raw_score,
            background_penalty,
            warning: background_penalty.then(|| "some background detected".to_string()),
            contributions,
            indicators,
        }
    }

    /// Apply the background penalty (truncating) and the flag threshold.
    #[must_use]
    pub fn finalize(&self, raw_score: u32, background_penalty: bool) -> (u32, bool) {
        let score = if background_penalty {
            (f64::from(raw_score) * self.config.background_penalty) as u32
        } else {
            raw_score
        };
        (score, score >= self.config.flag_threshold)
    }
}

/// The ten decay indicators, in evaluation order.
#[must_use]
pub fn indicator_points(fv: &FeatureVector) -> Vec<Contribution> {
    let mut out = Vec::new();
    award_first(
        &mut out,
        "dark_spots",
        &[
            (fv.very_dark_ratio >= 0.05, 40),
            (fv.dark_spot_ratio >= 0.08, 30),
            (fv.dark_spot_ratio >= 0.03, 20),
        ],
    );
    award_first(
        &mut out,
        "brown_areas",
        &[
            (fv.brown_area_ratio >= 0.12, 35),
            (fv.brown_area_ratio >= 0.06, 25),
            (fv.brown_area_ratio >= 0.03, 15),
        ],
    );
    award_first(&mut out, "rough_texture", &[(fv.texture_variance > 1500.0, 20)]);
    award_first(
        &mut out,
        "low_brightness",
        &[(fv.brightness_mean < 80.0, 25), (fv.brightness_mean < 120.0, 15)],
    );
    award_first(
        &mut out,
        "mold",
        &[(fv.mold_area_ratio > 0.25, 25), (fv.mold_area_ratio > 0.15, 15)],
    );
    award_first(
        &mut out,
        "blotchy_brightness",
        &[(fv.brightness_std > 70.0, 20), (fv.brightness_std > 50.0, 10)],
    );
    award_first(
        &mut out,
        "desaturation",
        &[(fv.saturation_mean < 50.0, 15), (fv.saturation_mean < 70.0, 8)],
    );
    award_first(
        &mut out,
        "brown_hue_dominance",
        &[(fv.brown_hue_ratio > 0.30, 20), (fv.brown_hue_ratio > 0.20, 10)],
    );
    award_first(
        &mut out,
        "spreading_spots",
        &[(fv.dark_spot_count > 5, 20), (fv.dark_spot_count > 2, 10)],
    );
    award_first(&mut out, "low_contrast", &[(fv.contrast_range < 100, 15)]);
    out
}
