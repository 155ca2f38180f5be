//! Image statistics: colour space conversion, shape detection, and the
//! feature extractor that feeds the gate and the severity scorer.

pub mod color;
pub mod features;
pub mod shapes;

pub use features::{FeatureExtractor, FeatureVector, Region, decode};
