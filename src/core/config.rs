//! TOML configuration with per-section defaults and validation.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FgError, Result};
use crate::core::labels::LabelSet;

/// Environment variable naming a config file when `--config` is absent.
pub const CONFIG_ENV: &str = "FRESH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gate: GateConfig,
    pub severity: SeverityConfig,
    pub classifier: ClassifierConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
    pub decision: DecisionConfig,
}

/// Which subject-gate rule-set to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateVariant {
    /// Circle/line hard rejects (wheels, frames, reflective surfaces).
    #[default]
    Shape,
    /// Rectangle/contour hard rejects (boxes, screens, packaging).
    Contour,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub variant: GateVariant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    /// Border discarded on each side before scoring, as a fraction of the side.
    pub crop_fraction: f64,
    /// Final score at or above which an item is flagged.
    pub flag_threshold: u32,
    /// Multiplier applied when the crop still shows background.
    pub background_penalty: f64,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            crop_fraction: 0.15,
            flag_threshold: 50,
            background_penalty: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum final confidence (percent) for a decision to be recorded.
    pub confidence_floor: f64,
    pub top_k: usize,
    /// Ordered best → worst.
    pub labels: LabelSet,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 45.0,
            top_k: 3,
            labels: LabelSet::freshness(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Append-only block log.
    pub path: PathBuf,
    /// Array-format chain imported when the log does not exist yet.
    pub legacy_import: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("freshness_ledger.jsonl"),
            legacy_import: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// External program speaking the JSON stdin/stdout contract.
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Square side of the tensor handed to the classifier.
    pub input_size: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            input_size: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// JSONL activity log; stderr when unset.
    pub path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from [`CONFIG_ENV`], or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let Some(path) = path.map(Path::to_path_buf).or(env_path) else {
            return Ok(Self::default());
        };
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FgError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| FgError::io(path, source))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| FgError::Serialization {
            context: "toml",
            details: err.to_string(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |details: String| Err(FgError::InvalidConfig { details });

        if !(0.0..0.5).contains(&self.severity.crop_fraction) {
            return invalid(format!(
                "severity.crop_fraction must be in [0, 0.5), got {}",
                self.severity.crop_fraction
            ));
        }
        if self.severity.flag_threshold == 0 || self.severity.flag_threshold > 100 {
            return invalid(format!(
                "severity.flag_threshold must be in 1..=100, got {}",
                self.severity.flag_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.severity.background_penalty) {
            return invalid(format!(
                "severity.background_penalty must be in [0, 1], got {}",
                self.severity.background_penalty
            ));
        }
        if !(0.0..=100.0).contains(&self.decision.confidence_floor) {
            return invalid(format!(
                "decision.confidence_floor must be in [0, 100], got {}",
                self.decision.confidence_floor
            ));
        }
        if self.decision.top_k == 0 {
            return invalid("decision.top_k must be at least 1".to_string());
        }
        if self.decision.labels.len() < 2 {
            return invalid(format!(
                "decision.labels needs at least two ordinal levels, got {}",
                self.decision.labels.len()
            ));
        }
        if self.ledger.path.as_os_str().is_empty() {
            return invalid("ledger.path must not be empty".to_string());
        }
        if self.classifier.input_size == 0 {
            return invalid("classifier.input_size must be positive".to_string());
        }
        Ok(())
    }
}
