//! External classifier contract and the two adapters shipped with the crate.
//!
//! The classifier itself is a black box: it receives a normalized RGB tensor
//! and returns one probability per label. Nothing here retries; failures go
//! straight back to the caller.

#![allow(missing_docs)]

use std::io::Write as _;
use std::process::{Command, Stdio};
use std::thread;

use image::RgbImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

use crate::core::config::ClassifierConfig;
use crate::core::errors::{FgError, Result};

// ---------------------------------------------------------------------------
// Tensor + output types
// ---------------------------------------------------------------------------

/// Image resized to `size × size`, RGB order, values in `[0, 1]`, HWC layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageTensor {
    pub shape: [usize; 3],
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Resize and scale a decoded image.
    #[must_use]
    pub fn prepare(image: &RgbImage, size: u32) -> Self {
        let resized = imageops::resize(image, size, size, FilterType::Triangle);
        let data = resized
            .as_raw()
            .iter()
            .map(|&channel| f32::from(channel) / 255.0)
            .collect();
        let side = size as usize;
        Self {
            shape: [side, side, 3],
            data,
        }
    }

    /// Pixel `(x, y)` as `[r, g, b]`.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Option<[f32; 3]> {
        let [height, width, _] = self.shape;
        if x >= width || y >= height {
            return None;
        }
        let at = (y * width + x) * 3;
        Some([self.data[at], self.data[at + 1], self.data[at + 2]])
    }
}

/// One probability per label, aligned with the configured label order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassifierOutput {
    pub probabilities: Vec<f64>,
}

impl ClassifierOutput {
    #[must_use]
    pub const fn new(probabilities: Vec<f64>) -> Self {
        Self { probabilities }
    }

    /// Check length and finiteness against the label count.
    pub fn validate(&self, expected_len: usize) -> Result<()> {
        if self.probabilities.len() != expected_len {
            return Err(FgError::ClassifierOutput {
                details: format!(
                    "expected {expected_len} probabilities, got {}",
                    self.probabilities.len()
                ),
            });
        }
        if let Some(bad) = self.probabilities.iter().find(|p| !p.is_finite()) {
            return Err(FgError::ClassifierOutput {
                details: format!("non-finite probability {bad}"),
            });
        }
        Ok(())
    }
}

/// A statistical classifier over the configured label set.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;
    fn predict(&self, tensor: &ImageTensor) -> Result<ClassifierOutput>;
}

// ---------------------------------------------------------------------------
// FixedClassifier
// ---------------------------------------------------------------------------

/// Returns the same distribution for every image.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    output: ClassifierOutput,
}

impl FixedClassifier {
    #[must_use]
    pub const fn new(probabilities: Vec<f64>) -> Self {
        Self {
            output: ClassifierOutput::new(probabilities),
        }
    }

    /// Parse a comma-separated list such as `0.7,0.2,0.05,0.03,0.02`.
    pub fn parse(raw: &str) -> Result<Self> {
        let probabilities = raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<f64>().map_err(|err| FgError::ClassifierOutput {
                    details: format!("invalid probability {part:?}: {err}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if probabilities.is_empty() {
            return Err(FgError::ClassifierOutput {
                details: "empty probability list".to_string(),
            });
        }
        Ok(Self::new(probabilities))
    }
}

impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    fn predict(&self, _tensor: &ImageTensor) -> Result<ClassifierOutput> {
        Ok(self.output.clone())
    }
}

// ---------------------------------------------------------------------------
// ProcessClassifier
// ---------------------------------------------------------------------------

/// Runs an external program per image: tensor JSON on stdin, probability
/// array JSON on stdout.
#[derive(Debug, Clone)]
pub struct ProcessClassifier {
    program: String,
    args: Vec<String>,
}

impl ProcessClassifier {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Adapter for `[classifier] command`, if one is configured.
    #[must_use]
    pub fn from_config(config: &ClassifierConfig) -> Option<Self> {
        config
            .command
            .as_ref()
            .map(|program| Self::new(program.clone(), config.args.clone()))
    }
}

impl Classifier for ProcessClassifier {
    fn name(&self) -> &str {
        &self.program
    }

    fn predict(&self, tensor: &ImageTensor) -> Result<ClassifierOutput> {
        let unavailable = |details: String| FgError::ClassifierUnavailable { details };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| unavailable(format!("failed to spawn {}: {err}", self.program)))?;

        let payload = serde_json::to_vec(tensor)?;
        let stdin = child.stdin.take();
        // Feed stdin while stdout drains, so neither pipe can fill up and
        // stall both sides. Dropping the handle closes the child's stdin.
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(&payload),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output
            .map_err(|err| unavailable(format!("failed to wait for {}: {err}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(unavailable(format!(
                    "failed to send the tensor to {}: {err}",
                    self.program
                )));
            }
            Err(_) => {
                return Err(unavailable(format!(
                    "stdin writer for {} panicked",
                    self.program
                )));
            }
        }

        let probabilities: Vec<f64> =
            serde_json::from_slice(&output.stdout).map_err(|err| FgError::ClassifierOutput {
                details: format!("stdout is not a JSON number array: {err}"),
            })?;
        Ok(ClassifierOutput::new(probabilities))
    }
}
