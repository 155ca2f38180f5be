//! FG-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FgError>;

/// Top-level error type for the freshness gate.
#[derive(Debug, Error)]
pub enum FgError {
    #[error("[FG-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FG-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FG-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FG-2001] image could not be decoded: {details}")]
    ImageDecode { details: String },

    #[error("[FG-2002] insufficient image data: {details}")]
    InsufficientData { details: String },

    #[error("[FG-3001] classifier unavailable: {details}")]
    ClassifierUnavailable { details: String },

    #[error("[FG-3002] classifier returned unusable output: {details}")]
    ClassifierOutput { details: String },

    #[error("[FG-4001] ledger corrupt at {path} (line {line}): {details}")]
    LedgerCorrupt {
        path: PathBuf,
        line: usize,
        details: String,
    },

    #[error("[FG-4002] ledger tail pointer disagrees with log at {path}: {details}")]
    LedgerTailMismatch { path: PathBuf, details: String },

    #[error("[FG-4003] ledger payload rejected: {details}")]
    LedgerPayload { details: String },

    #[error("[FG-5001] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FG-5002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FG-5003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },
}

impl FgError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FG-1001",
            Self::MissingConfig { .. } => "FG-1002",
            Self::ConfigParse { .. } => "FG-1003",
            Self::ImageDecode { .. } => "FG-2001",
            Self::InsufficientData { .. } => "FG-2002",
            Self::ClassifierUnavailable { .. } => "FG-3001",
            Self::ClassifierOutput { .. } => "FG-3002",
            Self::LedgerCorrupt { .. } => "FG-4001",
            Self::LedgerTailMismatch { .. } => "FG-4002",
            Self::LedgerPayload { .. } => "FG-4003",
            Self::Serialization { .. } => "FG-5001",
            Self::Io { .. } => "FG-5002",
            Self::ChannelClosed { .. } => "FG-5003",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Corrupt ledgers and undecodable images never heal on their own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ClassifierUnavailable { .. } | Self::ChannelClosed { .. }
        )
    }

    /// True for failures that mean "no verdict could be formed" rather than a
    /// fault in the service itself.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            Self::ImageDecode { .. } | Self::InsufficientData { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a corrupt ledger line.
    #[must_use]
    pub fn corrupt(path: impl AsRef<Path>, line: usize, details: impl Into<String>) -> Self {
        Self::LedgerCorrupt {
            path: path.as_ref().to_path_buf(),
            line,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for FgError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FgError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<image::ImageError> for FgError {
    fn from(value: image::ImageError) -> Self {
        Self::ImageDecode {
            details: value.to_string(),
        }
    }
}
