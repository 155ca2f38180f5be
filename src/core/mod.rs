//! Shared foundations: error taxonomy, configuration, ordinal label set.

pub mod config;
pub mod errors;
pub mod labels;
