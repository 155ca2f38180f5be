//! Freshness gate: deterministic, explainable heuristics around a produce
//! freshness classifier, with every accepted decision recorded in a
//! hash-linked, append-only ledger.
//!
//! Per image: [`vision`] extracts statistics, [`assess::SubjectGate`] decides
//! whether the image shows produce at all, [`assess::SeverityScorer`]
//! estimates decay over the centre crop, the external
//! [`classifier::Classifier`] is consulted, [`assess::DecisionCombiner`]
//! applies the override and confidence floor, and [`ledger::Ledger`] records
//! the result. [`pipeline::Inspector`] wires the stages together.

pub mod assess;
pub mod classifier;
pub mod core;
pub mod ledger;
pub mod logger;
pub mod pipeline;
pub mod vision;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "cli")]
pub mod cli_app;


pub use crate::core::config::Config;
pub use crate::core::errors::{FgError, Result};
pub use crate::pipeline::{Inspector, Rejection, Verdict};
