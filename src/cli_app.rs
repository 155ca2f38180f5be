//! Top-level CLI definition and dispatch.

#![allow(missing_docs)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;

use crate::classifier::{Classifier, FixedClassifier, ProcessClassifier};
use crate::cli::{
    format_audit, format_gate_report, format_repair, format_severity, format_verdict,
    format_verify,
};
use crate::core::config::Config;
use crate::core::errors::{FgError, Result};
use crate::ledger::Ledger;
use crate::logger::{ActivitySink, JsonlLogger, NullSink};
use crate::pipeline::{Analyzer, Inspector, RECORD_TYPE, Verdict};

/// Explainable produce-freshness checks with a tamper-evident decision ledger.
#[derive(Debug, Parser)]
#[command(name = "fresh", version, about)]
pub struct Cli {
    /// Config file (defaults to $FRESH_CONFIG, then built-in defaults).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Emit structured JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline on an image and record accepted decisions.
    Check {
        image: PathBuf,
        /// Fixed classifier output, comma separated, best label first.
        #[arg(long, value_name = "P1,..,PN", conflicts_with = "classifier_cmd")]
        probabilities: Option<String>,
        /// External classifier command (tensor JSON on stdin, probabilities on stdout).
        #[arg(long, value_name = "CMD")]
        classifier_cmd: Option<String>,
    },
    /// Run only feature extraction and the subject gate.
    Gate { image: PathBuf },
    /// Run only the severity scorer.
    Severity { image: PathBuf },
    /// Show recent ledger records, newest first.
    Audit {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Payload type to match (default: freshness_check).
        #[arg(long = "type", value_name = "TYPE")]
        record_type: Option<String>,
    },
    /// Verify ledger integrity (exit 0 valid, 1 invalid).
    Verify,
    /// Export, import or repair the ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
    },
    /// Show configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Generate shell completions.
    Completions { shell: Shell },
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// Write the chain as a JSON array of blocks.
    Export { out: PathBuf },
    /// Build an empty ledger from a JSON array of blocks.
    Import { input: PathBuf },
    /// Truncate the log to its longest valid prefix.
    Repair {
        /// Confirm the truncation.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
}

/// Dispatch a parsed command line.
///
/// Exit codes: 0 success, 1 negative outcome (rejected image, invalid chain),
/// errors are returned to the caller.
pub fn run(cli: &Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())?;
    let sink = activity_sink(&config);

    match &cli.command {
        Command::Check {
            image,
            probabilities,
            classifier_cmd,
        } => {
            let classifier = select_classifier(
                &config,
                probabilities.as_deref(),
                classifier_cmd.as_deref(),
            )?;
            let inspector = Inspector::from_config(&config, classifier, sink)?;
            let bytes = read_image(image)?;
            let verdict = inspector.classify(&bytes, &image.display().to_string())?;
            emit(cli.json, &verdict, format_verdict)?;
            Ok(match verdict {
                Verdict::Recorded(_) => ExitCode::SUCCESS,
                Verdict::Rejected(_) => ExitCode::from(1),
            })
        }
        Command::Gate { image } => {
            let report = Analyzer::from_config(&config)?.gate_only(&read_image(image)?)?;
            emit(cli.json, &report, format_gate_report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Severity { image } => {
            let analyzer = Analyzer::from_config(&config)?;
            let assessment = analyzer.severity_only(&read_image(image)?)?;
            emit(cli.json, &assessment, format_severity)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Audit { limit, record_type } => {
            let ledger = open_ledger(&config, sink)?;
            let record_type = record_type.as_deref().unwrap_or(RECORD_TYPE);
            let records = ledger.recent_records(*limit, Some(record_type));
            emit(cli.json, &records, |r| format_audit(r))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify => {
            let ledger = open_ledger(&config, sink)?;
            let report = ledger.verify_report();
            let summary = ledger.summary();
            if cli.json {
                print_json(&serde_json::json!({ "report": report, "summary": summary }))?;
            } else {
                print!("{}", format_verify(&report, &summary));
            }
            Ok(if report.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Ledger { action } => run_ledger(cli.json, &config, sink, action),
        Command::Config {
            action: ConfigCommand::Show,
        } => {
            if cli.json {
                print_json(&config)?;
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "fresh", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_ledger(
    json: bool,
    config: &Config,
    sink: Arc<dyn ActivitySink>,
    action: &LedgerCommand,
) -> Result<ExitCode> {
    let path = &config.ledger.path;
    match action {
        LedgerCommand::Export { out } => {
            let ledger = open_ledger(config, sink)?;
            let blocks = ledger.export_array(out)?;
            emit(json, &serde_json::json!({ "exported": blocks, "out": out }), |_| {
                format!("Exported {blocks} blocks to {}\n", out.display())
            })?;
            Ok(ExitCode::SUCCESS)
        }
        LedgerCommand::Import { input } => {
            let ledger = Ledger::import(path, input, sink)?;
            let summary = ledger.summary();
            emit(json, &summary, |s| {
                format!(
                    "Imported {} blocks into {} (head {})\n",
                    s.total_blocks,
                    path.display(),
                    s.head_hash
                )
            })?;
            Ok(ExitCode::SUCCESS)
        }
        LedgerCommand::Repair { yes } => {
            if !yes {
                eprintln!(
                    "Refusing to truncate {} without --yes. Export a copy first.",
                    path.display()
                );
                return Ok(ExitCode::from(1));
            }
            let report = Ledger::repair(path, sink.as_ref())?;
            emit(json, &report, format_repair)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `--probabilities`, then `--classifier-cmd`, then `[classifier] command`.
fn select_classifier(
    config: &Config,
    probabilities: Option<&str>,
    command: Option<&str>,
) -> Result<Arc<dyn Classifier>> {
    if let Some(raw) = probabilities {
        return Ok(Arc::new(FixedClassifier::parse(raw)?));
    }
    if let Some(line) = command {
        let mut words = line.split_whitespace();
        let program = words.next().ok_or_else(|| FgError::ClassifierUnavailable {
            details: "--classifier-cmd is empty".to_string(),
        })?;
        return Ok(Arc::new(ProcessClassifier::new(
            program,
            words.map(str::to_string).collect(),
        )));
    }
    ProcessClassifier::from_config(&config.classifier)
        .map(|c| Arc::new(c) as Arc<dyn Classifier>)
        .ok_or_else(|| FgError::ClassifierUnavailable {
            details: "no classifier configured; pass --probabilities or --classifier-cmd"
                .to_string(),
        })
}

fn open_ledger(config: &Config, sink: Arc<dyn ActivitySink>) -> Result<Arc<Ledger>> {
    Ledger::open_or_import(
        &config.ledger.path,
        config.ledger.legacy_import.as_deref(),
        sink,
    )
    .map(Arc::new)
}

/// JSONL log at `[logging] path`, else next to the ledger.
fn activity_sink(config: &Config) -> Arc<dyn ActivitySink> {
    if !config.logging.enabled {
        return Arc::new(NullSink);
    }
    let path = config
        .logging
        .path
        .clone()
        .unwrap_or_else(|| config.ledger.path.with_extension("activity.jsonl"));
    let logger = JsonlLogger::open(&path);
    if let Some(reason) = logger.degraded_reason() {
        eprintln!("fresh: activity log degraded to stderr ({reason})");
    }
    Arc::new(logger)
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|err| FgError::io(path, err))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        print_json(value)
    } else {
        print!("{}", text(value));
        Ok(())
    }
}
