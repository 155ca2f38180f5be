//! Human-readable report formatting for `fresh`.
//!
//! Each `format_*` returns the whole report as a `String` so the command
//! layer decides where it goes and tests can assert on it directly.

#![allow(missing_docs)]

use std::fmt::Write as _;

use colored::{ColoredString, Colorize};

use crate::assess::{Contribution, SeverityAssessment};
use crate::core::labels::LabelInfo;
use crate::ledger::{ChainReport, ChainSummary, LedgerBlock, RepairReport};
use crate::pipeline::{GateReport, Rejection, Verdict};

/// Paint `text` with a `#rrggbb` label colour, or leave it bold if the colour
/// does not parse.
fn paint(text: &str, hex: &str) -> ColoredString {
    match parse_hex(hex) {
        Some((r, g, b)) => text.truecolor(r, g, b).bold(),
        None => text.bold(),
    }
}

fn parse_hex(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 {
        return None;
    }
    let channel = |at: usize| u8::from_str_radix(digits.get(at..at + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn write_contributions(out: &mut String, contributions: &[Contribution]) {
    for c in contributions {
        let _ = writeln!(out, "    +{:<3} {}", c.points, c.indicator);
    }
}

#[must_use]
pub fn format_verdict(verdict: &Verdict) -> String {
    let mut out = String::new();
    match verdict {
        Verdict::Recorded(recorded) => {
            let decision = &recorded.decision;
            let color = decision.info.as_ref().map_or("", |info| info.color.as_str());
            let _ = writeln!(
                out,
                "{} {} ({:.1}% confidence)",
                "✓".green(),
                paint(&decision.label, color),
                decision.confidence
            );
            if decision.overridden {
                let _ = writeln!(
                    out,
                    "  {} severity {} overrode the classifier",
                    "!".yellow(),
                    recorded.severity.score
                );
            }
            if let Some(info) = &decision.info {
                write_label_info(&mut out, info);
            }
            let _ = writeln!(out, "  Top {}:", decision.top_k.len());
            for ranked in &decision.top_k {
                let _ = writeln!(out, "    {:<14} {:>5.1}%", ranked.label, ranked.confidence);
            }
            let _ = writeln!(out, "  Source:      {}", recorded.source);
            let _ = writeln!(out, "  Image hash:  {}", recorded.image_hash);
            let _ = writeln!(
                out,
                "  Recorded:    block #{} {}",
                recorded.block.index, recorded.block.hash
            );
        }
        Verdict::Rejected(rejection) => {
            let _ = writeln!(out, "{} {}", "✗".red(), rejection.message());
            if let Rejection::NotSubject {
                hard_reject: Some(rule),
                ..
            } = rejection
            {
                let _ = writeln!(out, "  Rule: {rule}");
            }
            let _ = writeln!(out, "  Nothing was recorded.");
        }
    }
    out
}

fn write_label_info(out: &mut String, info: &LabelInfo) {
    if !info.description.is_empty() {
        let _ = writeln!(out, "  {}", info.description);
    }
    if !info.recommendation.is_empty() {
        let _ = writeln!(out, "  -> {}", info.recommendation);
    }
}

#[must_use]
pub fn format_gate_report(report: &GateReport) -> String {
    let mut out = String::new();
    let decision = &report.decision;
    let verdict = if decision.accepted {
        "accepted".green()
    } else {
        "rejected".red()
    };
    let _ = writeln!(
        out,
        "Subject gate ({}): {} score {}",
        report.gate, verdict, decision.score
    );
    let _ = writeln!(out, "  {}", decision.reason);
    if let Some(rule) = decision.hard_reject {
        let _ = writeln!(out, "  Hard reject: {rule}");
    }
    write_contributions(&mut out, &decision.contributions);
    let f = &report.features;
    let _ = writeln!(
        out,
        "  colours {} | edges {:.1}% | circles {} | lines {} | rectangles {}",
        f.unique_color_count,
        f.edge_ratio * 100.0,
        f.circle_count,
        f.line_count,
        f.rectangle_count
    );
    out
}

#[must_use]
pub fn format_severity(assessment: &SeverityAssessment) -> String {
    let mut out = String::new();
    let flag = if assessment.flagged {
        "FLAGGED".red().bold()
    } else {
        "not flagged".green()
    };
    let _ = writeln!(
        out,
        "Severity: {} (score {}, raw {})",
        flag, assessment.score, assessment.raw_score
    );
    if let Some(warning) = &assessment.warning {
        let _ = writeln!(out, "  {} {warning}", "!".yellow());
    }
    write_contributions(&mut out, &assessment.contributions);
    for (name, value) in &assessment.indicators {
        let _ = writeln!(out, "    {name:<28} {value:>8.2}");
    }
    out
}

#[must_use]
pub fn format_audit(blocks: &[LedgerBlock]) -> String {
    let mut out = String::new();
    if blocks.is_empty() {
        let _ = writeln!(out, "No matching records.");
        return out;
    }
    for block in blocks {
        let label = block
            .data
            .get("freshness_level")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let confidence = block
            .data
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .map_or_else(|| "-".to_string(), |c| format!("{c:.1}%"));
        let source = block
            .data
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let _ = writeln!(
            out,
            "#{:<5} {}  {:<14} {:>7}  {}",
            block.index, block.timestamp, label, confidence, source
        );
    }
    out
}

#[must_use]
pub fn format_verify(report: &ChainReport, summary: &ChainSummary) -> String {
    let mut out = String::new();
    if report.valid {
        let _ = writeln!(
            out,
            "{} chain valid: {} blocks, head {}",
            "✓".green(),
            summary.total_blocks,
            summary.head_hash
        );
    } else {
        let _ = writeln!(
            out,
            "{} chain INVALID at block {}: {}",
            "✗".red(),
            report
                .first_invalid
                .map_or_else(|| "?".to_string(), |i| i.to_string()),
            report.reason.as_deref().unwrap_or("unknown")
        );
    }
    out
}

#[must_use]
pub fn format_repair(report: &RepairReport) -> String {
    let mut out = String::new();
    match &report.problem {
        None => {
            let _ = writeln!(
                out,
                "Ledger is intact ({} blocks); nothing to repair.",
                report.kept_blocks
            );
        }
        Some(problem) => {
            let _ = writeln!(out, "Problem: {problem}");
            let _ = writeln!(
                out,
                "Kept {} blocks, dropped {} lines ({} bytes).",
                report.kept_blocks, report.dropped_lines, report.truncated_bytes
            );
        }
    }
    out
}
