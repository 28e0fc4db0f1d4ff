// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::advisory::Assessment;
use crate::detector::Verdict;
use crate::orchestrator::ScanOutcome;
use crate::response::ResponseDiff;
use colored::*;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{Result, Write};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    JsonLines,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "jsonl" | "json-lines" | "jsonlines" => Ok(Self::JsonLines),
            other => Err(format!("Unsupported output format: {}", other)),
        }
    }
}

#[derive(Serialize)]
struct VerdictLine<'a> {
    kind: &'static str,
    timestamp: &'a str,
    target: &'a str,
    technique: &'static str,
    suspicious: bool,
    confidence: f64,
    signals: Vec<&'a str>,
    rationale: &'a str,
    timing_delta_ms: i64,
    payload_fingerprint: &'a str,
    baseline_status: u16,
    test_status: u16,
    test_connection_closed: bool,
    assessment: Option<&'a Assessment>,
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    kind: &'static str,
    timestamp: &'a str,
    target: &'a str,
    total_probes: usize,
    suspicious_count: usize,
    most_likely: Option<&'static str>,
    highest_confidence: f64,
    completed: bool,
    error: Option<String>,
}

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn render(outcome: &ScanOutcome, format: ReportFormat, color: bool) -> Result<String> {
        match format {
            ReportFormat::Text => Ok(Self::render_text(outcome, color)),
            ReportFormat::JsonLines => Self::render_json_lines(outcome),
        }
    }

    /// Writes every outcome to `output_path`. Text files are never coloured.
    pub fn write_to_file(
        outcomes: &[ScanOutcome],
        output_path: &str,
        format: ReportFormat,
    ) -> Result<()> {
        let mut file = File::create(output_path)?;
        for outcome in outcomes {
            let rendered = Self::render(outcome, format, false)?;
            file.write_all(rendered.as_bytes())?;
            if format == ReportFormat::Text {
                writeln!(file)?;
            }
        }
        Ok(())
    }

    pub fn render_text(outcome: &ScanOutcome, color: bool) -> String {
        let report = &outcome.report;
        let mut out = String::new();

        let _ = writeln!(out, "{}", paint(&"=".repeat(72), color, |s| s.bright_blue()));
        let _ = writeln!(out, "{} {}", paint("Target:", color, |s| s.bold()), report.target);
        let _ = writeln!(
            out,
            "Probes run: {} | Suspicious: {}",
            report.total_probes, report.suspicious_count
        );

        match report.most_likely {
            Some(technique) => {
                let _ = writeln!(
                    out,
                    "Most likely technique: {} (confidence {:.1}%)",
                    paint(technique.name(), color, |s| s.red().bold()),
                    report.highest_confidence * 100.0
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "{}",
                    paint("No request smuggling indicators found", color, |s| s.green())
                );
            }
        }

        if let Some(error) = &outcome.error {
            let _ = writeln!(
                out,
                "{} {}",
                paint("Scan aborted:", color, |s| s.yellow().bold()),
                error
            );
        }

        for verdict in &outcome.verdicts {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", verdict_heading(verdict, color));
            for line in verdict.rationale.lines() {
                let _ = writeln!(out, "    {}", line);
            }
            let diff = ResponseDiff::compare(&verdict.baseline, &verdict.test);
            if diff.has_changes() {
                for line in diff.summary().lines() {
                    let _ = writeln!(out, "    {}", line);
                }
            }
            if let Some(assessment) = &verdict.assessment {
                for recommendation in &assessment.recommendations {
                    let _ = writeln!(out, "    -> {}", recommendation);
                }
            }
        }
        out
    }

    /// One JSON object per verdict, then a summary object.
    pub fn render_json_lines(outcome: &ScanOutcome) -> Result<String> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut out = String::new();

        for verdict in &outcome.verdicts {
            let line = VerdictLine {
                kind: "verdict",
                timestamp: &timestamp,
                target: &verdict.target,
                technique: verdict.technique.name(),
                suspicious: verdict.suspicious,
                confidence: verdict.confidence,
                signals: verdict.signal_descriptions(),
                rationale: &verdict.rationale,
                timing_delta_ms: verdict.timing_delta_ms,
                payload_fingerprint: &verdict.payload_fingerprint,
                baseline_status: verdict.baseline.status_code,
                test_status: verdict.test.status_code,
                test_connection_closed: verdict.test.connection_closed,
                assessment: verdict.assessment.as_ref(),
            };
            out.push_str(&serde_json::to_string(&line)?);
            out.push('\n');
        }

        let report = &outcome.report;
        let summary = SummaryLine {
            kind: "summary",
            timestamp: &timestamp,
            target: &report.target,
            total_probes: report.total_probes,
            suspicious_count: report.suspicious_count,
            most_likely: report.most_likely.map(|t| t.name()),
            highest_confidence: report.highest_confidence,
            completed: outcome.error.is_none(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        };
        out.push_str(&serde_json::to_string(&summary)?);
        out.push('\n');
        Ok(out)
    }
}

fn verdict_heading(verdict: &Verdict, color: bool) -> String {
    let tag = if verdict.suspicious {
        paint("[SUSPICIOUS]", color, |s| s.red().bold())
    } else {
        paint("[clean]", color, |s| s.green())
    };
    format!(
        "{} {} (confidence {:.1}%, timing delta {} ms)",
        tag,
        verdict.technique,
        verdict.confidence * 100.0,
        verdict.timing_delta_ms
    )
}

fn paint(text: &str, color: bool, painter: fn(&str) -> ColoredString) -> String {
    if color {
        painter(text).to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
