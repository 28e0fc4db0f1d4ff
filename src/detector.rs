// File: detector.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::advisory::Assessment;
use crate::config::clamp_threshold;
use crate::probe::Technique;
use crate::response::{DecodedResponse, ResponseDiff};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

static UNRECOGNIZED_METHOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)unrecogni[sz]ed\s+method").unwrap());

const FASTER_CUTOFF_MS: i64 = -30;
const SLOWER_CUTOFF_MS: i64 = 1000;
const BODY_SHRINK_BYTES: i64 = -200;
const POISON_STATUS_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub description: String,
    pub weight: f64,
    /// Strong signals can justify a suspicious verdict on their own.
    pub strong: bool,
}

impl Signal {
    fn strong(description: impl Into<String>, weight: f64) -> Self {
        Self {
            description: description.into(),
            weight,
            strong: true,
        }
    }

    fn weak(description: impl Into<String>, weight: f64) -> Self {
        Self {
            description: description.into(),
            weight,
            strong: false,
        }
    }
}

/// Outcome of applying the gating rule to a set of fired signals.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub confidence: f64,
    pub suspicious: bool,
    pub signals: Vec<Signal>,
}

/// The single rule every weighted technique goes through: confidence is the
/// clamped sum of weights, and a verdict needs a strong signal plus a
/// confidence at or above the threshold.
pub fn evaluate(signals: Vec<Signal>, threshold: f64) -> Evaluation {
    // Summed in hundredths so 0.25 + 0.15 + 0.10 lands exactly on 0.5.
    let points: i64 = signals
        .iter()
        .map(|s| (s.weight * 100.0).round() as i64)
        .sum();
    let confidence = points.clamp(0, 100) as f64 / 100.0;
    let has_strong = signals.iter().any(|s| s.strong);

    Evaluation {
        confidence,
        suspicious: has_strong && confidence >= threshold,
        signals,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub technique: Technique,
    pub target: String,
    pub suspicious: bool,
    pub confidence: f64,
    pub signals: Vec<Signal>,
    pub rationale: String,
    pub timing_delta_ms: i64,
    pub payload_fingerprint: String,
    pub baseline: Arc<DecodedResponse>,
    pub test: DecodedResponse,
    pub assessment: Option<Assessment>,
}

impl Verdict {
    pub fn signal_descriptions(&self) -> Vec<&str> {
        self.signals.iter().map(|s| s.description.as_str()).collect()
    }

    /// Folds an external assessment into the verdict. Confidence only rises
    /// and a suspicious verdict is never cleared.
    pub fn merge_assessment(mut self, assessment: Assessment) -> Self {
        if assessment.confidence.is_finite() {
            let external = assessment.confidence.clamp(0.0, 1.0);
            if external > self.confidence {
                debug!(
                    "{}: advisory raised confidence {:.2} -> {:.2}",
                    self.technique, self.confidence, external
                );
                self.confidence = external;
            }
        }

        if assessment.is_vulnerable && !self.suspicious {
            debug!("{}: advisory upgraded verdict to suspicious", self.technique);
            self.suspicious = true;
        }

        if !assessment.reasoning.trim().is_empty() {
            self.rationale
                .push_str(&format!("\n\nAdvisory: {}", assessment.reasoning.trim()));
        }

        self.assessment = Some(assessment);
        self
    }
}

/// Stateless scorer. The only configuration is the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceDetector {
    threshold: f64,
}

impl Default for ConfidenceDetector {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl ConfidenceDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: clamp_threshold(threshold),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Signals fired by `diff` under the weighted table for `technique`.
    /// The poisoning technique has no weighted table and yields nothing here.
    pub fn signals(&self, technique: Technique, diff: &ResponseDiff) -> Vec<Signal> {
        let mut signals = match technique {
            Technique::ClTe | Technique::ObfuscatedTe => cl_te_signals(diff),
            Technique::TeCl => te_cl_signals(diff),
            Technique::MixedTe => mixed_te_signals(diff),
            Technique::Poisoning => return Vec::new(),
        };

        if let Some(anomaly) = diff.anomaly_introduced {
            signals.push(Signal::weak(
                format!("Malformed response ({})", anomaly.description()),
                0.0,
            ));
        }
        signals
    }

    pub fn score(&self, technique: Technique, diff: &ResponseDiff) -> Evaluation {
        evaluate(self.signals(technique, diff), self.threshold)
    }

    /// Diffs `test` against the shared baseline and scores it.
    pub fn analyze(
        &self,
        technique: Technique,
        target: &str,
        payload_fingerprint: &str,
        baseline: &Arc<DecodedResponse>,
        test: DecodedResponse,
    ) -> Verdict {
        let diff = ResponseDiff::compare(baseline, &test);
        let evaluation = self.score(technique, &diff);
        for signal in &evaluation.signals {
            debug!("{} signal: {}", technique, signal.description);
        }

        let rationale = self.rationale(technique, &evaluation);
        Verdict {
            technique,
            target: target.to_string(),
            suspicious: evaluation.suspicious,
            confidence: evaluation.confidence,
            signals: evaluation.signals,
            rationale,
            timing_delta_ms: diff.timing_delta_ms,
            payload_fingerprint: payload_fingerprint.to_string(),
            baseline: Arc::clone(baseline),
            test,
            assessment: None,
        }
    }

    /// Scores the follow-up response of the poisoning pair. A corrupted method
    /// echoed back is conclusive; a bare status change is weak evidence.
    pub fn analyze_poisoning(
        &self,
        target: &str,
        payload_fingerprint: &str,
        indicators: &[String],
        baseline: &Arc<DecodedResponse>,
        follow_up: DecodedResponse,
    ) -> Verdict {
        let mut signals = Vec::new();

        if let Some(token) = indicators
            .iter()
            .find(|token| follow_up.raw_contains_ignore_case(token))
        {
            signals.push(Signal::strong(
                format!("Response echoes corrupted method {}", token.to_uppercase()),
                1.0,
            ));
        } else if UNRECOGNIZED_METHOD.is_match(&String::from_utf8_lossy(&follow_up.raw)) {
            signals.push(Signal::strong(
                "Backend reported an unrecognized method",
                1.0,
            ));
        }

        if follow_up.status_code != baseline.status_code {
            signals.push(Signal::weak(
                format!(
                    "Follow-up status {} differs from baseline {}",
                    follow_up.status_code, baseline.status_code
                ),
                POISON_STATUS_WEIGHT,
            ));
        }

        let has_indicator = signals.iter().any(|s| s.strong);
        let confidence = if has_indicator {
            1.0
        } else if signals.is_empty() {
            0.0
        } else {
            POISON_STATUS_WEIGHT
        };
        let evaluation = Evaluation {
            confidence,
            suspicious: has_indicator || (!signals.is_empty() && confidence >= self.threshold),
            signals,
        };

        for signal in &evaluation.signals {
            debug!("{} signal: {}", Technique::Poisoning, signal.description);
        }

        let rationale = self.rationale(Technique::Poisoning, &evaluation);
        let timing_delta_ms = follow_up.timing_ms() - baseline.timing_ms();
        Verdict {
            technique: Technique::Poisoning,
            target: target.to_string(),
            suspicious: evaluation.suspicious,
            confidence: evaluation.confidence,
            signals: evaluation.signals,
            rationale,
            timing_delta_ms,
            payload_fingerprint: payload_fingerprint.to_string(),
            baseline: Arc::clone(baseline),
            test: follow_up,
            assessment: None,
        }
    }

    fn rationale(&self, technique: Technique, evaluation: &Evaluation) -> String {
        let mut text = if evaluation.suspicious {
            format!(
                "Potential {} vulnerability detected (confidence: {:.1}%)",
                technique,
                evaluation.confidence * 100.0
            )
        } else if evaluation.confidence >= self.threshold && !evaluation.signals.is_empty() {
            format!(
                "Insufficient evidence: no strong signal (confidence: {:.1}%, threshold: {:.1}%)",
                evaluation.confidence * 100.0,
                self.threshold * 100.0
            )
        } else {
            format!(
                "Insufficient evidence (confidence: {:.1}% < {:.1}%)",
                evaluation.confidence * 100.0,
                self.threshold * 100.0
            )
        };

        if !evaluation.signals.is_empty() {
            text.push_str("\nDetection signals:");
            for signal in &evaluation.signals {
                text.push_str(&format!("\n  - {}", signal.description));
            }
        }

        if evaluation.suspicious {
            text.push_str(&format!("\n\nTechnique: {}", technique.explanation()));
        }
        text
    }
}

fn status_signals(
    diff: &ResponseDiff,
    bad_request: (&str, f64),
    server_error: (&str, f64),
) -> Vec<Signal> {
    let mut signals = Vec::new();
    if diff.status_changed && diff.new_status == 400 {
        signals.push(Signal::strong(bad_request.0, bad_request.1));
    }
    if diff.status_changed && diff.new_status >= 500 {
        signals.push(Signal::strong(server_error.0, server_error.1));
    }
    signals
}

fn connection_closed(diff: &ResponseDiff) -> bool {
    diff.connection_changed && diff.new_connection_closed
}

fn cl_te_signals(diff: &ResponseDiff) -> Vec<Signal> {
    let mut signals = status_signals(
        diff,
        ("Backend returned 400 (malformed request detection)", 0.25),
        ("Backend returned 5xx error (possible parser confusion)", 0.35),
    );

    if diff.timing_delta_ms <= FASTER_CUTOFF_MS {
        signals.push(Signal::weak(
            format!(
                "Response {} ms faster (possible early rejection)",
                -diff.timing_delta_ms
            ),
            0.15,
        ));
    }

    if connection_closed(diff) {
        signals.push(Signal::strong(
            "Server closed connection (possible state confusion)",
            0.20,
        ));
    }

    // A different status already explains a different body size.
    if diff.body_changed && !diff.status_changed && diff.body_size_delta <= BODY_SHRINK_BYTES {
        signals.push(Signal::weak(
            format!(
                "Response body {} bytes smaller (possible content absorption)",
                -diff.body_size_delta
            ),
            0.15,
        ));
    }

    if diff.headers_removed.contains_key("transfer-encoding") {
        signals.push(Signal::weak(
            "Transfer-Encoding header removed by backend",
            0.10,
        ));
    }
    signals
}

fn te_cl_signals(diff: &ResponseDiff) -> Vec<Signal> {
    let mut signals = status_signals(
        diff,
        ("Backend returned 400 (parsing error)", 0.25),
        ("Backend returned 5xx error (server confusion)", 0.35),
    );

    if diff.timing_delta_ms > SLOWER_CUTOFF_MS {
        signals.push(Signal::weak(
            format!(
                "Response {} ms slower (possible chunk reassembly delay)",
                diff.timing_delta_ms
            ),
            0.25,
        ));
    }

    if connection_closed(diff) {
        signals.push(Signal::strong(
            "Server closed connection (chunked parsing failure)",
            0.20,
        ));
    }

    if diff.body_changed {
        signals.push(Signal::weak(
            format!("Response body changed by {} bytes", diff.body_size_delta),
            0.10,
        ));
    }

    if diff.headers_added.contains_key("content-length") {
        signals.push(Signal::weak("Content-Length header added by backend", 0.10));
    }
    signals
}

fn mixed_te_signals(diff: &ResponseDiff) -> Vec<Signal> {
    let mut signals = status_signals(
        diff,
        ("Backend rejected mixed TE header", 0.30),
        ("Server error from TE header ambiguity", 0.40),
    );
    if connection_closed(diff) {
        signals.push(Signal::strong("Connection reset (TE parser confusion)", 0.20));
    }
    signals
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
