// File: report_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#[cfg(test)]
mod tests {
    use crate::advisory::Assessment;
    use crate::detector::{ConfidenceDetector, Verdict};
    use crate::error::ProbeError;
    use crate::orchestrator::{ScanOutcome, ScanReport};
    use crate::probe::Technique;
    use crate::report::*;
    use crate::response::DecodedResponse;
    use serde_json::Value;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const TARGET: &str = "http://lab.local:80";

    fn response(raw: &str, ms: u64, closed: bool) -> DecodedResponse {
        DecodedResponse::decode(raw.as_bytes(), Duration::from_millis(ms), closed)
    }

    fn create_test_verdicts() -> Vec<Verdict> {
        let baseline = Arc::new(response(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nhello",
            50,
            false,
        ));
        let detector = ConfidenceDetector::default();
        vec![
            detector.analyze(
                Technique::ClTe,
                TARGET,
                "aa11",
                &baseline,
                response("HTTP/1.1 502 Bad Gateway\r\n\r\n", 10, true),
            ),
            detector.analyze(
                Technique::TeCl,
                TARGET,
                "bb22",
                &baseline,
                (*baseline).clone(),
            ),
        ]
    }

    fn create_outcome(error: Option<ProbeError>) -> ScanOutcome {
        let verdicts = create_test_verdicts();
        ScanOutcome {
            report: ScanReport::from_verdicts(TARGET, &verdicts),
            verdicts,
            error,
        }
    }

    fn create_temp_file(name: &str) -> (TempDir, String) {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join(name).to_string_lossy().to_string();
        (temp_dir, file_path)
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("text".parse::<ReportFormat>(), Ok(ReportFormat::Text));
        assert_eq!("JSONL".parse::<ReportFormat>(), Ok(ReportFormat::JsonLines));
        assert!("html".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_text_report_plain() {
        let text = ReportGenerator::render_text(&create_outcome(None), false);
        assert!(text.contains("Target: http://lab.local:80"));
        assert!(text.contains("Probes run: 2 | Suspicious: 1"));
        assert!(text.contains("Most likely technique: CL.TE (confidence 80.0%)"));
        assert!(text.contains("[SUSPICIOUS] CL.TE"));
        assert!(text.contains("[clean] TE.CL"));
        assert!(text.contains("    - Backend returned 5xx error (possible parser confusion)"));
        assert!(!text.contains("\u{1b}["));
    }

    #[test]
    fn test_text_report_lists_response_differences() {
        let text = ReportGenerator::render_text(&create_outcome(None), false);
        assert_eq!(text.matches("Found ").count(), 1);
        assert!(text.contains("    Found ") && text.contains(" differences:"));
        assert!(text.contains("      1. Status code changed: 200 -> 502"));
        assert!(text.contains("Connection behavior changed: closed=false -> closed=true"));
    }

    #[test]
    fn test_text_report_notes_abort() {
        let outcome = create_outcome(Some(ProbeError::Cancelled));
        let text = ReportGenerator::render_text(&outcome, false);
        assert!(text.contains("Scan aborted: Scan cancelled"));
    }

    #[test]
    fn test_text_report_lists_recommendations() {
        let mut outcome = create_outcome(None);
        let verdict = outcome.verdicts.remove(1);
        outcome.verdicts.push(verdict.merge_assessment(Assessment {
            recommendations: vec!["Normalize TE handling".to_string()],
            ..Assessment::default()
        }));
        let text = ReportGenerator::render_text(&outcome, false);
        assert!(text.contains("    -> Normalize TE handling"));
    }

    #[test]
    fn test_json_lines_report() {
        let rendered = ReportGenerator::render_json_lines(&create_outcome(None)).unwrap();
        let lines: Vec<Value> = rendered
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "verdict");
        assert_eq!(lines[0]["technique"], "CL.TE");
        assert_eq!(lines[0]["suspicious"], true);
        assert_eq!(lines[0]["payload_fingerprint"], "aa11");
        assert_eq!(lines[0]["test_status"], 502);
        assert_eq!(lines[1]["technique"], "TE.CL");
        assert_eq!(lines[1]["assessment"], Value::Null);

        let summary = &lines[2];
        assert_eq!(summary["kind"], "summary");
        assert_eq!(summary["total_probes"], 2);
        assert_eq!(summary["most_likely"], "CL.TE");
        assert_eq!(summary["completed"], true);
        let timestamp = summary["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_json_lines_summary_carries_error() {
        let outcome = create_outcome(Some(ProbeError::connect("lab.local:80", "refused")));
        let rendered = ReportGenerator::render_json_lines(&outcome).unwrap();
        let summary: Value = serde_json::from_str(rendered.lines().last().unwrap()).unwrap();
        assert_eq!(summary["completed"], false);
        assert_eq!(summary["error"], "Failed to connect to lab.local:80: refused");
    }

    #[test]
    fn test_write_to_file_text() {
        let (_temp_dir, file_path) = create_temp_file("report.txt");
        let outcomes = vec![create_outcome(None), create_outcome(None)];

        ReportGenerator::write_to_file(&outcomes, &file_path, ReportFormat::Text).unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.matches("Target: http://lab.local:80").count(), 2);
        assert!(!content.contains("\u{1b}["));
    }

    #[test]
    fn test_write_to_file_json_lines() {
        let (_temp_dir, file_path) = create_temp_file("report.jsonl");

        ReportGenerator::write_to_file(&[create_outcome(None)], &file_path, ReportFormat::JsonLines)
            .unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content.lines().count(), 3);
        for line in content.lines() {
            assert!(serde_json::from_str::<Value>(line).is_ok());
        }
    }

    #[test]
    fn test_write_to_invalid_path() {
        let result = ReportGenerator::write_to_file(
            &[create_outcome(None)],
            "/nonexistent/directory/report.txt",
            ReportFormat::Text,
        );
        assert!(result.is_err());
    }
}
