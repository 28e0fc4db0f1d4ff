// File: response_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#[cfg(test)]
mod tests {
    use crate::response::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const OK_RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\nhello world";

    fn decode(raw: &[u8]) -> DecodedResponse {
        DecodedResponse::decode(raw, Duration::from_millis(50), true)
    }

    #[test]
    fn test_decode_status_headers_body() {
        let response = decode(OK_RESPONSE);
        assert_eq!(response.status_code, 200);
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header("TRANSFER-ENCODING"), Some("chunked"));
        assert_eq!(response.body, b"hello world".to_vec());
        assert_eq!(response.anomaly, None);
        assert!(response.connection_closed);
    }

    #[test]
    fn test_header_case_preserved_on_store() {
        let response = decode(OK_RESPONSE);
        let names: Vec<&str> = response.headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Content-Type", "Transfer-Encoding"]);
    }

    #[test]
    fn test_duplicate_header_last_value_wins() {
        let response = decode(b"HTTP/1.1 200 OK\r\nX-A: 1\r\nx-a: 2\r\n\r\n");
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.header("X-A"), Some("2"));
    }

    #[test]
    fn test_body_is_verbatim() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let response = decode(raw);
        assert_eq!(response.body, b"5\r\nhello\r\n0\r\n\r\n".to_vec());
    }

    #[test]
    fn test_non_numeric_status_is_anomaly_not_error() {
        let response = decode(b"HTTP/1.1 abc Weird\r\n\r\n");
        assert_eq!(response.status_code, 0);
        assert_eq!(response.anomaly, Some(DecodeAnomaly::NonNumericStatusCode));
    }

    #[test]
    fn test_missing_status_token() {
        let response = decode(b"garbage\r\n\r\n");
        assert_eq!(response.status_code, 0);
        assert_eq!(response.anomaly, Some(DecodeAnomaly::MissingStatusCode));
    }

    #[test]
    fn test_empty_and_truncated_responses() {
        assert_eq!(decode(b"").anomaly, Some(DecodeAnomaly::EmptyResponse));

        let truncated = decode(b"HTTP/1.1 502 Bad Gateway\r\nServer: x");
        assert_eq!(truncated.status_code, 502);
        assert_eq!(
            truncated.anomaly,
            Some(DecodeAnomaly::MissingHeaderTerminator)
        );
    }

    #[test]
    fn test_decode_is_idempotent() {
        let first = decode(OK_RESPONSE);
        let second = decode(OK_RESPONSE);
        assert_eq!(first, second);
    }

    #[test]
    fn test_raw_contains_ignore_case() {
        let response = decode(b"HTTP/1.1 403 Forbidden\r\n\r\nUnrecognized method GPOST");
        assert!(response.raw_contains_ignore_case("gpost"));
        assert!(response.raw_contains_ignore_case("UNRECOGNIZED METHOD"));
        assert!(!response.raw_contains_ignore_case("GGET"));
    }

    #[test]
    fn test_identical_responses_have_no_changes() {
        let a = decode(OK_RESPONSE);
        let b = decode(OK_RESPONSE);
        let diff = ResponseDiff::compare(&a, &b);
        assert!(!diff.has_changes());
        assert_eq!(diff.summary(), "No differences detected");
    }

    #[test]
    fn test_diff_tracks_every_dimension() {
        let baseline = DecodedResponse::decode(
            b"HTTP/1.1 200 OK\r\nServer: nginx\r\nTransfer-Encoding: chunked\r\nX-Id: 1\r\n\r\n0123456789",
            Duration::from_millis(50),
            false,
        );
        let test = DecodedResponse::decode(
            b"HTTP/1.1 400 Bad Request\r\nserver: nginx\r\nContent-Length: 3\r\nX-Id: 2\r\n\r\nbad",
            Duration::from_millis(10),
            true,
        );

        let diff = ResponseDiff::compare(&baseline, &test);
        assert!(diff.status_changed);
        assert_eq!((diff.old_status, diff.new_status), (200, 400));
        assert_eq!(diff.timing_delta_ms, -40);
        assert!(diff.connection_changed);
        assert!(diff.new_connection_closed);
        assert!(diff.headers_removed.contains_key("transfer-encoding"));
        assert!(diff.headers_added.contains_key("content-length"));
        assert_eq!(diff.headers_modified.get("x-id").map(String::as_str), Some("2"));
        assert!(!diff.headers_modified.contains_key("server"));
        assert!(diff.body_changed);
        assert_eq!(diff.body_size_delta, -7);
        assert!(diff.summary().starts_with("Found "));
    }

    #[test]
    fn test_anomaly_only_reported_when_introduced() {
        let clean = decode(OK_RESPONSE);
        let broken = decode(b"\x00\x01garbage");

        let diff = ResponseDiff::compare(&clean, &broken);
        assert!(diff.anomaly_introduced.is_some());

        let reverse = ResponseDiff::compare(&broken, &clean);
        assert_eq!(reverse.anomaly_introduced, None);
    }
}
