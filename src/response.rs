// File: response.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Why a status line could not be read cleanly. Recorded, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecodeAnomaly {
    EmptyResponse,
    MissingStatusCode,
    NonNumericStatusCode,
    MissingHeaderTerminator,
}

impl DecodeAnomaly {
    pub fn description(&self) -> &'static str {
        match self {
            Self::EmptyResponse => "empty response",
            Self::MissingStatusCode => "status line has no status code",
            Self::NonNumericStatusCode => "status code is not numeric",
            Self::MissingHeaderTerminator => "header block is not terminated",
        }
    }
}

/// Response headers in arrival order. Names keep their case; lookups ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value wins on duplicate names; the newest spelling of the name is kept.
    pub fn insert(&mut self, name: &str, value: &str) {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => *entry = (name.to_string(), value.to_string()),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn lowercased(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedResponse {
    pub status_code: u16,
    pub headers: Headers,
    #[serde(serialize_with = "serialize_lossy")]
    pub body: Vec<u8>,
    #[serde(serialize_with = "serialize_lossy")]
    pub raw: Vec<u8>,
    #[serde(serialize_with = "serialize_millis")]
    pub timing: Duration,
    pub connection_closed: bool,
    pub anomaly: Option<DecodeAnomaly>,
}

impl DecodedResponse {
    /// Decodes raw response bytes. Never fails: a malformed status line leaves
    /// the status code at zero and records the anomaly.
    pub fn decode(raw: &[u8], timing: Duration, connection_closed: bool) -> Self {
        let mut response = Self {
            status_code: 0,
            headers: Headers::new(),
            body: Vec::new(),
            raw: raw.to_vec(),
            timing,
            connection_closed,
            anomaly: None,
        };

        if raw.is_empty() {
            response.anomaly = Some(DecodeAnomaly::EmptyResponse);
            return response;
        }

        let mut cursor = 0;
        let status_line = match next_line(raw, &mut cursor) {
            Some(line) => line,
            None => {
                response.anomaly = Some(DecodeAnomaly::MissingHeaderTerminator);
                raw
            }
        };

        let status_text = String::from_utf8_lossy(status_line);
        match status_text.split_whitespace().nth(1) {
            Some(token) => match token.parse::<u16>() {
                Ok(code) => response.status_code = code,
                Err(_) => response.anomaly = Some(DecodeAnomaly::NonNumericStatusCode),
            },
            None => {
                if response.anomaly.is_none() {
                    response.anomaly = Some(DecodeAnomaly::MissingStatusCode);
                }
            }
        }

        if cursor == 0 {
            return response;
        }

        loop {
            let line = match next_line(raw, &mut cursor) {
                Some(line) => line,
                None => {
                    if response.anomaly.is_none() {
                        response.anomaly = Some(DecodeAnomaly::MissingHeaderTerminator);
                    }
                    return response;
                }
            };

            if line.is_empty() {
                break;
            }

            let text = String::from_utf8_lossy(line);
            if let Some(colon) = text.find(':') {
                if colon > 0 {
                    let name = text[..colon].trim();
                    let value = text[colon + 1..].trim();
                    response.headers.insert(name, value);
                }
            }
        }

        response.body = raw[cursor..].to_vec();
        response
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn timing_ms(&self) -> i64 {
        self.timing.as_millis() as i64
    }

    /// True when the raw bytes contain `needle`, ignoring ASCII case.
    pub fn raw_contains_ignore_case(&self, needle: &str) -> bool {
        let needle = needle.as_bytes();
        if needle.is_empty() || needle.len() > self.raw.len() {
            return needle.is_empty();
        }
        self.raw
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
    }
}

/// Returns the next CRLF-terminated line and advances `cursor` past the CRLF.
fn next_line<'a>(raw: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let rest = &raw[*cursor..];
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    let line = &rest[..end];
    *cursor += end + 2;
    Some(line)
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Read-only comparison of a test response against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseDiff {
    pub status_changed: bool,
    pub old_status: u16,
    pub new_status: u16,
    pub timing_delta_ms: i64,
    pub connection_changed: bool,
    pub old_connection_closed: bool,
    pub new_connection_closed: bool,
    pub headers_added: BTreeMap<String, String>,
    pub headers_removed: BTreeMap<String, String>,
    pub headers_modified: BTreeMap<String, String>,
    pub body_size_delta: i64,
    pub body_changed: bool,
    pub anomaly_introduced: Option<DecodeAnomaly>,
    pub changes: Vec<String>,
}

impl ResponseDiff {
    pub fn compare(baseline: &DecodedResponse, test: &DecodedResponse) -> Self {
        let mut changes = Vec::new();

        let status_changed = baseline.status_code != test.status_code;
        if status_changed {
            changes.push(format!(
                "Status code changed: {} -> {}",
                baseline.status_code, test.status_code
            ));
        }

        let timing_delta_ms = test.timing_ms() - baseline.timing_ms();
        if baseline.timing_ms() > 0 && timing_delta_ms.abs() > 100 {
            changes.push(format!(
                "Timing changed: {} ms -> {} ms (diff: {} ms)",
                baseline.timing_ms(),
                test.timing_ms(),
                timing_delta_ms
            ));
        }

        let connection_changed = baseline.connection_closed != test.connection_closed;
        if connection_changed {
            changes.push(format!(
                "Connection behavior changed: closed={} -> closed={}",
                baseline.connection_closed, test.connection_closed
            ));
        }

        let base_headers = baseline.headers.lowercased();
        let test_headers = test.headers.lowercased();
        let mut headers_added = BTreeMap::new();
        let mut headers_removed = BTreeMap::new();
        let mut headers_modified = BTreeMap::new();

        for (name, base_value) in &base_headers {
            match test_headers.get(name) {
                None => {
                    headers_removed.insert(name.clone(), base_value.clone());
                }
                Some(test_value) if test_value != base_value => {
                    headers_modified.insert(name.clone(), test_value.clone());
                }
                Some(_) => {}
            }
        }
        for (name, test_value) in &test_headers {
            if !base_headers.contains_key(name) {
                headers_added.insert(name.clone(), test_value.clone());
            }
        }

        for (label, set) in [
            ("added", &headers_added),
            ("removed", &headers_removed),
            ("modified", &headers_modified),
        ] {
            if !set.is_empty() {
                let names: Vec<&str> = set.keys().map(String::as_str).collect();
                changes.push(format!("Headers {}: {}", label, names.join(", ")));
            }
        }

        let body_changed = baseline.body != test.body;
        let body_size_delta = test.body.len() as i64 - baseline.body.len() as i64;
        if body_changed {
            changes.push(format!(
                "Body changed: {} bytes -> {} bytes (diff: {})",
                baseline.body.len(),
                test.body.len(),
                body_size_delta
            ));
        }

        let anomaly_introduced = match (baseline.anomaly, test.anomaly) {
            (None, Some(anomaly)) => {
                changes.push(format!("Response malformed: {}", anomaly.description()));
                Some(anomaly)
            }
            _ => None,
        };

        Self {
            status_changed,
            old_status: baseline.status_code,
            new_status: test.status_code,
            timing_delta_ms,
            connection_changed,
            old_connection_closed: baseline.connection_closed,
            new_connection_closed: test.connection_closed,
            headers_added,
            headers_removed,
            headers_modified,
            body_size_delta,
            body_changed,
            anomaly_introduced,
            changes,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.changes.is_empty() {
            return "No differences detected".to_string();
        }
        let mut out = format!("Found {} differences:\n", self.changes.len());
        for (i, change) in self.changes.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, change));
        }
        out
    }
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod tests;
