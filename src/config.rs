// File: config.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ProbeError, ProbeResult};
use log::warn;
use std::time::Duration;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
const MIN_RESPONSE_BYTES: usize = 1024;
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    pub insecure_tls: bool,
    pub confidence_threshold: f64,
    pub method: String,
    pub path: String,
    pub extra_headers: Vec<(String, String)>,
    pub smuggled_path: String,
    pub obfuscations: Vec<String>,
    pub mixed_te_values: (String, String),
    pub poison_prefix: String,
    pub probe_method_after_poison: String,
    pub max_response_bytes: usize,
    pub probe_delay: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            insecure_tls: false,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            method: "POST".to_string(),
            path: "/".to_string(),
            extra_headers: Vec::new(),
            smuggled_path: "/admin".to_string(),
            obfuscations: vec!["cow".to_string()],
            mixed_te_values: ("identity".to_string(), "chunked".to_string()),
            poison_prefix: "G".to_string(),
            probe_method_after_poison: "POST".to_string(),
            max_response_bytes: 65536,
            probe_delay: Duration::from_millis(50),
        }
    }
}

impl ScanConfig {
    /// Clamps soft limits and rejects values that would produce a broken probe.
    pub fn validate(&mut self) -> ProbeResult<()> {
        if self.connect_timeout.is_zero()
            || self.write_timeout.is_zero()
            || self.read_timeout.is_zero()
        {
            return Err(ProbeError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            warn!(
                "Confidence threshold {} outside [0, 1], clamping",
                self.confidence_threshold
            );
        }
        self.confidence_threshold = clamp_threshold(self.confidence_threshold);

        if self.method.is_empty() || !self.method.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ProbeError::Configuration(format!(
                "invalid request method '{}'",
                self.method
            )));
        }

        if !self.path.starts_with('/') || self.path.contains(char::is_whitespace) {
            return Err(ProbeError::Configuration(format!(
                "invalid request path '{}'",
                self.path
            )));
        }

        if !self.smuggled_path.starts_with('/') || self.smuggled_path.contains(char::is_whitespace)
        {
            return Err(ProbeError::Configuration(format!(
                "invalid smuggled path '{}'",
                self.smuggled_path
            )));
        }

        if self.obfuscations.iter().all(|o| o.trim().is_empty()) {
            return Err(ProbeError::Configuration(
                "at least one Transfer-Encoding obfuscation value is required".to_string(),
            ));
        }
        self.obfuscations.retain(|o| !o.trim().is_empty());

        if self.poison_prefix.len() != 1
            || !self.poison_prefix.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(ProbeError::Configuration(
                "poison prefix must be a single ASCII letter".to_string(),
            ));
        }

        if self.probe_method_after_poison.is_empty()
            || !self
                .probe_method_after_poison
                .chars()
                .all(|c| c.is_ascii_uppercase())
        {
            return Err(ProbeError::Configuration(format!(
                "invalid follow-up method '{}'",
                self.probe_method_after_poison
            )));
        }

        self.max_response_bytes = self
            .max_response_bytes
            .clamp(MIN_RESPONSE_BYTES, MAX_RESPONSE_BYTES);

        Ok(())
    }
}

/// NaN maps to the default; everything else is clamped into [0, 1].
pub fn clamp_threshold(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_CONFIDENCE_THRESHOLD
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
