// File: config_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#[cfg(test)]
mod tests {
    use crate::config::*;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::time::Duration;

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();

        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.insecure_tls, false);
        assert_eq!(config.method, "POST");
        assert_eq!(config.path, "/");
        assert_eq!(config.obfuscations, vec!["cow".to_string()]);
        assert_eq!(config.poison_prefix, "G");
        assert_eq!(config.max_response_bytes, 65536);
    }

    #[test]
    fn test_default_config_validates() {
        let mut config = ScanConfig::default();
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case(-0.5, 0.0)]
    #[case(0.0, 0.0)]
    #[case(0.75, 0.75)]
    #[case(1.0, 1.0)]
    #[case(7.0, 1.0)]
    fn test_threshold_clamped(#[case] input: f64, #[case] expected: f64) {
        let mut config = ScanConfig {
            confidence_threshold: input,
            ..ScanConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.confidence_threshold, expected);
    }

    #[test]
    fn test_nan_threshold_falls_back_to_default() {
        assert_eq!(clamp_threshold(f64::NAN), DEFAULT_CONFIDENCE_THRESHOLD);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = ScanConfig {
            read_timeout: Duration::ZERO,
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case("")]
    #[case("GG")]
    #[case("1")]
    fn test_invalid_poison_prefix(#[case] prefix: &str) {
        let mut config = ScanConfig {
            poison_prefix: prefix.to_string(),
            ..ScanConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_obfuscations_are_dropped() {
        let mut config = ScanConfig {
            obfuscations: vec!["cow".to_string(), "  ".to_string(), "x-chunked".to_string()],
            ..ScanConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.obfuscations, vec!["cow", "x-chunked"]);

        let mut empty = ScanConfig {
            obfuscations: vec![String::new()],
            ..ScanConfig::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_response_cap_clamped() {
        let mut config = ScanConfig {
            max_response_bytes: 10,
            ..ScanConfig::default()
        };
        config.validate().unwrap();
        assert_eq!(config.max_response_bytes, 1024);

        config.max_response_bytes = usize::MAX;
        config.validate().unwrap();
        assert_eq!(config.max_response_bytes, 1024 * 1024);
    }

    #[test]
    fn test_invalid_paths_and_methods() {
        let mut bad_path = ScanConfig {
            path: "admin".to_string(),
            ..ScanConfig::default()
        };
        assert!(bad_path.validate().is_err());

        let mut bad_method = ScanConfig {
            method: "get".to_string(),
            ..ScanConfig::default()
        };
        assert!(bad_method.validate().is_err());
    }
}
