// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::bool_assert_comparison)]
#![allow(clippy::useless_vec)]

pub mod advisory;
pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod response;
pub mod target;
pub mod transport;

pub use config::ScanConfig;
pub use detector::{ConfidenceDetector, Verdict};
pub use error::{ProbeError, ProbeResult};
pub use orchestrator::{ProbeOrchestrator, ScanOutcome, ScanReport};
pub use probe::{ProbeBuilder, Technique};
pub use response::{DecodedResponse, ResponseDiff};
pub use target::Target;
pub use transport::{RawTransport, Transport, TransportSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        let _ = ScanConfig::default();
        let _ = ConfidenceDetector::default();
        let _ = ProbeBuilder::new("localhost");
        let _ = Target::new("localhost", 80, false);
        assert_eq!(Technique::ALL.len(), 5);
    }
}
