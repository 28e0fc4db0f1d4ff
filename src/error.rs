// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

/// Failures that stop a probe before or during network I/O.
///
/// Decode problems are deliberately absent: a response that does not parse
/// is evidence and travels as data on [`crate::response::DecodedResponse`].
#[derive(Debug)]
pub enum ProbeError {
    InvalidTarget(String),
    Connect {
        target: String,
        reason: String,
        source: Option<std::io::Error>,
    },
    Transmission {
        target: String,
        reason: String,
        source: Option<std::io::Error>,
    },
    MalformedInput(String),
    Configuration(String),
    Cancelled,
}

impl ProbeError {
    pub fn connect(target: &str, reason: impl Into<String>) -> Self {
        Self::Connect {
            target: target.to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn connect_io(target: &str, error: std::io::Error) -> Self {
        Self::Connect {
            target: target.to_string(),
            reason: error.to_string(),
            source: Some(error),
        }
    }

    pub fn transmission(target: &str, reason: impl Into<String>) -> Self {
        Self::Transmission {
            target: target.to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn transmission_io(target: &str, error: std::io::Error) -> Self {
        Self::Transmission {
            target: target.to_string(),
            reason: error.to_string(),
            source: Some(error),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
            Self::Connect { target, reason, .. } => {
                write!(f, "Failed to connect to {}: {}", target, reason)
            }
            Self::Transmission { target, reason, .. } => {
                write!(f, "Failed to send request to {}: {}", target, reason)
            }
            Self::MalformedInput(msg) => write!(f, "Malformed probe input: {}", msg),
            Self::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            Self::Cancelled => write!(f, "Scan cancelled"),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } | Self::Transmission { source, .. } => source
                .as_ref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
