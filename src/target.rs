// File: target.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ProbeError, ProbeResult};
use serde::Serialize;
use std::fmt;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Target {
    pub fn new(host: &str, port: u16, tls: bool) -> ProbeResult<Self> {
        validate_host(host)?;
        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    /// Accepts `scheme://host[:port][/path]`, `host:port` or a bare host.
    ///
    /// A bare `host:443` is treated as TLS. A bare host falls back to
    /// `default_port`, using TLS when `force_tls` is set or the port is 443.
    pub fn parse(raw: &str, default_port: u16, force_tls: bool) -> ProbeResult<Self> {
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() || raw.len() > 2048 {
            return Err(ProbeError::InvalidTarget("empty or oversized target".to_string()));
        }

        if raw.contains("://") {
            let parsed = Url::parse(raw)
                .map_err(|e| ProbeError::InvalidTarget(format!("{}: {}", raw, e)))?;
            let tls = match parsed.scheme() {
                "https" => true,
                "http" => false,
                other => {
                    return Err(ProbeError::InvalidTarget(format!(
                        "unsupported scheme '{}'",
                        other
                    )))
                }
            };
            let host = parsed
                .host_str()
                .ok_or_else(|| ProbeError::InvalidTarget(format!("no host in {}", raw)))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            let port = parsed
                .port_or_known_default()
                .unwrap_or(if tls { 443 } else { 80 });
            return Self::new(host, port, tls);
        }

        if let Some((host, port)) = raw.rsplit_once(':') {
            if !host.contains(':') {
                let port: u16 = port
                    .parse()
                    .map_err(|_| ProbeError::InvalidTarget(format!("invalid port in {}", raw)))?;
                return Self::new(host, port, port == 443 || force_tls);
            }
        }

        if force_tls || default_port == 443 {
            Self::new(raw, if force_tls && default_port == 80 { 443 } else { default_port }, true)
        } else {
            Self::new(raw, default_port, false)
        }
    }

    /// `host:port` form used to dial.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value for the `Host` header; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "https" } else { "http" };
        write!(f, "{}://{}", scheme, self.authority())
    }
}

fn validate_host(host: &str) -> ProbeResult<()> {
    if host.is_empty() {
        return Err(ProbeError::InvalidTarget("empty host".to_string()));
    }
    if host
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '@')
    {
        return Err(ProbeError::InvalidTarget(format!(
            "host contains invalid characters: {:?}",
            host
        )));
    }
    Ok(())
}
