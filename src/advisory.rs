// File: advisory.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::probe::Technique;
use crate::response::DecodedResponse;
use futures::future::BoxFuture;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama2";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The shape of one response as the advisory sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponseSummary {
    pub status: u16,
    pub body_len: usize,
    pub timing_ms: i64,
    pub header_count: usize,
}

impl From<&DecodedResponse> for ResponseSummary {
    fn from(response: &DecodedResponse) -> Self {
        Self {
            status: response.status_code,
            body_len: response.body.len(),
            timing_ms: response.timing_ms(),
            header_count: response.headers.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdvisoryRequest {
    pub technique: Technique,
    pub baseline: ResponseSummary,
    pub test: ResponseSummary,
}

impl AdvisoryRequest {
    pub fn new(technique: Technique, baseline: &DecodedResponse, test: &DecodedResponse) -> Self {
        Self {
            technique,
            baseline: baseline.into(),
            test: test.into(),
        }
    }

    fn prompt(&self) -> String {
        format!(
            "You are a security expert analyzing HTTP responses for request smuggling vulnerabilities.\n\n\
             Test Type: {}\n\
             Baseline: Status={}, Body={} bytes, Time={} ms, Headers={}\n\
             Test Response: Status={}, Body={} bytes, Time={} ms, Headers={}\n\n\
             Output ONLY this exact JSON format (no markdown, no code blocks, no explanation, no comments):\n\
             {{\"is_vulnerable\": true, \"confidence\": 0.75, \"reasoning\": \"Explanation here\", \
             \"suspicious_signals\": [\"signal1\"], \"recommendations\": [\"action1\"]}}",
            self.technique,
            self.baseline.status,
            self.baseline.body_len,
            self.baseline.timing_ms,
            self.baseline.header_count,
            self.test.status,
            self.test.body_len,
            self.test.timing_ms,
            self.test.header_count,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(default)]
    pub is_vulnerable: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, alias = "suspicious_signals")]
    pub signals: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug)]
pub enum AdvisoryError {
    Disabled(String),
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
}

impl fmt::Display for AdvisoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled(msg) => write!(f, "Advisory unavailable: {}", msg),
            Self::Http(msg) => write!(f, "Advisory request failed: {}", msg),
            Self::Api { status, body } => write!(f, "Advisory API error {}: {}", status, body),
            Self::Parse(msg) => write!(f, "Advisory output unparseable: {}", msg),
        }
    }
}

impl std::error::Error for AdvisoryError {}

impl From<reqwest::Error> for AdvisoryError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

/// External second opinion consulted after a verdict exists.
pub trait Advisory: Send + Sync {
    fn name(&self) -> String;

    fn assess<'a>(
        &'a self,
        request: &'a AdvisoryRequest,
    ) -> BoxFuture<'a, Result<Assessment, AdvisoryError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisoryBackend {
    Ollama { endpoint: String, model: String },
    OpenAi { endpoint: String, model: String, api_key: String },
}

pub struct LlmAdvisory {
    backend: AdvisoryBackend,
    client: reqwest::Client,
}

impl LlmAdvisory {
    pub fn ollama(endpoint: Option<&str>, model: Option<&str>) -> Result<Self, AdvisoryError> {
        let endpoint = endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(DEFAULT_OLLAMA_ENDPOINT);
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_OLLAMA_MODEL);
        Self::with_backend(AdvisoryBackend::Ollama {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn openai(api_key: &str, endpoint: Option<&str>) -> Result<Self, AdvisoryError> {
        if api_key.trim().is_empty() {
            return Err(AdvisoryError::Disabled(
                "missing OpenAI API key (use --api-key or OPENAI_API_KEY)".to_string(),
            ));
        }
        let endpoint = endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or(DEFAULT_OPENAI_ENDPOINT);
        Self::with_backend(AdvisoryBackend::OpenAi {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    fn with_backend(backend: AdvisoryBackend) -> Result<Self, AdvisoryError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { backend, client })
    }

    pub fn backend(&self) -> &AdvisoryBackend {
        &self.backend
    }

    async fn complete(&self, prompt: &str) -> Result<String, AdvisoryError> {
        match &self.backend {
            AdvisoryBackend::Ollama { endpoint, model } => {
                let url = format!("{}/api/generate", endpoint);
                debug!("Querying Ollama at {}", url);
                let response = self
                    .client
                    .post(&url)
                    .json(&json!({ "model": model, "prompt": prompt, "stream": false }))
                    .send()
                    .await
                    .map_err(|e| {
                        AdvisoryError::Http(format!(
                            "failed to connect to Ollama at {}: {}",
                            endpoint, e
                        ))
                    })?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(AdvisoryError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }

                let reply: OllamaReply = response
                    .json()
                    .await
                    .map_err(|e| AdvisoryError::Parse(e.to_string()))?;
                match reply.error {
                    Some(error) if !error.is_empty() => Err(AdvisoryError::Api {
                        status: status.as_u16(),
                        body: error,
                    }),
                    _ => Ok(reply.response),
                }
            }
            AdvisoryBackend::OpenAi {
                endpoint,
                model,
                api_key,
            } => {
                let url = format!("{}/v1/chat/completions", endpoint);
                debug!("Querying OpenAI-compatible endpoint {}", url);
                let response = self
                    .client
                    .post(&url)
                    .bearer_auth(api_key)
                    .json(&json!({
                        "model": model,
                        "messages": [
                            { "role": "system", "content": "You are a security analyst. Respond with valid JSON only." },
                            { "role": "user", "content": prompt }
                        ],
                        "temperature": 0.3,
                        "max_tokens": 700
                    }))
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(AdvisoryError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }

                let reply: ChatReply = response
                    .json()
                    .await
                    .map_err(|e| AdvisoryError::Parse(e.to_string()))?;
                reply
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| AdvisoryError::Parse("no completion returned".to_string()))
            }
        }
    }

    async fn assess_request(&self, request: &AdvisoryRequest) -> Result<Assessment, AdvisoryError> {
        let content = self.complete(&request.prompt()).await?;
        trace!("Advisory raw output: {}", content);
        parse_assessment(&content)
    }
}

impl Advisory for LlmAdvisory {
    fn name(&self) -> String {
        match &self.backend {
            AdvisoryBackend::Ollama { model, .. } => format!("Ollama ({})", model),
            AdvisoryBackend::OpenAi { model, .. } => format!("OpenAI ({})", model),
        }
    }

    fn assess<'a>(
        &'a self,
        request: &'a AdvisoryRequest,
    ) -> BoxFuture<'a, Result<Assessment, AdvisoryError>> {
        Box::pin(self.assess_request(request))
    }
}

#[derive(Deserialize)]
struct OllamaReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Pulls the first JSON object out of model output and parses it.
pub fn parse_assessment(content: &str) -> Result<Assessment, AdvisoryError> {
    let start = content.find('{').ok_or_else(|| {
        AdvisoryError::Parse(format!("no JSON object in output: {}", content.trim()))
    })?;
    let candidate = strip_code_fence(&content[start..]);
    let cleaned = cleanup_json(candidate);
    serde_json::from_str(&cleaned).map_err(|e| AdvisoryError::Parse(format!("{}: {}", e, cleaned)))
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    match text.rfind("```") {
        Some(end) => text[..end].trim_end(),
        None => text,
    }
}

/// Drops `//` and `/* */` comments and trailing commas outside string literals.
pub fn cleanup_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
