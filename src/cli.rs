// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::advisory::{Advisory, AdvisoryError, LlmAdvisory};
use crate::config::ScanConfig;
use crate::error::ProbeError;
use crate::orchestrator::{ProbeOrchestrator, ScanOutcome};
use crate::report::{ReportFormat, ReportGenerator};
use crate::target::Target;
use crate::transport::{RawTransport, TransportSettings};
use clap::{Parser, ValueEnum};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AiBackend {
    Ollama,
    Openai,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// Targets as URLs, host:port or bare hosts
    #[arg(value_name = "TARGET")]
    pub positional: Vec<String>,

    #[arg(short = 't', long = "target")]
    pub target: Option<String>,

    #[arg(long = "targets", value_delimiter = ',')]
    pub targets: Vec<String>,

    #[arg(short = 'i', long = "input-file")]
    pub input_file: Option<String>,

    #[arg(short = 'p', long = "port", default_value_t = 443)]
    pub port: u16,

    #[arg(long = "https", help = "Force TLS for targets without a scheme")]
    pub https: bool,

    #[arg(
        short = 'k',
        long = "insecure",
        help = "Skip TLS certificate validation (lab targets only)"
    )]
    pub insecure: bool,

    #[arg(short = 'c', long = "confidence", default_value_t = 0.5)]
    pub confidence: f64,

    #[arg(long = "method", default_value = "POST")]
    pub method: String,

    #[arg(long = "path", default_value = "/")]
    pub path: String,

    #[arg(short = 'H', long = "header", help = "Extra request header, \"Name: value\"")]
    pub headers: Vec<String>,

    #[arg(long = "smuggled-path", default_value = "/admin")]
    pub smuggled_path: String,

    #[arg(long = "obfuscation", help = "Transfer-Encoding obfuscation value (repeatable)")]
    pub obfuscations: Vec<String>,

    #[arg(long = "connect-timeout", default_value_t = 10000)]
    pub connect_timeout: u64,

    #[arg(long = "read-timeout", default_value_t = 10000)]
    pub read_timeout: u64,

    #[arg(long = "write-timeout", default_value_t = 10000)]
    pub write_timeout: u64,

    #[arg(long = "probe-delay", default_value_t = 50, help = "Pause between probes in ms")]
    pub probe_delay: u64,

    #[arg(long = "format", default_value = "text")]
    pub format: String,

    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,

    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long = "no-color", help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long = "ai", help = "Ask an LLM advisory for a second opinion")]
    pub ai: bool,

    #[arg(long = "ai-backend", value_enum, default_value = "ollama")]
    pub ai_backend: AiBackend,

    #[arg(long = "api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long = "ollama-endpoint", default_value = "http://localhost:11434")]
    pub ollama_endpoint: String,

    #[arg(long = "ollama-model", default_value = "llama2")]
    pub ollama_model: String,
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            return log::LevelFilter::Debug;
        }
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Warn)
    }

    pub fn report_format(&self) -> CliResult<ReportFormat> {
        Ok(self.format.parse::<ReportFormat>()?)
    }

    pub fn scan_config(&self) -> CliResult<ScanConfig> {
        let mut extra_headers = Vec::new();
        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .ok_or_else(|| format!("invalid header '{}', expected \"Name: value\"", header))?;
            extra_headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let defaults = ScanConfig::default();
        Ok(ScanConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout),
            write_timeout: Duration::from_millis(self.write_timeout),
            read_timeout: Duration::from_millis(self.read_timeout),
            insecure_tls: self.insecure,
            confidence_threshold: self.confidence,
            method: self.method.to_ascii_uppercase(),
            path: self.path.clone(),
            extra_headers,
            smuggled_path: self.smuggled_path.clone(),
            obfuscations: if self.obfuscations.is_empty() {
                defaults.obfuscations
            } else {
                self.obfuscations.clone()
            },
            probe_delay: Duration::from_millis(self.probe_delay),
            ..defaults
        })
    }

    /// Order: `--target`, `--targets`, `--input-file`, then positionals.
    pub fn load_targets(&self) -> CliResult<Vec<Target>> {
        let mut raw = Vec::new();
        raw.extend(self.target.iter().cloned());
        raw.extend(self.targets.iter().cloned());

        if let Some(input_file) = &self.input_file {
            let reader = BufReader::new(File::open(input_file)?);
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if !trimmed.is_empty() && !trimmed.starts_with('#') {
                    raw.push(trimmed.to_string());
                }
            }
        }
        raw.extend(self.positional.iter().cloned());

        let mut targets: Vec<Target> = Vec::new();
        for entry in raw {
            match Target::parse(&entry, self.port, self.https) {
                Ok(target) if !targets.contains(&target) => targets.push(target),
                Ok(_) => {}
                Err(e) => warn!("Skipping {}: {}", entry, e),
            }
        }
        Ok(targets)
    }

    pub fn build_advisory(&self) -> Result<Option<Arc<dyn Advisory>>, AdvisoryError> {
        if !self.ai {
            return Ok(None);
        }
        let advisory = match self.ai_backend {
            AiBackend::Ollama => {
                LlmAdvisory::ollama(Some(&self.ollama_endpoint), Some(&self.ollama_model))?
            }
            AiBackend::Openai => LlmAdvisory::openai(self.api_key.as_deref().unwrap_or(""), None)?,
        };
        let advisory: Arc<dyn Advisory> = Arc::new(advisory);
        Ok(Some(advisory))
    }
}

fn print_banner() {
    println!("{}", "=".repeat(72).bright_red());
    println!(
        "{} {}",
        env!("CARGO_PKG_NAME").bright_red().bold(),
        "differential HTTP request smuggling probe".bright_red()
    );
    println!("{}", "=".repeat(72).bright_red());
    println!(
        "{}",
        "Only scan systems you are explicitly authorized to test.".yellow()
    );
    println!();
}

/// Scans every target in turn. Returns true when any target looked vulnerable.
pub async fn run(cli: Cli) -> CliResult<bool> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.report_format()?;
    let targets = cli.load_targets()?;
    if targets.is_empty() {
        return Err("No targets specified. Use -t, --targets, -i or positional targets".into());
    }

    let mut config = cli.scan_config()?;
    config.validate()?;

    if format == ReportFormat::Text {
        print_banner();
        println!("Loaded {} target(s)", targets.len());
    }

    let transport = Arc::new(RawTransport::new(TransportSettings::from(&config))?);
    let mut orchestrator = ProbeOrchestrator::new(config, transport)?;

    match cli.build_advisory() {
        Ok(Some(advisory)) => {
            info!("Advisory enabled: {}", advisory.name());
            orchestrator = orchestrator.with_advisory(advisory);
        }
        Ok(None) => {}
        Err(e) => warn!("Advisory disabled: {}", e),
    }

    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting scan");
            let _ = abort_tx.send(true);
        }
    });
    let orchestrator = orchestrator.with_abort(abort_rx);

    let pb = ProgressBar::new(targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}")
            .map_err(|e| e.to_string())?
            .progress_chars("##-"),
    );

    let mut outcomes: Vec<ScanOutcome> = Vec::with_capacity(targets.len());
    for target in &targets {
        pb.set_message(format!("Scanning {}", target));
        let outcome = orchestrator.scan(target).await;
        pb.inc(1);

        let rendered = ReportGenerator::render(&outcome, format, !cli.no_color)?;
        pb.suspend(|| print!("{}", rendered));

        let cancelled = matches!(outcome.error, Some(ProbeError::Cancelled));
        outcomes.push(outcome);
        if cancelled {
            break;
        }
    }
    pb.finish_with_message("Scan completed");

    if let Some(output) = &cli.output {
        ReportGenerator::write_to_file(&outcomes, output, format)?;
        if format == ReportFormat::Text {
            println!("\nReport saved to: {}", output);
        }
    }

    Ok(outcomes.iter().any(|o| o.report.is_vulnerable()))
}
