// File: orchestrator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::advisory::{Advisory, AdvisoryRequest};
use crate::config::ScanConfig;
use crate::detector::{ConfidenceDetector, Verdict};
use crate::error::{ProbeError, ProbeResult};
use crate::probe::{smuggled_request, Probe, ProbeBuilder, Technique};
use crate::response::DecodedResponse;
use crate::target::Target;
use crate::transport::Transport;
use log::{debug, info, warn};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Aggregate of one target's verdicts.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub target: String,
    pub total_probes: usize,
    pub suspicious_count: usize,
    pub suspicious: Vec<Verdict>,
    pub most_likely: Option<Technique>,
    pub highest_confidence: f64,
}

impl ScanReport {
    pub fn from_verdicts(target: &str, verdicts: &[Verdict]) -> Self {
        let suspicious: Vec<Verdict> = verdicts.iter().filter(|v| v.suspicious).cloned().collect();

        // Strictly greater keeps the earliest technique on ties.
        let mut best: Option<&Verdict> = None;
        for verdict in &suspicious {
            match best {
                Some(current) if verdict.confidence <= current.confidence => {}
                _ => best = Some(verdict),
            }
        }

        Self {
            target: target.to_string(),
            total_probes: verdicts.len(),
            suspicious_count: suspicious.len(),
            most_likely: best.map(|v| v.technique),
            highest_confidence: best.map(|v| v.confidence).unwrap_or(0.0),
            suspicious,
        }
    }

    pub fn is_vulnerable(&self) -> bool {
        self.suspicious_count > 0
    }
}

/// Result of a scan. `report` covers whatever completed, even when `error` is set.
#[derive(Debug)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub verdicts: Vec<Verdict>,
    pub error: Option<ProbeError>,
}

impl ScanOutcome {
    fn new(target: &str, verdicts: Vec<Verdict>, error: Option<ProbeError>) -> Self {
        Self {
            report: ScanReport::from_verdicts(target, &verdicts),
            verdicts,
            error,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub struct ProbeOrchestrator {
    config: ScanConfig,
    detector: ConfidenceDetector,
    transport: Arc<dyn Transport>,
    advisory: Option<Arc<dyn Advisory>>,
    abort: Option<watch::Receiver<bool>>,
}

impl ProbeOrchestrator {
    pub fn new(mut config: ScanConfig, transport: Arc<dyn Transport>) -> ProbeResult<Self> {
        config.validate()?;
        Ok(Self {
            detector: ConfidenceDetector::new(config.confidence_threshold),
            config,
            transport,
            advisory: None,
            abort: None,
        })
    }

    pub fn with_advisory(mut self, advisory: Arc<dyn Advisory>) -> Self {
        self.advisory = Some(advisory);
        self
    }

    /// Once the channel reads `true`, the in-flight step is dropped and the
    /// scan ends with [`ProbeError::Cancelled`].
    pub fn with_abort(mut self, abort: watch::Receiver<bool>) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Baseline first, then every technique in order. The first error stops the scan.
    pub async fn scan(&self, target: &Target) -> ScanOutcome {
        let label = target.to_string();
        let mut verdicts = Vec::with_capacity(Technique::ALL.len());
        info!("Starting scan of {}", label);

        let baseline = match self.capture_baseline(target).await {
            Ok(baseline) => Arc::new(baseline),
            Err(e) => {
                warn!("Baseline capture for {} failed: {}", label, e);
                return ScanOutcome::new(&label, verdicts, Some(e));
            }
        };

        for technique in Technique::ALL {
            let step = match self.pause().await {
                Ok(()) => self.run_step(technique, target, &label, &baseline).await,
                Err(e) => Err(e),
            };

            match step {
                Ok(verdict) => {
                    info!(
                        "{} on {}: suspicious={} confidence={:.2}",
                        technique, label, verdict.suspicious, verdict.confidence
                    );
                    verdicts.push(verdict);
                }
                Err(e) => {
                    warn!("{} probe against {} aborted the scan: {}", technique, label, e);
                    return ScanOutcome::new(&label, verdicts, Some(e));
                }
            }
        }

        info!("Finished scan of {}", label);
        ScanOutcome::new(&label, verdicts, None)
    }

    async fn capture_baseline(&self, target: &Target) -> ProbeResult<DecodedResponse> {
        let request = self.builder(target).baseline()?;
        debug!("Capturing baseline for {}", target);
        let baseline = self.send(target, &request).await?;
        info!(
            "Baseline for {}: status={} body={} bytes time={}ms closed={}",
            target,
            baseline.status_code,
            baseline.body.len(),
            baseline.timing_ms(),
            baseline.connection_closed
        );
        Ok(baseline)
    }

    async fn run_step(
        &self,
        technique: Technique,
        target: &Target,
        label: &str,
        baseline: &Arc<DecodedResponse>,
    ) -> ProbeResult<Verdict> {
        let verdict = match technique {
            Technique::Poisoning => self.run_poisoning(target, label, baseline).await?,
            _ => {
                let probe = self.build_probe(technique, target)?;
                debug!(
                    "Sending {} probe ({} bytes, fingerprint {})",
                    technique,
                    probe.payload.len(),
                    probe.fingerprint()
                );
                let test = self.send(target, &probe.payload).await?;
                self.detector
                    .analyze(technique, label, &probe.fingerprint(), baseline, test)
            }
        };
        self.consult_advisory(verdict).await
    }

    /// Poison the backend connection, then judge the next ordinary request.
    async fn run_poisoning(
        &self,
        target: &Target,
        label: &str,
        baseline: &Arc<DecodedResponse>,
    ) -> ProbeResult<Verdict> {
        let poison = self.build_probe(Technique::Poisoning, target)?;
        let follow_up_request = self
            .builder(target)
            .follow_up(&self.config.probe_method_after_poison)?;

        let first = self.send(target, &poison.payload).await?;
        debug!(
            "Poison request answered with status {} ({} bytes)",
            first.status_code,
            first.raw.len()
        );

        let follow_up = self.send(target, &follow_up_request).await?;
        Ok(self.detector.analyze_poisoning(
            label,
            &poison.fingerprint(),
            &self.poison_indicators(),
            baseline,
            follow_up,
        ))
    }

    async fn consult_advisory(&self, verdict: Verdict) -> ProbeResult<Verdict> {
        let advisory = match &self.advisory {
            Some(advisory) => advisory,
            None => return Ok(verdict),
        };

        let request = AdvisoryRequest::new(verdict.technique, &verdict.baseline, &verdict.test);
        match self.abortable(advisory.assess(&request)).await? {
            Ok(assessment) => {
                debug!(
                    "{} assessment for {}: vulnerable={} confidence={:.2}",
                    advisory.name(),
                    verdict.technique,
                    assessment.is_vulnerable,
                    assessment.confidence
                );
                Ok(verdict.merge_assessment(assessment))
            }
            Err(e) => {
                warn!("{} unavailable, keeping local verdict: {}", advisory.name(), e);
                Ok(verdict)
            }
        }
    }

    fn builder(&self, target: &Target) -> ProbeBuilder {
        ProbeBuilder::new(&target.host_header())
            .method(&self.config.method)
            .path(&self.config.path)
            .headers(self.config.extra_headers.iter().cloned())
    }

    fn build_probe(&self, technique: Technique, target: &Target) -> ProbeResult<Probe> {
        let smuggled = smuggled_request(&self.config.smuggled_path, &target.host_header());
        // The poisoned connection has to stay open for the backend to keep the prefix.
        let connection = match technique {
            Technique::Poisoning => "keep-alive",
            _ => "close",
        };
        let builder = self.builder(target).default_header("Connection", connection);
        let (first_te, second_te) = &self.config.mixed_te_values;

        match technique {
            Technique::ClTe => builder.cl_te(&smuggled),
            Technique::TeCl => builder.te_cl(&smuggled),
            Technique::MixedTe => builder.mixed_te(&smuggled, first_te, second_te),
            Technique::ObfuscatedTe => {
                builder.obfuscated_te(&smuggled, &self.config.obfuscations)
            }
            Technique::Poisoning => builder.poison(&self.config.poison_prefix),
        }
    }

    /// Corrupted method names the backend might echo after poisoning.
    fn poison_indicators(&self) -> Vec<String> {
        let mut indicators = Vec::new();
        for method in [
            self.config.probe_method_after_poison.as_str(),
            "POST",
            "GET",
        ] {
            let token = format!("{}{}", self.config.poison_prefix, method);
            if !indicators.contains(&token) {
                indicators.push(token);
            }
        }
        indicators
    }

    async fn send(&self, target: &Target, payload: &[u8]) -> ProbeResult<DecodedResponse> {
        // Transports may start writing before their future is first polled.
        self.check_abort()?;
        self.abortable(self.transport.send(target, payload)).await?
    }

    fn check_abort(&self) -> ProbeResult<()> {
        match &self.abort {
            Some(abort) if *abort.borrow() => Err(ProbeError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn pause(&self) -> ProbeResult<()> {
        if self.config.probe_delay.is_zero() {
            return self.abortable(async {}).await;
        }
        self.abortable(tokio::time::sleep(self.config.probe_delay))
            .await
    }

    async fn abortable<T>(&self, work: impl Future<Output = T>) -> ProbeResult<T> {
        let mut abort = match &self.abort {
            Some(abort) => abort.clone(),
            None => return Ok(work.await),
        };
        if *abort.borrow_and_update() {
            return Err(ProbeError::Cancelled);
        }

        tokio::select! {
            value = work => Ok(value),
            _ = wait_for_abort(&mut abort) => Err(ProbeError::Cancelled),
        }
    }
}

async fn wait_for_abort(abort: &mut watch::Receiver<bool>) {
    loop {
        if abort.changed().await.is_err() {
            // Sender gone: nobody can abort any more.
            futures::future::pending::<()>().await;
        }
        if *abort.borrow_and_update() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
