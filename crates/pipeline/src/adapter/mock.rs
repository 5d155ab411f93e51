//! Scripted adapters and sandboxes for tests.
//!
//! Mirrors the behaviors the scheduler and validator must survive: clean
//! completion, hard failure, flaky-then-success, timeout with partial
//! findings, and hanging until cancelled.

use crate::adapter::sandbox::{ExecOutput, ExecSpec, Sandbox};
use crate::adapter::{InvokeOptions, ToolAdapter};
use crate::core::{CancelToken, Layer, RawLocation, Target, ToolFinding};
use crate::error::PipelineError;
use crate::scheduler::LayerResult;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Behavior {
    Complete,
    Fail,
    Timeout,
    /// Fail the first `n` attempts, then complete.
    Flaky(usize),
    Hang,
}

pub struct MockAdapter {
    name: &'static str,
    layer: Layer,
    trust_weight: f64,
    behavior: Behavior,
    findings: Vec<ToolFinding>,
    call_count: AtomicUsize,
}

impl MockAdapter {
    fn base(name: &'static str, layer: Layer, behavior: Behavior) -> Self {
        Self {
            name,
            layer,
            trust_weight: 0.8,
            behavior,
            findings: Vec::new(),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn completing(name: &'static str, layer: Layer, findings: usize) -> Self {
        let mut adapter = Self::base(name, layer, Behavior::Complete);
        adapter.findings = Self::synthetic_findings(name, findings);
        adapter
    }

    pub fn failing(name: &'static str, layer: Layer) -> Self {
        Self::base(name, layer, Behavior::Fail)
    }

    pub fn timing_out(name: &'static str, layer: Layer, partial: usize) -> Self {
        let mut adapter = Self::base(name, layer, Behavior::Timeout);
        adapter.findings = Self::synthetic_findings(name, partial);
        adapter
    }

    pub fn flaky(name: &'static str, layer: Layer, failures: usize, findings: usize) -> Self {
        let mut adapter = Self::base(name, layer, Behavior::Flaky(failures));
        adapter.findings = Self::synthetic_findings(name, findings);
        adapter
    }

    pub fn hanging(name: &'static str, layer: Layer) -> Self {
        Self::base(name, layer, Behavior::Hang)
    }

    /// Replace the synthetic findings with an exact script.
    pub fn with_findings(mut self, findings: Vec<ToolFinding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_trust_weight(mut self, weight: f64) -> Self {
        self.trust_weight = weight;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn synthetic_findings(tool: &str, count: usize) -> Vec<ToolFinding> {
        (0..count)
            .map(|i| {
                ToolFinding::new(tool, "reentrancy-eth", "high", "synthetic reentrancy")
                    .with_location(RawLocation::at_lines(
                        "Vault.sol",
                        10 + i as u32 * 30,
                        15 + i as u32 * 30,
                    ))
            })
            .collect()
    }
}

#[async_trait]
impl ToolAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn layer(&self) -> Layer {
        self.layer
    }

    fn trust_weight(&self) -> f64 {
        self.trust_weight
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn invoke(&self, _target: &Target, options: &InvokeOptions) -> Result<LayerResult> {
        let attempt = self.call_count.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Complete => Ok(LayerResult::completed(
                self.layer,
                self.name,
                self.findings.clone(),
                Duration::from_millis(5),
            )),
            Behavior::Fail => Err(anyhow!("mock adapter {} crashed", self.name)),
            Behavior::Timeout => Ok(LayerResult::timed_out(
                self.layer,
                self.name,
                self.findings.clone(),
                options.timeout,
            )),
            Behavior::Flaky(failures) => {
                if attempt < *failures {
                    Err(anyhow!("mock adapter {} transient fault", self.name))
                } else {
                    Ok(LayerResult::completed(
                        self.layer,
                        self.name,
                        self.findings.clone(),
                        Duration::from_millis(5),
                    ))
                }
            }
            Behavior::Hang => {
                options.cancel.cancelled().await;
                Err(PipelineError::Cancelled.into())
            }
        }
    }
}

/// Sandbox returning scripted output, matched by substring against the
/// command line; the default response is an empty success.
pub struct MockSandbox {
    responses: Vec<(String, ExecOutput)>,
    default: ExecOutput,
    call_count: AtomicUsize,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self {
            responses: Vec::new(),
            default: Self::output("", 0, false),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_response(mut self, pattern: &str, output: ExecOutput) -> Self {
        self.responses.push((pattern.to_string(), output));
        self
    }

    pub fn with_default(mut self, output: ExecOutput) -> Self {
        self.default = output;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn output(stdout: &str, exit_code: i32, timed_out: bool) -> ExecOutput {
        ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: if timed_out { None } else { Some(exit_code) },
            duration: Duration::from_millis(10),
            timed_out,
        }
    }
}

impl Default for MockSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    async fn execute(
        &self,
        spec: &ExecSpec,
        _timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<ExecOutput> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled.into());
        }
        let command_line = spec.command.join(" ");
        for (pattern, output) in &self.responses {
            if command_line.contains(pattern) || spec.image.contains(pattern) {
                return Ok(output.clone());
            }
        }
        Ok(self.default.clone())
    }
}
