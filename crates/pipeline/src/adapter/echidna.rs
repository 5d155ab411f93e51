//! Fuzzing layer adapter wrapping Echidna.
//!
//! Echidna emits structured JSON test results when asked, but older versions
//! only print `echidna_<property>: failed!` lines; both are handled. A failing
//! test's call sequence is preserved as evidence for exploit validation.
//! Property failures usually have no source location and flow through the
//! pipeline as unresolved findings.

use crate::adapter::sandbox::{ExecSpec, Sandbox};
use crate::adapter::{run_tool, unwrap_envelope, InvokeOptions, ToolAdapter};
use crate::core::{Layer, RawLocation, Target, ToolFinding};
use crate::scheduler::LayerResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct EchidnaAdapter {
    sandbox: Arc<dyn Sandbox>,
    image: String,
    test_limit: u64,
}

impl EchidnaAdapter {
    pub const TOOL: &'static str = "echidna";

    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            image: "vulnhunter-echidna:latest".to_string(),
            test_limit: 50_000,
        }
    }

    pub fn parse_output(stdout: &str, stderr: &str) -> Vec<ToolFinding> {
        let inner = unwrap_envelope(stdout);
        if let Ok(root) = serde_json::from_str::<Value>(&inner) {
            let parsed = Self::parse_json(&root);
            if !parsed.is_empty() {
                return parsed;
            }
        }
        Self::parse_text(&inner, stderr)
    }

    fn parse_json(root: &Value) -> Vec<ToolFinding> {
        let tests = root
            .get("tests")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        tests
            .iter()
            .filter(|test| {
                test.get("status").and_then(Value::as_str) == Some("failed")
                    || test.get("passed").and_then(Value::as_bool) == Some(false)
            })
            .map(|test| {
                let name = test
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed-property");
                let message = format!("Echidna falsified property '{name}'");
                let mut finding = ToolFinding::new(Self::TOOL, name, "High", &message);
                if let Some(sequence) = test.get("call_sequence") {
                    finding = finding.with_evidence(sequence.to_string());
                }
                if let Some(contract) = test.get("contract").and_then(Value::as_str) {
                    finding.raw_location.contract = Some(contract.to_string());
                }
                finding
            })
            .collect()
    }

    /// Text fallback: `echidna_<prop>: failed!` lines and assertion failures
    /// with a `file:line` suffix.
    fn parse_text(stdout: &str, stderr: &str) -> Vec<ToolFinding> {
        let mut findings = Vec::new();
        for line in stdout.lines().chain(stderr.lines()) {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("echidna_") {
                if let Some((property, status)) = rest.split_once(':') {
                    if status.to_lowercase().contains("failed") {
                        let name = format!("echidna_{}", property.trim());
                        findings.push(ToolFinding::new(
                            Self::TOOL,
                            &name,
                            "High",
                            &format!("Echidna falsified property '{name}'"),
                        ));
                    }
                }
            } else if line.to_lowercase().starts_with("assertion failed") {
                let mut finding = ToolFinding::new(
                    Self::TOOL,
                    "assertion",
                    "High",
                    "Echidna triggered an assertion failure; a contract invariant was violated.",
                );
                if let Some((file, line_no)) = Self::parse_at_suffix(line) {
                    finding.raw_location = RawLocation::at_lines(&file, line_no, line_no);
                }
                findings.push(finding);
            }
        }
        findings
    }

    fn parse_at_suffix(line: &str) -> Option<(String, u32)> {
        let (_, after) = line.rsplit_once(" at ")?;
        let (file, line_no) = after.rsplit_once(':')?;
        Some((file.trim().to_string(), line_no.trim().parse().ok()?))
    }
}

#[async_trait]
impl ToolAdapter for EchidnaAdapter {
    fn name(&self) -> &'static str {
        Self::TOOL
    }

    fn layer(&self) -> Layer {
        Layer::Fuzzing
    }

    fn trust_weight(&self) -> f64 {
        0.85
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(900)
    }

    async fn invoke(&self, target: &Target, options: &InvokeOptions) -> Result<LayerResult> {
        let image = self.image.clone();
        let test_limit = self.test_limit;
        run_tool(
            self.sandbox.as_ref(),
            self.layer(),
            Self::TOOL,
            target,
            options,
            |workspace| {
                ExecSpec::new(
                    &image,
                    vec![
                        "python3".to_string(),
                        "/usr/local/bin/echidna-wrapper.py".to_string(),
                        ".".to_string(),
                        "--test-limit".to_string(),
                        test_limit.to_string(),
                    ],
                )
                .mount(workspace, "/contracts")
            },
            |stdout, stderr| Self::parse_output(stdout, stderr),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_failed_tests() {
        let sample = r#"{
            "tests": [
                {"name": "echidna_balance_never_drops", "status": "failed", "contract": "Vault",
                 "call_sequence": [{"function": "withdraw", "args": ["1000"]}]},
                {"name": "echidna_owner_unchanged", "status": "passed"}
            ]
        }"#;
        let findings = EchidnaAdapter::parse_output(sample, "");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "echidna_balance_never_drops");
        assert!(findings[0].evidence.as_deref().unwrap().contains("withdraw"));
        // Property failures carry no line info: location stays empty.
        assert!(findings[0].raw_location.file.is_none());
        assert!(findings[0].raw_location.line.is_none());
    }

    #[test]
    fn test_parse_text_fallback() {
        let stdout = "Loaded 3 transactions\nechidna_no_theft: failed!💥\n";
        let stderr = "Assertion failed in Vault.withdraw at Vault.sol:14\n";
        let findings = EchidnaAdapter::parse_output(stdout, stderr);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule_id, "echidna_no_theft");
        assert_eq!(findings[1].rule_id, "assertion");
        assert_eq!(findings[1].raw_location.file.as_deref(), Some("Vault.sol"));
        assert_eq!(findings[1].raw_location.line, Some(14));
    }

    #[test]
    fn test_all_passing_is_empty() {
        let sample = r#"{"tests": [{"name": "echidna_safe", "status": "passed"}]}"#;
        assert!(EchidnaAdapter::parse_output(sample, "").is_empty());
    }
}
