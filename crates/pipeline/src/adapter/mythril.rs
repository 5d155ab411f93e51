//! Symbolic-execution layer adapter wrapping Mythril.
//!
//! Mythril reports issues keyed by SWC id directly; the transaction sequence
//! attached to an issue is preserved as evidence so the exploit validator can
//! replay it as a counterexample.

use crate::adapter::sandbox::{ExecSpec, Sandbox};
use crate::adapter::{run_tool, unwrap_envelope, InvokeOptions, ToolAdapter};
use crate::core::{Layer, RawLocation, Target, ToolFinding};
use crate::scheduler::LayerResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct MythrilAdapter {
    sandbox: Arc<dyn Sandbox>,
    image: String,
}

impl MythrilAdapter {
    pub const TOOL: &'static str = "mythril";

    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            image: "vulnhunter-mythril:latest".to_string(),
        }
    }

    pub fn parse_output(stdout: &str) -> Vec<ToolFinding> {
        let inner = unwrap_envelope(stdout);
        let Ok(root) = serde_json::from_str::<Value>(&inner) else {
            return Vec::new();
        };
        // Standard format has an "issues" key; some versions emit "results"
        // or a bare array.
        let issues = root
            .get("issues")
            .or_else(|| root.get("results"))
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| root.as_array().cloned())
            .unwrap_or_default();

        issues
            .iter()
            .map(|issue| {
                let swc = issue.get("swc-id").and_then(Value::as_str).unwrap_or("");
                let rule_id = if swc.is_empty() {
                    issue
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string()
                } else if swc.starts_with("SWC-") {
                    swc.to_string()
                } else {
                    format!("SWC-{swc}")
                };
                let severity = issue
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("Medium");
                let description = issue
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("");

                let mut location = RawLocation {
                    file: issue
                        .get("filename")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    line: issue.get("lineno").and_then(Value::as_u64).map(|l| l as u32),
                    function: issue
                        .get("function")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    contract: issue
                        .get("contract")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    ..Default::default()
                };
                location.end_line = location.line;
                // Bytecode-level issues carry an instruction address instead
                // of a line.
                if location.line.is_none() {
                    location.byte_start =
                        issue.get("address").and_then(Value::as_u64).map(|a| a as u32);
                    location.byte_end = location.byte_start;
                }

                let mut finding = ToolFinding::new(Self::TOOL, &rule_id, severity, description)
                    .with_location(location);
                let trace = issue
                    .get("tx_sequence")
                    .or_else(|| issue.get("transaction_sequence"));
                if let Some(trace) = trace {
                    finding = finding.with_evidence(trace.to_string());
                }
                finding
            })
            .collect()
    }
}

#[async_trait]
impl ToolAdapter for MythrilAdapter {
    fn name(&self) -> &'static str {
        Self::TOOL
    }

    fn layer(&self) -> Layer {
        Layer::Symbolic
    }

    fn trust_weight(&self) -> f64 {
        0.85
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(600)
    }

    async fn invoke(&self, target: &Target, options: &InvokeOptions) -> Result<LayerResult> {
        let image = self.image.clone();
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
                        "/usr/local/bin/mythril-wrapper.py".to_string(),
                        ".".to_string(),
                    ],
                )
                .mount(workspace, "/contracts")
                .with_memory_mb(8192)
            },
            |stdout, _stderr| Self::parse_output(stdout),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "issues": [
            {
                "swc-id": "107",
                "severity": "High",
                "title": "External Call To User-Supplied Address",
                "description": "A call to a user-supplied address is executed before state update.",
                "filename": "Vault.sol",
                "lineno": 12,
                "function": "withdraw",
                "contract": "Vault",
                "tx_sequence": {"steps": [{"input": "0x2e1a7d4d", "value": "0x0"}]}
            },
            {
                "severity": "Low",
                "title": "Integer Arithmetic Bugs",
                "description": "Arithmetic at the bytecode level.",
                "address": 1432
            }
        ]
    }"#;

    #[test]
    fn test_parse_issues() {
        let findings = MythrilAdapter::parse_output(SAMPLE);
        assert_eq!(findings.len(), 2);

        let first = &findings[0];
        assert_eq!(first.rule_id, "SWC-107");
        assert_eq!(first.raw_location.line, Some(12));
        assert!(first.evidence.as_deref().unwrap().contains("0x2e1a7d4d"));

        // No line, only an instruction address: stays byte-offset based.
        let second = &findings[1];
        assert_eq!(second.raw_location.line, None);
        assert_eq!(second.raw_location.byte_start, Some(1432));
        assert!(second.raw_location.file.is_none());
    }

    #[test]
    fn test_parse_bare_array() {
        let bare = r#"[{"swc-id": "SWC-104", "severity": "Medium", "description": "x"}]"#;
        let findings = MythrilAdapter::parse_output(bare);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "SWC-104");
    }
}
