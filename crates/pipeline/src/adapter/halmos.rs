//! Formal-verification layer adapter wrapping Halmos.
//!
//! Halmos reports per-check results with a symbolic counterexample for each
//! failed check; the counterexample model is preserved as evidence.

use crate::adapter::sandbox::{ExecSpec, Sandbox};
use crate::adapter::{run_tool, unwrap_envelope, InvokeOptions, ToolAdapter};
use crate::core::{Layer, Target, ToolFinding};
use crate::scheduler::LayerResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct HalmosAdapter {
    sandbox: Arc<dyn Sandbox>,
    image: String,
}

impl HalmosAdapter {
    pub const TOOL: &'static str = "halmos";

    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            image: "a16z/halmos:latest".to_string(),
        }
    }

    pub fn parse_output(stdout: &str) -> Vec<ToolFinding> {
        let inner = unwrap_envelope(stdout);
        let Ok(root) = serde_json::from_str::<Value>(&inner) else {
            return Vec::new();
        };
        let checks = root
            .get("results")
            .or_else(|| root.get("tests"))
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| root.as_array().cloned())
            .unwrap_or_default();

        checks
            .iter()
            .filter(|check| {
                matches!(
                    check.get("result").and_then(Value::as_str),
                    Some("FAIL") | Some("fail") | Some("failed")
                )
            })
            .map(|check| {
                let name = check
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed-check");
                let message = format!("Halmos disproved check '{name}'");
                let mut finding = ToolFinding::new(Self::TOOL, name, "High", &message);
                if let Some(counterexample) = check.get("counterexample") {
                    finding = finding.with_evidence(counterexample.to_string());
                }
                if let Some(contract) = check.get("contract").and_then(Value::as_str) {
                    finding.raw_location.contract = Some(contract.to_string());
                }
                finding
            })
            .collect()
    }
}

#[async_trait]
impl ToolAdapter for HalmosAdapter {
    fn name(&self) -> &'static str {
        Self::TOOL
    }

    fn layer(&self) -> Layer {
        Layer::Formal
    }

    fn trust_weight(&self) -> f64 {
        0.8
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
                        "halmos".to_string(),
                        "--root".to_string(),
                        ".".to_string(),
                        "--json-output".to_string(),
                        "/dev/stdout".to_string(),
                    ],
                )
                .mount(workspace, "/contracts")
            },
            |stdout, _stderr| Self::parse_output(stdout),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_failed_checks() {
        let sample = r#"{
            "results": [
                {"name": "check_withdraw_solvent", "result": "FAIL", "contract": "VaultTest",
                 "counterexample": {"p_amount": "115792089237316195423570985008687907853"}},
                {"name": "check_owner_stable", "result": "PASS"}
            ]
        }"#;
        let findings = HalmosAdapter::parse_output(sample);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "check_withdraw_solvent");
        assert!(findings[0].evidence.as_deref().unwrap().contains("p_amount"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(HalmosAdapter::parse_output("{}").is_empty());
        assert!(HalmosAdapter::parse_output("garbage").is_empty());
    }
}
