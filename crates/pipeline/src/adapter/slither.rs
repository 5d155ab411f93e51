//! Static-analysis layer adapter wrapping Slither.
//!
//! Invokes the wrapper script inside the tool image and translates the
//! detector JSON (`results.detectors[]`) into raw findings. Detector-id to
//! class mapping is the normalizer's job; only the raw `check` id, `impact`
//! and source mapping are carried here.

use crate::adapter::sandbox::{ExecSpec, Sandbox};
use crate::adapter::{run_tool, unwrap_envelope, InvokeOptions, ToolAdapter};
use crate::core::{Layer, RawLocation, Target, ToolFinding};
use crate::scheduler::LayerResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct SlitherAdapter {
    sandbox: Arc<dyn Sandbox>,
    image: String,
}

impl SlitherAdapter {
    pub const TOOL: &'static str = "slither";

    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            image: "vulnhunter-slither:latest".to_string(),
        }
    }

    pub fn parse_output(stdout: &str) -> Vec<ToolFinding> {
        let inner = unwrap_envelope(stdout);
        let Ok(root) = serde_json::from_str::<Value>(&inner) else {
            return Vec::new();
        };
        let detectors = root
            .pointer("/results/detectors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        detectors
            .iter()
            .map(|detector| {
                let check = detector
                    .get("check")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let impact = detector
                    .get("impact")
                    .and_then(Value::as_str)
                    .unwrap_or("Medium");
                let description = detector
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .trim();

                ToolFinding::new(Self::TOOL, check, impact, description)
                    .with_location(Self::parse_location(detector))
            })
            .collect()
    }

    fn parse_location(detector: &Value) -> RawLocation {
        let Some(element) = detector
            .get("elements")
            .and_then(Value::as_array)
            .and_then(|e| e.first())
        else {
            return RawLocation::default();
        };

        let mut location = RawLocation::default();
        if let Some(mapping) = element.get("source_mapping") {
            location.file = mapping
                .get("filename_relative")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(lines) = mapping.get("lines").and_then(Value::as_array) {
                location.line = lines.first().and_then(Value::as_u64).map(|l| l as u32);
                location.end_line = lines.last().and_then(Value::as_u64).map(|l| l as u32);
            }
            // Byte offsets survive even when the line table is missing.
            location.byte_start = mapping.get("start").and_then(Value::as_u64).map(|v| v as u32);
            if let (Some(start), Some(length)) = (
                mapping.get("start").and_then(Value::as_u64),
                mapping.get("length").and_then(Value::as_u64),
            ) {
                location.byte_end = Some((start + length) as u32);
            }
        }
        if element.get("type").and_then(Value::as_str) == Some("function") {
            location.function = element.get("name").and_then(Value::as_str).map(str::to_string);
            location.contract = element
                .pointer("/type_specific_fields/parent/name")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        location
    }
}

#[async_trait]
impl ToolAdapter for SlitherAdapter {
    fn name(&self) -> &'static str {
        Self::TOOL
    }

    fn layer(&self) -> Layer {
        Layer::Static
    }

    fn trust_weight(&self) -> f64 {
        0.9
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(300)
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
                        "/usr/local/bin/slither-wrapper.py".to_string(),
                        ".".to_string(),
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

    const SAMPLE: &str = r#"{
        "results": {
            "detectors": [
                {
                    "check": "reentrancy-eth",
                    "impact": "High",
                    "description": "Reentrancy in Vault.withdraw (Vault.sol#10-15)",
                    "elements": [
                        {
                            "type": "function",
                            "name": "withdraw",
                            "type_specific_fields": {"parent": {"name": "Vault"}},
                            "source_mapping": {
                                "filename_relative": "Vault.sol",
                                "lines": [10, 11, 12, 13, 14, 15],
                                "start": 220,
                                "length": 180
                            }
                        }
                    ]
                },
                {
                    "check": "pragma",
                    "impact": "Informational",
                    "description": "Different pragma directives",
                    "elements": []
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_detectors() {
        let findings = SlitherAdapter::parse_output(SAMPLE);
        assert_eq!(findings.len(), 2);

        let reentrancy = &findings[0];
        assert_eq!(reentrancy.rule_id, "reentrancy-eth");
        assert_eq!(reentrancy.raw_severity, "High");
        assert_eq!(reentrancy.raw_location.file.as_deref(), Some("Vault.sol"));
        assert_eq!(reentrancy.raw_location.line, Some(10));
        assert_eq!(reentrancy.raw_location.end_line, Some(15));
        assert_eq!(reentrancy.raw_location.function.as_deref(), Some("withdraw"));
        assert_eq!(reentrancy.raw_location.contract.as_deref(), Some("Vault"));

        let pragma = &findings[1];
        assert!(pragma.raw_location.file.is_none());
    }

    #[test]
    fn test_parse_wrapper_envelope() {
        let wrapped = serde_json::json!({ "success": true, "output": SAMPLE }).to_string();
        let findings = SlitherAdapter::parse_output(&wrapped);
        assert_eq!(findings.len(), 2);
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(SlitherAdapter::parse_output("not json at all").is_empty());
    }
}
