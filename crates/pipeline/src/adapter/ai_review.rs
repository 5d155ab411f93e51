//! AI-assisted review layer adapter.
//!
//! The reviewer runs as an ordinary external tool behind the same contract as
//! everything else; its non-determinism is handled by a low default trust
//! weight, so its findings raise a group's confidence tier only when another
//! layer corroborates them.

use crate::adapter::sandbox::{ExecSpec, Sandbox};
use crate::adapter::{run_tool, unwrap_envelope, InvokeOptions, ToolAdapter};
use crate::core::{Layer, RawLocation, Target, ToolFinding};
use crate::scheduler::LayerResult;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct AiReviewAdapter {
    sandbox: Arc<dyn Sandbox>,
    image: String,
}

impl AiReviewAdapter {
    pub const TOOL: &'static str = "ai-review";

    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            image: "vulnhunter-ai-review:latest".to_string(),
        }
    }

    pub fn parse_output(stdout: &str) -> Vec<ToolFinding> {
        let inner = unwrap_envelope(stdout);
        let Ok(root) = serde_json::from_str::<Value>(&inner) else {
            return Vec::new();
        };
        let findings = root
            .get("findings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        findings
            .iter()
            .map(|finding| {
                let category = finding
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let severity = finding
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("medium");
                let explanation = finding
                    .get("explanation")
                    .and_then(Value::as_str)
                    .unwrap_or("");

                let mut location = RawLocation::default();
                location.file = finding
                    .get("file")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                location.line = finding
                    .get("line_start")
                    .and_then(Value::as_u64)
                    .map(|l| l as u32);
                location.end_line = finding
                    .get("line_end")
                    .and_then(Value::as_u64)
                    .map(|l| l as u32)
                    .or(location.line);
                location.function = finding
                    .get("function")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                location.contract = finding
                    .get("contract")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                ToolFinding::new(Self::TOOL, category, severity, explanation)
                    .with_location(location)
            })
            .collect()
    }
}

#[async_trait]
impl ToolAdapter for AiReviewAdapter {
    fn name(&self) -> &'static str {
        Self::TOOL
    }

    fn layer(&self) -> Layer {
        Layer::Ai
    }

    fn trust_weight(&self) -> f64 {
        0.5
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
                        "/usr/local/bin/review-wrapper.py".to_string(),
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
