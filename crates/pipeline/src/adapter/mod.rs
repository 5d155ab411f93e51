//! Tool adapter contract and registry.
//!
//! Each external analyzer (Slither, Mythril, Echidna, Halmos, an AI reviewer)
//! is wrapped by one adapter that knows how to invoke it inside a sandbox and
//! translate its native output into [`ToolFinding`] records. The pipeline
//! never looks past this contract: adding a tool means adding an adapter,
//! nothing else changes.

pub mod ai_review;
pub mod echidna;
pub mod halmos;
pub mod mock;
pub mod mythril;
pub mod sandbox;
pub mod slither;

use crate::core::{CancelToken, Layer, Target};
use crate::scheduler::{LayerResult, LayerStatus};
use anyhow::Result;
use async_trait::async_trait;
use sandbox::Sandbox;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use ai_review::AiReviewAdapter;
pub use echidna::EchidnaAdapter;
pub use halmos::HalmosAdapter;
pub use mock::{MockAdapter, MockSandbox};
pub use mythril::MythrilAdapter;
pub use sandbox::{ContainerSandbox, ExecOutput, ExecSpec};
pub use slither::SlitherAdapter;

/// Per-invocation options handed down by the scheduler.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub timeout: Duration,
    pub cancel: CancelToken,
}

impl InvokeOptions {
    pub fn new(timeout: Duration, cancel: CancelToken) -> Self {
        Self { timeout, cancel }
    }
}

/// Capability contract every tool integration implements.
///
/// `invoke` must run the wrapped tool in an isolated execution context and
/// return a complete [`LayerResult`], including `timeout` status with any
/// partial findings salvaged from captured output. An `Err` return means a
/// transient environment fault (sandbox startup, cancellation) and is subject
/// to the scheduler's retry policy.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn layer(&self) -> Layer;

    fn trust_weight(&self) -> f64 {
        0.7
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn invoke(&self, target: &Target, options: &InvokeOptions) -> Result<LayerResult>;
}

/// Static registry of adapter implementers, keyed by tool name.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the concrete adapters for all five layers, sharing one
    /// sandbox.
    pub fn with_defaults(sandbox: Arc<dyn Sandbox>) -> Self {
        AdapterRegistryBuilder::new()
            .with_adapter(SlitherAdapter::new(sandbox.clone()))
            .with_adapter(MythrilAdapter::new(sandbox.clone()))
            .with_adapter(EchidnaAdapter::new(sandbox.clone()))
            .with_adapter(HalmosAdapter::new(sandbox.clone()))
            .with_adapter(AiReviewAdapter::new(sandbox))
            .build()
    }

    pub fn register<A: ToolAdapter + 'static>(&mut self, adapter: A) {
        self.adapters
            .insert(adapter.name().to_string(), Arc::new(adapter));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn for_layer(&self, layer: Layer) -> Vec<Arc<dyn ToolAdapter>> {
        let mut matching: Vec<_> = self
            .adapters
            .values()
            .filter(|a| a.layer() == layer)
            .cloned()
            .collect();
        matching.sort_by_key(|a| a.name());
        matching
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared invoke skeleton for the concrete adapters: stage the target into a
/// mountable workspace, execute in the sandbox, classify the outcome.
///
/// Sandbox-level `Err` (startup fault, cancellation) propagates for the
/// scheduler's retry policy. A timed-out run salvages whatever findings the
/// parser can extract from partial output. A non-zero tool exit is a recorded
/// failure, not a retry candidate; findings parsed from its output before the
/// crash are kept on the result.
pub(crate) async fn run_tool(
    sandbox: &dyn Sandbox,
    layer: Layer,
    tool: &'static str,
    target: &Target,
    options: &InvokeOptions,
    build_spec: impl FnOnce(std::path::PathBuf) -> ExecSpec,
    parse: impl Fn(&str, &str) -> Vec<crate::core::ToolFinding>,
) -> Result<LayerResult> {
    let staged = stage_target(target)?;
    let spec = build_spec(staged.mount_path().to_path_buf());
    let output = sandbox.execute(&spec, options.timeout, &options.cancel).await?;
    drop(staged);

    let findings = parse(&output.stdout, &output.stderr);
    if output.timed_out {
        return Ok(LayerResult::timed_out(layer, tool, findings, output.duration));
    }
    if output.exit_code == Some(0) {
        return Ok(LayerResult::completed(layer, tool, findings, output.duration));
    }

    // Crash after partial reporting: the failure is surfaced, the salvage
    // kept.
    let mut stderr = output.stderr;
    stderr.truncate(500);
    Ok(LayerResult {
        layer,
        tool: tool.to_string(),
        status: LayerStatus::Failed,
        findings,
        duration: output.duration,
        error: Some(format!(
            "{} exited with {:?}: {}",
            tool,
            output.exit_code,
            stderr.trim()
        )),
    })
}

/// A target staged on the host filesystem, ready to bind-mount. For deployed
/// targets the bytecode/ABI are written into an ephemeral workspace that
/// lives until the value is dropped.
pub(crate) enum StagedTarget {
    Tree(std::path::PathBuf),
    Ephemeral(tempfile::TempDir),
}

impl StagedTarget {
    fn mount_path(&self) -> &std::path::Path {
        match self {
            StagedTarget::Tree(path) => path,
            StagedTarget::Ephemeral(dir) => dir.path(),
        }
    }
}

pub(crate) fn stage_target(target: &Target) -> Result<StagedTarget> {
    match target {
        Target::Source { root } => Ok(StagedTarget::Tree(root.clone())),
        Target::Deployed { bytecode, abi, .. } => {
            let dir = tempfile::tempdir()?;
            std::fs::write(dir.path().join("bytecode.hex"), bytecode)?;
            if let Some(abi) = abi {
                std::fs::write(dir.path().join("abi.json"), abi)?;
            }
            Ok(StagedTarget::Ephemeral(dir))
        }
    }
}

/// The tool wrapper scripts inside the images emit an envelope
/// `{"success": bool, "output": "<tool stdout>"}`; bare tool output is passed
/// through untouched.
pub(crate) fn unwrap_envelope(stdout: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(stdout) {
        if let Some(inner) = value.get("output").and_then(|o| o.as_str()) {
            return inner.to_string();
        }
    }
    stdout.to_string()
}

pub struct AdapterRegistryBuilder {
    registry: AdapterRegistry,
}

impl AdapterRegistryBuilder {
    pub fn new() -> Self {
        Self {
            registry: AdapterRegistry::new(),
        }
    }

    pub fn with_adapter<A: ToolAdapter + 'static>(mut self, adapter: A) -> Self {
        self.registry.register(adapter);
        self
    }

    pub fn build(self) -> AdapterRegistry {
        self.registry
    }
}

impl Default for AdapterRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
