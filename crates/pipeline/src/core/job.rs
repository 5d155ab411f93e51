use crate::core::severity::Severity;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Independent analysis technique category. Every tool adapter belongs to
/// exactly one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Static,
    Fuzzing,
    Symbolic,
    Formal,
    Ai,
}

impl Layer {
    pub fn all() -> [Layer; 5] {
        [
            Layer::Static,
            Layer::Fuzzing,
            Layer::Symbolic,
            Layer::Formal,
            Layer::Ai,
        ]
    }

    /// Layers whose tools can emit executable counterexample traces.
    pub fn produces_counterexamples(&self) -> bool {
        matches!(self, Layer::Fuzzing | Layer::Symbolic | Layer::Formal)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Fuzzing => write!(f, "fuzzing"),
            Self::Symbolic => write!(f, "symbolic"),
            Self::Formal => write!(f, "formal"),
            Self::Ai => write!(f, "ai"),
        }
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "static" => Ok(Layer::Static),
            "fuzzing" => Ok(Layer::Fuzzing),
            "symbolic" => Ok(Layer::Symbolic),
            "formal" => Ok(Layer::Formal),
            "ai" => Ok(Layer::Ai),
            other => Err(format!("unknown analysis layer: {other}")),
        }
    }
}

/// Analysis target, already resolved by outside collaborators (CLI, fetcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    /// A local source tree of Solidity contracts.
    Source { root: PathBuf },
    /// A deployed contract fetched from a chain explorer.
    Deployed {
        chain: String,
        address: String,
        bytecode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        abi: Option<String>,
    },
}

impl Target {
    pub fn source_root(&self) -> Option<&PathBuf> {
        match self {
            Target::Source { root } => Some(root),
            Target::Deployed { .. } => None,
        }
    }

    /// Bytecode used to key exploit verdicts; for source targets the tree root
    /// path stands in, since the compiled artifact is sandbox-internal.
    pub fn bytecode_key(&self) -> String {
        match self {
            Target::Source { root } => root.display().to_string(),
            Target::Deployed { bytecode, .. } => bytecode.clone(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Target::Source { root } => root.display().to_string(),
            Target::Deployed { chain, address, .. } => format!("{chain}:{address}"),
        }
    }
}

/// Exploit validation configuration: which classes are candidates and the
/// confidence bar a group must clear before a proof-of-concept is attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploitConfig {
    pub enabled: bool,

    pub candidate_classes: Vec<String>,

    pub confidence_threshold: f64,

    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    pub max_memory_mb: u64,
}

impl Default for ExploitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidate_classes: vec![
                "reentrancy".to_string(),
                "access-control".to_string(),
                "unchecked-call".to_string(),
                "delegatecall".to_string(),
                "integer-overflow".to_string(),
            ],
            confidence_threshold: 0.7,
            timeout: Duration::from_secs(120),
            max_memory_mb: 4096,
        }
    }
}

/// One analysis run. Immutable after creation; the configuration is threaded
/// through the pipeline explicitly rather than held in process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub target: Target,

    pub layers: BTreeSet<Layer>,

    /// Per-layer budget. When unset, each adapter's own default applies.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "duration_secs_opt")]
    pub timeout_per_layer: Option<Duration>,

    pub max_workers: usize,

    pub confidence_threshold: f64,

    /// Per-tool trust weights in [0,1]; tools absent from the map fall back
    /// to [`AnalysisJob::DEFAULT_TRUST_WEIGHT`].
    pub tool_trust_weights: HashMap<String, f64>,

    pub max_retries: u32,

    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,

    pub min_severity: Severity,

    /// Fraction of the smaller line range that must overlap for two findings
    /// to correlate on location.
    pub overlap_fraction: f64,

    pub exploit: ExploitConfig,
}

impl AnalysisJob {
    pub const DEFAULT_TRUST_WEIGHT: f64 = 0.7;

    pub fn new(target: Target) -> Self {
        Self {
            target,
            layers: [Layer::Static, Layer::Fuzzing].into_iter().collect(),
            timeout_per_layer: None,
            max_workers: 4,
            confidence_threshold: 0.7,
            tool_trust_weights: Self::default_trust_weights(),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            min_severity: Severity::Informational,
            overlap_fraction: 0.5,
            exploit: ExploitConfig::default(),
        }
    }

    pub fn with_layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.layers = layers.into_iter().collect();
        self
    }

    pub fn with_timeout_per_layer(mut self, timeout: Duration) -> Self {
        self.timeout_per_layer = Some(timeout);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self.exploit.confidence_threshold = self.confidence_threshold;
        self
    }

    pub fn with_trust_weight(mut self, tool: &str, weight: f64) -> Self {
        self.tool_trust_weights
            .insert(tool.to_string(), weight.clamp(0.0, 1.0));
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn trust_weight(&self, tool: &str) -> f64 {
        self.tool_trust_weights
            .get(tool)
            .copied()
            .unwrap_or(Self::DEFAULT_TRUST_WEIGHT)
    }

    /// AI review defaults low: non-deterministic output needs corroboration
    /// before it can carry a group on its own.
    pub fn default_trust_weights() -> HashMap<String, f64> {
        [
            ("slither", 0.9),
            ("mythril", 0.85),
            ("echidna", 0.85),
            ("halmos", 0.8),
            ("ai-review", 0.5),
        ]
        .into_iter()
        .map(|(tool, weight)| (tool.to_string(), weight))
        .collect()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.map(Duration::from_secs_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_roundtrip() {
        for layer in Layer::all() {
            let parsed: Layer = layer.to_string().parse().unwrap();
            assert_eq!(parsed, layer);
        }
        assert!("quantum".parse::<Layer>().is_err());
    }

    #[test]
    fn test_trust_weight_fallback() {
        let job = AnalysisJob::new(Target::Source {
            root: PathBuf::from("contracts"),
        });
        assert_eq!(job.trust_weight("slither"), 0.9);
        assert_eq!(
            job.trust_weight("brand-new-tool"),
            AnalysisJob::DEFAULT_TRUST_WEIGHT
        );
    }
}
