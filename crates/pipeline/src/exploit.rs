//! Exploit validator: re-executes proof-of-concept exploits for high-risk
//! correlation groups inside an ephemeral, network-isolated sandbox.
//!
//! Only groups whose class is on the candidate allowlist and whose confidence
//! clears the configured threshold are attempted. The PoC comes from a
//! counterexample trace a fuzzing/symbolic/formal layer already produced, or
//! failing that from a pluggable harness generator. Verdicts are cached by
//! (PoC, target bytecode) so re-validation is deterministic, and an
//! inconclusive sandbox run never changes a group's confidence.

use crate::adapter::sandbox::{ExecOutput, ExecSpec, Sandbox};
use crate::core::{swc, CancelToken, ExploitConfig, Target};
use crate::correlate::CorrelationGroup;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Marker the PoC harness prints when the exploit condition is reached.
const EXPLOIT_MARKER: &str = "EXPLOIT_CONFIRMED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// The PoC achieved the exploit condition.
    Confirmed,
    /// The PoC ran to completion without achieving it.
    NotReproduced,
    /// The sandbox crashed or timed out; never promoted to confirmed.
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PocOrigin {
    /// Counterexample trace supplied by a layer result.
    Counterexample,
    /// Produced by the templated harness generator.
    GeneratedHarness,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocSource {
    pub origin: PocOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_tool: Option<String>,

    pub script: String,
}

/// One recorded validation attempt. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploitAttempt {
    pub group_id: String,

    pub poc: PocSource,

    pub verdict: Verdict,

    pub duration_ms: u64,

    /// Memory ceiling the sandboxed run was given.
    pub memory_limit_mb: u64,

    pub timestamp: DateTime<Utc>,
}

/// External collaborator that synthesizes a PoC when no counterexample
/// exists. The generation strategy is deliberately outside the validator's
/// contract.
pub trait HarnessGenerator: Send + Sync {
    fn generate(&self, group: &CorrelationGroup, target: &Target) -> Option<PocSource>;
}

/// Minimal built-in generator: emits a class-specific Foundry-style harness
/// aimed at the group's location.
pub struct TemplateHarnessGenerator;

impl HarnessGenerator for TemplateHarnessGenerator {
    fn generate(&self, group: &CorrelationGroup, target: &Target) -> Option<PocSource> {
        let function = group
            .location
            .as_ref()
            .and_then(|loc| loc.function.clone())
            .unwrap_or_else(|| "fallback".to_string());
        let script = format!(
            "// auto-generated harness for {class}\n\
             // target: {target}\n\
             contract Poc {{\n\
                 function run() external {{\n\
                     attack_{class_ident}(\"{function}\");\n\
                 }}\n\
             }}\n",
            class = group.class,
            target = target.describe(),
            class_ident = group.class.replace('-', "_"),
            function = function,
        );
        Some(PocSource {
            origin: PocOrigin::GeneratedHarness,
            from_tool: None,
            script,
        })
    }
}

pub struct ExploitValidator {
    sandbox: Arc<dyn Sandbox>,
    generator: Box<dyn HarnessGenerator>,
    config: ExploitConfig,
    image: String,
    /// (PoC, bytecode) hash -> verdict. Entries live for the validator's
    /// lifetime so repeated validation of the same pair is reproducible.
    verdict_cache: Mutex<HashMap<u64, Verdict>>,
}

impl ExploitValidator {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: ExploitConfig) -> Self {
        Self {
            sandbox,
            generator: Box::new(TemplateHarnessGenerator),
            config,
            image: "ghcr.io/foundry-rs/foundry:latest".to_string(),
            verdict_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn HarnessGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// A group qualifies when its class family is allowlisted and its
    /// confidence clears the threshold.
    pub fn is_candidate(&self, group: &CorrelationGroup) -> bool {
        if !self.config.enabled || group.confidence < self.config.confidence_threshold {
            return false;
        }
        self.config
            .candidate_classes
            .iter()
            .any(|candidate| swc::classes_equivalent(candidate, &group.class))
    }

    /// Validate every candidate group, mutating confirmed groups' confidence
    /// to the maximum. Returns the recorded attempts.
    pub async fn validate_all(
        &self,
        groups: &mut [CorrelationGroup],
        target: &Target,
        cancel: &CancelToken,
    ) -> Vec<ExploitAttempt> {
        let mut attempts = Vec::new();
        for group in groups.iter_mut() {
            if cancel.is_cancelled() {
                break;
            }
            if !self.is_candidate(group) {
                continue;
            }
            let Some(poc) = self.obtain_poc(group, target) else {
                continue;
            };
            let attempt = self.attempt(group, &poc, target, cancel).await;
            if attempt.verdict == Verdict::Confirmed {
                group.confidence = 1.0;
            }
            attempts.push(attempt);
        }
        attempts
    }

    fn obtain_poc(&self, group: &CorrelationGroup, target: &Target) -> Option<PocSource> {
        if let Some((tool, trace)) = group.counterexample() {
            return Some(PocSource {
                origin: PocOrigin::Counterexample,
                from_tool: Some(tool.to_string()),
                script: trace.to_string(),
            });
        }
        self.generator.generate(group, target)
    }

    async fn attempt(
        &self,
        group: &CorrelationGroup,
        poc: &PocSource,
        target: &Target,
        cancel: &CancelToken,
    ) -> ExploitAttempt {
        let key = Self::cache_key(&poc.script, &target.bytecode_key());
        if let Some(verdict) = self.verdict_cache.lock().get(&key).copied() {
            return ExploitAttempt {
                group_id: group.id.clone(),
                poc: poc.clone(),
                verdict,
                duration_ms: 0,
                memory_limit_mb: self.config.max_memory_mb,
                timestamp: Utc::now(),
            };
        }

        let (verdict, duration) = match self.execute_poc(poc, target, cancel).await {
            Ok(output) => (Self::judge(&output), output.duration),
            Err(e) => {
                warn!(group = %group.id, error = %e, "exploit sandbox fault");
                (Verdict::Inconclusive, Duration::ZERO)
            }
        };

        info!(group = %group.id, ?verdict, "exploit validation finished");
        self.verdict_cache.lock().insert(key, verdict);

        ExploitAttempt {
            group_id: group.id.clone(),
            poc: poc.clone(),
            verdict,
            duration_ms: duration.as_millis() as u64,
            memory_limit_mb: self.config.max_memory_mb,
            timestamp: Utc::now(),
        }
    }

    async fn execute_poc(
        &self,
        poc: &PocSource,
        target: &Target,
        cancel: &CancelToken,
    ) -> anyhow::Result<ExecOutput> {
        let workspace = tempfile::tempdir()?;
        std::fs::write(workspace.path().join("poc.txt"), &poc.script)?;
        if let Target::Deployed { bytecode, .. } = target {
            std::fs::write(workspace.path().join("bytecode.hex"), bytecode)?;
        }

        let spec = ExecSpec::new(
            &self.image,
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "run-poc /sandbox/poc.txt".to_string(),
            ],
        )
        .mount(workspace.path().to_path_buf(), "/sandbox")
        .with_memory_mb(self.config.max_memory_mb);

        let output = self
            .sandbox
            .execute(&spec, self.config.timeout, cancel)
            .await?;
        drop(workspace);
        Ok(output)
    }

    fn judge(output: &ExecOutput) -> Verdict {
        if output.timed_out {
            return Verdict::Inconclusive;
        }
        match output.exit_code {
            Some(0) => {
                if output.stdout.contains(EXPLOIT_MARKER) {
                    Verdict::Confirmed
                } else {
                    Verdict::NotReproduced
                }
            }
            // The harness exits 1 when the exploit assertion fails cleanly.
            Some(1) => Verdict::NotReproduced,
            _ => Verdict::Inconclusive,
        }
    }

    fn cache_key(script: &str, bytecode: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        script.hash(&mut hasher);
        bytecode.hash(&mut hasher);
        hasher.finish()
    }
}
