//! Layer scheduler: runs tool adapter invocations under concurrency, time and
//! retry budgets.
//!
//! Faults are isolated per layer. A crashed adapter records a `failed`
//! result, a timed-out one records `timeout` with any partial findings, and
//! the job as a whole fails only when no layer produces anything. The output
//! is an unordered set of [`LayerResult`]s; downstream stages must not depend
//! on arrival order.

use crate::adapter::{AdapterRegistry, InvokeOptions, ToolAdapter};
use crate::core::{AnalysisJob, CancelToken, Layer, ToolFinding};
use crate::error::PipelineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Completed,
    Failed,
    Timeout,
}

/// Result of one adapter invocation. Append-only: recorded once, never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerResult {
    pub layer: Layer,

    pub tool: String,

    pub status: LayerStatus,

    pub findings: Vec<ToolFinding>,

    #[serde(with = "millis")]
    pub duration: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LayerResult {
    pub fn completed(layer: Layer, tool: &str, findings: Vec<ToolFinding>, duration: Duration) -> Self {
        Self {
            layer,
            tool: tool.to_string(),
            status: LayerStatus::Completed,
            findings,
            duration,
            error: None,
        }
    }

    pub fn timed_out(layer: Layer, tool: &str, partial: Vec<ToolFinding>, duration: Duration) -> Self {
        Self {
            layer,
            tool: tool.to_string(),
            status: LayerStatus::Timeout,
            findings: partial,
            duration,
            error: None,
        }
    }

    pub fn failed(layer: Layer, tool: &str, duration: Duration, error: String) -> Self {
        Self {
            layer,
            tool: tool.to_string(),
            status: LayerStatus::Failed,
            findings: Vec::new(),
            duration,
            error: Some(error),
        }
    }

    /// A result "produced" something if it completed or salvaged findings
    /// before failing/timing out.
    pub fn produced(&self) -> bool {
        self.status == LayerStatus::Completed || !self.findings.is_empty()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub struct LayerScheduler {
    registry: Arc<AdapterRegistry>,
}

impl LayerScheduler {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    /// Run every adapter registered for the job's requested layers.
    ///
    /// Returns the unordered result set, or `PipelineFailed` when every
    /// invocation failed to produce anything.
    pub async fn run(
        &self,
        job: &AnalysisJob,
        cancel: &CancelToken,
    ) -> Result<Vec<LayerResult>, PipelineError> {
        let selected: Vec<Arc<dyn ToolAdapter>> = job
            .layers
            .iter()
            .flat_map(|layer| self.registry.for_layer(*layer))
            .collect();

        if selected.is_empty() {
            return Err(PipelineError::InvalidJob(format!(
                "no registered adapter matches requested layers {:?}",
                job.layers
            )));
        }

        let pool_size = selected.len().min(job.max_workers).max(1);
        let semaphore = Arc::new(Semaphore::new(pool_size));
        let results: Arc<Mutex<Vec<LayerResult>>> = Arc::new(Mutex::new(Vec::new()));

        info!(
            adapters = selected.len(),
            workers = pool_size,
            "dispatching analysis layers"
        );

        let mut handles = Vec::with_capacity(selected.len());
        for adapter in selected {
            let semaphore = semaphore.clone();
            let results = results.clone();
            let cancel = cancel.clone();
            let target = job.target.clone();
            // The job's explicit budget wins; the adapter value is only a
            // default.
            let timeout = job
                .timeout_per_layer
                .unwrap_or_else(|| adapter.default_timeout());
            let max_retries = job.max_retries;
            let backoff = job.retry_backoff;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if cancel.is_cancelled() {
                    return;
                }
                let result = Self::invoke_with_retries(
                    adapter.as_ref(),
                    &target,
                    timeout,
                    max_retries,
                    backoff,
                    &cancel,
                )
                .await;
                results.lock().push(result);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let results = Arc::try_unwrap(results)
            .map(|m| m.into_inner())
            .unwrap_or_else(|arc| arc.lock().clone());

        if !results.iter().any(LayerResult::produced) {
            return Err(PipelineError::PipelineFailed);
        }

        Ok(results)
    }

    /// Invoke one adapter, retrying transient faults with exponential
    /// backoff. Timeouts are terminal (the tool already got its budget), only
    /// `Err` returns are retried.
    async fn invoke_with_retries(
        adapter: &dyn ToolAdapter,
        target: &crate::core::Target,
        timeout: Duration,
        max_retries: u32,
        backoff: Duration,
        cancel: &CancelToken,
    ) -> LayerResult {
        let options = InvokeOptions::new(timeout, cancel.clone());
        // Outer guard for adapters that fail to enforce their own budget.
        let guard = timeout + Duration::from_secs(10);
        let mut attempt = 0u32;

        loop {
            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(guard, adapter.invoke(target, &options)).await;

            match outcome {
                Ok(Ok(result)) => {
                    debug!(
                        tool = adapter.name(),
                        status = ?result.status,
                        findings = result.findings.len(),
                        "adapter invocation finished"
                    );
                    return result;
                }
                Ok(Err(e)) => {
                    if cancel.is_cancelled() || attempt >= max_retries {
                        warn!(tool = adapter.name(), error = %e, "adapter failed");
                        return LayerResult::failed(
                            adapter.layer(),
                            adapter.name(),
                            started.elapsed(),
                            e.to_string(),
                        );
                    }
                    let delay = backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        tool = adapter.name(),
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient adapter failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(_elapsed) => {
                    warn!(tool = adapter.name(), "adapter exceeded its outer timeout guard");
                    return LayerResult::timed_out(
                        adapter.layer(),
                        adapter.name(),
                        Vec::new(),
                        started.elapsed(),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterRegistryBuilder, MockAdapter};
    use crate::core::{cancel_pair, Target};
    use std::path::PathBuf;

    fn job_for(layers: &[Layer]) -> AnalysisJob {
        AnalysisJob::new(Target::Source {
            root: PathBuf::from("contracts"),
        })
        .with_layers(layers.iter().copied())
    }

    #[tokio::test]
    async fn test_failed_layer_does_not_fail_job() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::completing("slither", Layer::Static, 2))
                .with_adapter(MockAdapter::failing("mythril", Layer::Symbolic))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let mut job = job_for(&[Layer::Static, Layer::Symbolic]);
        job.max_retries = 0;

        let results = scheduler.run(&job, &CancelToken::never()).await.unwrap();
        assert_eq!(results.len(), 2);

        let failed = results.iter().find(|r| r.tool == "mythril").unwrap();
        assert_eq!(failed.status, LayerStatus::Failed);
        assert!(failed.error.is_some());

        let completed = results.iter().find(|r| r.tool == "slither").unwrap();
        assert_eq!(completed.status, LayerStatus::Completed);
        assert_eq!(completed.findings.len(), 2);
    }

    #[tokio::test]
    async fn test_all_layers_failed_is_pipeline_failed() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::failing("slither", Layer::Static))
                .with_adapter(MockAdapter::failing("echidna", Layer::Fuzzing))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let mut job = job_for(&[Layer::Static, Layer::Fuzzing]);
        job.max_retries = 0;

        let err = scheduler.run(&job, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, PipelineError::PipelineFailed));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_findings() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::completing("slither", Layer::Static, 1))
                .with_adapter(MockAdapter::timing_out("echidna", Layer::Fuzzing, 3))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let job = job_for(&[Layer::Static, Layer::Fuzzing]);

        let results = scheduler.run(&job, &CancelToken::never()).await.unwrap();
        let fuzzing = results.iter().find(|r| r.tool == "echidna").unwrap();
        assert_eq!(fuzzing.status, LayerStatus::Timeout);
        assert_eq!(fuzzing.findings.len(), 3);

        let statik = results.iter().find(|r| r.tool == "slither").unwrap();
        assert_eq!(statik.status, LayerStatus::Completed);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::flaky("slither", Layer::Static, 1, 2))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let mut job = job_for(&[Layer::Static]);
        job.max_retries = 2;
        job.retry_backoff = Duration::from_millis(1);

        let results = scheduler.run(&job, &CancelToken::never()).await.unwrap();
        assert_eq!(results[0].status, LayerStatus::Completed);
        assert_eq!(results[0].findings.len(), 2);
    }

    #[tokio::test]
    async fn test_job_timeout_overrides_adapter_default() {
        // A timed-out mock reports the budget it was handed as its duration.
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::timing_out("echidna", Layer::Fuzzing, 1))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let job = job_for(&[Layer::Fuzzing]).with_timeout_per_layer(Duration::from_secs(60));

        let results = scheduler.run(&job, &CancelToken::never()).await.unwrap();
        assert_eq!(results[0].duration, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_adapter_default_timeout_applies_when_job_has_none() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::timing_out("echidna", Layer::Fuzzing, 1))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let job = job_for(&[Layer::Fuzzing]);
        assert!(job.timeout_per_layer.is_none());

        let results = scheduler.run(&job, &CancelToken::never()).await.unwrap();
        // MockAdapter::default_timeout is 30s.
        assert_eq!(results[0].duration, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unknown_layer_is_invalid_job() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::completing("slither", Layer::Static, 1))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let job = job_for(&[Layer::Formal]);

        let err = scheduler.run(&job, &CancelToken::never()).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidJob(_)));
    }

    #[tokio::test]
    async fn test_cancellation_surfaces() {
        let registry = Arc::new(
            AdapterRegistryBuilder::new()
                .with_adapter(MockAdapter::hanging("echidna", Layer::Fuzzing))
                .build(),
        );
        let scheduler = LayerScheduler::new(registry);
        let job = job_for(&[Layer::Fuzzing]);

        let (handle, token) = cancel_pair();
        let run = scheduler.run(&job, &token);
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("should not finish before cancel"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => handle.cancel(),
        }
        let err = run.await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
