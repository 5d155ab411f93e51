//! End-to-end analysis pipeline: schedule layers, normalize raw findings,
//! correlate, score, validate exploits, aggregate the report.

use crate::adapter::sandbox::{ContainerSandbox, Sandbox};
use crate::adapter::AdapterRegistry;
use crate::confidence::ConfidenceScorer;
use crate::core::{AnalysisJob, CancelToken};
use crate::correlate::Correlator;
use crate::error::PipelineError;
use crate::exploit::ExploitValidator;
use crate::normalize::Normalizer;
use crate::report::{PipelineReport, ReportBuilder};
use crate::scheduler::LayerScheduler;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct Pipeline {
    registry: Arc<AdapterRegistry>,
    sandbox: Arc<dyn Sandbox>,
}

impl Pipeline {
    /// Pipeline with the default adapters backed by Docker sandboxes.
    pub fn new() -> Self {
        let sandbox: Arc<dyn Sandbox> = Arc::new(ContainerSandbox::new());
        Self {
            registry: Arc::new(AdapterRegistry::with_defaults(sandbox.clone())),
            sandbox,
        }
    }

    pub fn with_parts(registry: Arc<AdapterRegistry>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self { registry, sandbox }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub async fn run(&self, job: &AnalysisJob) -> Result<PipelineReport, PipelineError> {
        self.run_with_cancel(job, &CancelToken::never()).await
    }

    #[instrument(skip_all, fields(target = %job.target.describe()))]
    pub async fn run_with_cancel(
        &self,
        job: &AnalysisJob,
        cancel: &CancelToken,
    ) -> Result<PipelineReport, PipelineError> {
        let scheduler = LayerScheduler::new(self.registry.clone());
        let layer_results = scheduler.run(job, cancel).await?;

        let normalizer = Normalizer::for_target(&job.target);
        let findings = normalizer.normalize_all(&layer_results);
        info!(
            layers = layer_results.len(),
            findings = findings.len(),
            "normalization complete"
        );

        let correlator = Correlator::with_overlap_fraction(job.overlap_fraction);
        let mut groups = correlator.correlate(findings);

        ConfidenceScorer::for_job(job).score_all(&mut groups);

        let validator = ExploitValidator::new(self.sandbox.clone(), job.exploit.clone());
        let exploit_attempts = validator
            .validate_all(&mut groups, &job.target, cancel)
            .await;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let report = ReportBuilder::for_job(job).build(groups, &layer_results, exploit_attempts);
        info!(
            groups = report.groups.len(),
            outliers = report.unconfirmed_outliers.len(),
            risk_score = report.risk_score,
            "analysis complete"
        );
        Ok(report)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
