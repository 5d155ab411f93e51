use thiserror::Error;

/// Job-level failures. Per-layer faults never surface here: a crashed or
/// timed-out adapter is recorded in its `LayerResult` and the pipeline
/// continues. The job itself fails only for the reasons below.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every requested layer failed to produce any result. Distinct from an
    /// empty-findings success.
    #[error("all requested analysis layers failed to produce results")]
    PipelineFailed,

    #[error("analysis job was cancelled")]
    Cancelled,

    #[error("invalid analysis job: {0}")]
    InvalidJob(String),
}
