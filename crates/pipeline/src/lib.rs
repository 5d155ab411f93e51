//! Orchestration and correlation core for multi-tool smart contract
//! vulnerability analysis.
//!
//! Independent analysis layers (static, fuzzing, symbolic, formal, AI review)
//! run through sandboxed tool adapters under concurrency and retry budgets.
//! Their raw output is normalized into canonical findings, correlated across
//! tools, scored by cross-layer agreement, optionally exploit-validated in an
//! isolated sandbox, and aggregated into a deterministic report.
//!
//! ```no_run
//! use vulnhunter_pipeline::{AnalysisJob, Layer, Pipeline, Target};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let job = AnalysisJob::new(Target::Source {
//!     root: "contracts".into(),
//! })
//! .with_layers([Layer::Static, Layer::Symbolic]);
//!
//! let report = Pipeline::new().run(&job).await?;
//! println!("{}", report.render_summary());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod confidence;
pub mod core;
pub mod correlate;
pub mod error;
pub mod exploit;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod scheduler;

pub use adapter::{AdapterRegistry, AdapterRegistryBuilder, ToolAdapter};
pub use confidence::ConfidenceScorer;
pub use core::{AnalysisJob, CancelHandle, CancelToken, ExploitConfig, Finding, Layer, Severity, Target};
pub use correlate::{CorrelationGroup, Correlator};
pub use error::PipelineError;
pub use exploit::{ExploitAttempt, ExploitValidator, Verdict};
pub use normalize::Normalizer;
pub use pipeline::Pipeline;
pub use report::{PipelineReport, ReportBuilder};
pub use scheduler::{LayerResult, LayerScheduler, LayerStatus};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
