//! Core data model for the analysis pipeline.
//!
//! The canonical schema every tool's output is normalized into: findings with
//! collision-free namespaced ids, a unified 5-level severity ordinal, and the
//! shared SWC/class-equivalence tables that both the normalizer and the
//! correlator consult.

pub mod cancel;
pub mod finding;
pub mod job;
pub mod severity;
pub mod swc;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use finding::{
    Finding, FindingId, FindingLocation, RawLocation, SourceLocation, ToolFinding,
};
pub use job::{AnalysisJob, ExploitConfig, Layer, Target};
pub use severity::Severity;
