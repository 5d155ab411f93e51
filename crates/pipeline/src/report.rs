//! Report aggregation: assembles the final machine-readable verdict of one
//! analysis run.
//!
//! Correlation groups are ordered severity-first, then confidence, then
//! location, so two runs over the same target render identically.
//! Unconfirmed outliers (unresolved or unmapped singletons) are listed apart
//! from the main body instead of being dropped.

use crate::core::{AnalysisJob, Finding, Layer, Severity};
use crate::correlate::CorrelationGroup;
use crate::exploit::{ExploitAttempt, Verdict};
use crate::scheduler::{LayerResult, LayerStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-tool execution summary, keyed by `layer/tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSummary {
    pub layer: Layer,
    pub tool: String,
    pub status: LayerStatus,
    pub duration_ms: u64,
    pub finding_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub id: Uuid,

    pub generated_at: DateTime<Utc>,

    pub engine_version: String,

    pub target: String,

    /// Aggregate 0-10 risk score over the reported groups.
    pub risk_score: f64,

    pub groups: Vec<CorrelationGroup>,

    /// Singleton findings with unresolved locations or unmapped classes.
    /// Reported, never silently discarded.
    pub unconfirmed_outliers: Vec<Finding>,

    pub exploit_attempts: Vec<ExploitAttempt>,

    pub layers: BTreeMap<String, LayerSummary>,
}

impl PipelineReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn confirmed_exploits(&self) -> usize {
        self.exploit_attempts
            .iter()
            .filter(|a| a.verdict == Verdict::Confirmed)
            .count()
    }

    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for group in &self.groups {
            *counts.entry(group.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Human-readable single-run summary. Rendering with colors is the
    /// caller's concern.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Analysis of {} ({} groups, risk score {:.1}/10)\n",
            self.target,
            self.groups.len(),
            self.risk_score
        ));
        for summary in self.layers.values() {
            out.push_str(&format!(
                "  [{}] {} -> {:?} in {}ms ({} findings)\n",
                summary.layer, summary.tool, summary.status, summary.duration_ms, summary.finding_count
            ));
        }
        for group in &self.groups {
            let location = group
                .location
                .as_ref()
                .map(|loc| format!("{}:{}-{}", loc.file, loc.start_line, loc.end_line))
                .unwrap_or_else(|| "<unresolved>".to_string());
            out.push_str(&format!(
                "  {} {} {} at {} (confidence {:.2}, tools: {})\n",
                group.id,
                group.severity,
                group.class,
                location,
                group.confidence,
                group.tools().join(", ")
            ));
        }
        if !self.unconfirmed_outliers.is_empty() {
            out.push_str(&format!(
                "  {} unconfirmed outlier(s) need manual review\n",
                self.unconfirmed_outliers.len()
            ));
        }
        for attempt in &self.exploit_attempts {
            out.push_str(&format!(
                "  exploit {}: {:?}\n",
                attempt.group_id, attempt.verdict
            ));
        }
        out
    }
}

pub struct ReportBuilder {
    target: String,
    min_severity: Severity,
}

impl ReportBuilder {
    pub fn for_job(job: &AnalysisJob) -> Self {
        Self {
            target: job.target.describe(),
            min_severity: job.min_severity,
        }
    }

    pub fn build(
        &self,
        groups: Vec<CorrelationGroup>,
        layer_results: &[LayerResult],
        exploit_attempts: Vec<ExploitAttempt>,
    ) -> PipelineReport {
        let (mut reported, outlier_groups): (Vec<_>, Vec<_>) = groups
            .into_iter()
            .filter(|g| g.severity >= self.min_severity)
            .partition(|g| !g.is_unconfirmed_outlier());

        for group in reported.iter_mut() {
            group.exploit_verdict = exploit_attempts
                .iter()
                .find(|attempt| attempt.group_id == group.id)
                .map(|attempt| attempt.verdict);
        }

        // Severity desc, confidence desc, then location for a stable order.
        reported.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then_with(|| Self::location_key(a).cmp(&Self::location_key(b)))
                .then(a.id.cmp(&b.id))
        });

        let mut unconfirmed_outliers: Vec<Finding> = outlier_groups
            .into_iter()
            .flat_map(|g| g.members)
            .collect();
        unconfirmed_outliers.sort_by(|a, b| a.id.cmp(&b.id));

        let risk_score = Self::risk_score(&reported);

        let layers = layer_results
            .iter()
            .map(|result| {
                (
                    format!("{}/{}", result.layer, result.tool),
                    LayerSummary {
                        layer: result.layer,
                        tool: result.tool.clone(),
                        status: result.status,
                        duration_ms: result.duration.as_millis() as u64,
                        finding_count: result.findings.len(),
                    },
                )
            })
            .collect();

        PipelineReport {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            target: self.target.clone(),
            risk_score,
            groups: reported,
            unconfirmed_outliers,
            exploit_attempts,
            layers,
        }
    }

    fn location_key(group: &CorrelationGroup) -> (String, u32) {
        group
            .location
            .as_ref()
            .map(|loc| (loc.file.clone(), loc.start_line))
            .unwrap_or_else(|| (String::from("~"), u32::MAX))
    }

    /// 0-10 aggregate: the worst confidence-weighted group dominates, every
    /// further group adds a diminishing share of its own weight.
    fn risk_score(groups: &[CorrelationGroup]) -> f64 {
        let mut contributions: Vec<f64> = groups
            .iter()
            .map(|g| g.severity.risk_weight() * g.confidence)
            .collect();
        contributions.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let mut score = 0.0;
        let mut share = 1.0;
        for contribution in contributions {
            score += contribution * share;
            share *= 0.3;
        }
        score.min(10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Finding, FindingId, FindingLocation, SourceLocation, Target,
    };
    use std::path::PathBuf;
    use std::time::Duration;

    fn member(tool: &str, layer: Layer, severity: Severity, resolved: bool) -> Finding {
        let location = if resolved {
            FindingLocation::Resolved(SourceLocation::new("Vault.sol", 10, 15))
        } else {
            FindingLocation::Unresolved {
                file: None,
                byte_start: None,
                byte_end: None,
            }
        };
        Finding {
            id: FindingId::new(tool, layer, 0),
            tool: tool.to_string(),
            layer,
            class: "reentrancy".to_string(),
            swc: Some("SWC-107".to_string()),
            severity,
            location,
            description: String::new(),
            rule_id: format!("{tool}:reentrancy"),
            evidence: None,
        }
    }

    fn group(id: &str, severity: Severity, confidence: f64, members: Vec<Finding>) -> CorrelationGroup {
        let contributing_findings = members.iter().map(|f| f.id.clone()).collect();
        let location = members
            .iter()
            .find_map(|f| f.location.resolved())
            .cloned();
        CorrelationGroup {
            id: id.to_string(),
            class: "reentrancy".to_string(),
            swc: Some("SWC-107".to_string()),
            severity,
            description: String::new(),
            location,
            contributing_findings,
            confidence,
            exploit_verdict: None,
            members,
        }
    }

    fn builder() -> ReportBuilder {
        ReportBuilder::for_job(&AnalysisJob::new(Target::Source {
            root: PathBuf::from("contracts"),
        }))
    }

    #[test]
    fn test_groups_ordered_by_severity_then_confidence() {
        let groups = vec![
            group("group-0000", Severity::Medium, 0.9, vec![member("slither", Layer::Static, Severity::Medium, true)]),
            group("group-0001", Severity::Critical, 0.6, vec![member("mythril", Layer::Symbolic, Severity::Critical, true)]),
            group("group-0002", Severity::Critical, 0.8, vec![member("echidna", Layer::Fuzzing, Severity::Critical, true)]),
        ];
        let report = builder().build(groups, &[], Vec::new());
        let order: Vec<&str> = report.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(order, ["group-0002", "group-0001", "group-0000"]);
    }

    #[test]
    fn test_outlier_singletons_reported_separately() {
        let groups = vec![
            group("group-0000", Severity::High, 0.8, vec![member("slither", Layer::Static, Severity::High, true)]),
            group("group-0001", Severity::High, 0.4, vec![member("mythril", Layer::Symbolic, Severity::High, false)]),
        ];
        let report = builder().build(groups, &[], Vec::new());
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.unconfirmed_outliers.len(), 1);
        assert_eq!(report.unconfirmed_outliers[0].tool, "mythril");
    }

    #[test]
    fn test_min_severity_filters_groups() {
        let job = AnalysisJob::new(Target::Source {
            root: PathBuf::from("contracts"),
        })
        .with_min_severity(Severity::High);
        let groups = vec![
            group("group-0000", Severity::Low, 0.9, vec![member("slither", Layer::Static, Severity::Low, true)]),
            group("group-0001", Severity::High, 0.9, vec![member("mythril", Layer::Symbolic, Severity::High, true)]),
        ];
        let report = ReportBuilder::for_job(&job).build(groups, &[], Vec::new());
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].id, "group-0001");
    }

    #[test]
    fn test_risk_score_bounded_and_monotone() {
        let critical = group(
            "group-0000",
            Severity::Critical,
            1.0,
            vec![member("slither", Layer::Static, Severity::Critical, true)],
        );
        let low = group(
            "group-0001",
            Severity::Low,
            0.5,
            vec![member("mythril", Layer::Symbolic, Severity::Low, true)],
        );

        let solo = builder().build(vec![critical.clone()], &[], Vec::new());
        let both = builder().build(vec![critical, low], &[], Vec::new());
        assert!(solo.risk_score <= 10.0);
        assert!(both.risk_score >= solo.risk_score);
        assert!(both.risk_score <= 10.0);

        let empty = builder().build(Vec::new(), &[], Vec::new());
        assert_eq!(empty.risk_score, 0.0);
    }

    #[test]
    fn test_layer_summary_tracks_results() {
        let results = vec![
            LayerResult::completed(Layer::Static, "slither", Vec::new(), Duration::from_millis(120)),
            LayerResult::timed_out(Layer::Fuzzing, "echidna", Vec::new(), Duration::from_secs(300)),
        ];
        let report = builder().build(Vec::new(), &results, Vec::new());
        assert_eq!(report.layers.len(), 2);
        let fuzzing = &report.layers["fuzzing/echidna"];
        assert_eq!(fuzzing.status, LayerStatus::Timeout);
        assert_eq!(fuzzing.duration_ms, 300_000);
    }

    #[test]
    fn test_exploit_verdict_lands_on_its_group() {
        use crate::exploit::{ExploitAttempt, PocOrigin, PocSource};
        use chrono::Utc;

        let groups = vec![
            group("group-0000", Severity::High, 1.0, vec![member("mythril", Layer::Symbolic, Severity::High, true)]),
            group("group-0001", Severity::Medium, 0.6, vec![member("slither", Layer::Static, Severity::Medium, true)]),
        ];
        let attempts = vec![ExploitAttempt {
            group_id: "group-0000".to_string(),
            poc: PocSource {
                origin: PocOrigin::Counterexample,
                from_tool: Some("mythril".to_string()),
                script: "withdraw()".to_string(),
            },
            verdict: Verdict::Confirmed,
            duration_ms: 40,
            memory_limit_mb: 4096,
            timestamp: Utc::now(),
        }];
        let report = builder().build(groups, &[], attempts);

        let confirmed = report.groups.iter().find(|g| g.id == "group-0000").unwrap();
        assert_eq!(confirmed.exploit_verdict, Some(Verdict::Confirmed));
        let untried = report.groups.iter().find(|g| g.id == "group-0001").unwrap();
        assert_eq!(untried.exploit_verdict, None);
    }

    #[test]
    fn test_json_roundtrip() {
        let groups = vec![group(
            "group-0000",
            Severity::High,
            0.85,
            vec![member("slither", Layer::Static, Severity::High, true)],
        )];
        let report = builder().build(groups, &[], Vec::new());
        let json = report.to_json().unwrap();
        let parsed: PipelineReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.groups.len(), 1);
        assert_eq!(parsed.engine_version, ENGINE_VERSION);
    }
}
