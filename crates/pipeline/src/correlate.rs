//! Correlator: partitions canonical findings into groups that describe the
//! same underlying vulnerability.
//!
//! The partition is a pure function of the unordered finding set. Findings
//! are first put into a canonical order by id, then clustered with union-find
//! over a pairwise relation, so any arrival permutation of layer results
//! yields the same groups.
//!
//! Two resolved, mapped findings correlate when their line ranges overlap by
//! at least the configured fraction of the smaller range AND their classes are
//! equivalent. Unresolved-location or unmapped-class findings are never merged
//! on overlap guesswork: they join a group only when another tool reported the
//! identical rule id.

use crate::core::{swc, Finding, FindingId, Severity, SourceLocation};
use crate::exploit::Verdict;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    /// Minimum overlap as a fraction of the smaller line range.
    pub overlap_fraction: f64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            overlap_fraction: 0.5,
        }
    }
}

/// Cluster of findings judged equivalent, with the merged canonical verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationGroup {
    pub id: String,

    /// Most specific class shared by every member.
    pub class: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub swc: Option<String>,

    /// Max of member severities: a stronger signal is never suppressed.
    pub severity: Severity,

    /// Union of member descriptions.
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,

    pub contributing_findings: Vec<FindingId>,

    /// Set by the confidence scorer; a confirmed exploit verdict overrides it
    /// to the maximum afterwards.
    pub confidence: f64,

    /// Verdict of the exploit validation attempt against this group, when one
    /// ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploit_verdict: Option<Verdict>,

    #[serde(skip)]
    pub members: Vec<Finding>,
}

impl CorrelationGroup {
    pub fn tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self.members.iter().map(|f| f.tool.as_str()).collect();
        tools.sort();
        tools.dedup();
        tools
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Singleton whose sole member is unresolved or unmapped; listed apart
    /// from the main report body and capped in confidence.
    pub fn is_unconfirmed_outlier(&self) -> bool {
        self.is_singleton()
            && self
                .members
                .first()
                .is_some_and(|f| !f.is_resolved() || f.is_unmapped())
    }

    /// Counterexample evidence from a member of a trace-producing layer, for
    /// the exploit validator.
    pub fn counterexample(&self) -> Option<(&str, &str)> {
        self.members
            .iter()
            .filter(|f| f.layer.produces_counterexamples())
            .find_map(|f| f.evidence.as_deref().map(|e| (f.tool.as_str(), e)))
    }
}

pub struct Correlator {
    config: CorrelatorConfig,
}

impl Correlator {
    pub fn new(config: CorrelatorConfig) -> Self {
        Self { config }
    }

    pub fn with_overlap_fraction(overlap_fraction: f64) -> Self {
        Self::new(CorrelatorConfig {
            overlap_fraction: overlap_fraction.clamp(0.0, 1.0),
        })
    }

    /// Partition `findings` into correlation groups. Commutative and
    /// associative over the input: the result depends only on the set.
    pub fn correlate(&self, mut findings: Vec<Finding>) -> Vec<CorrelationGroup> {
        // Canonical order makes the union-find result independent of arrival
        // order.
        findings.sort_by(|a, b| a.id.cmp(&b.id));

        let n = findings.len();
        let mut parent: Vec<usize> = (0..n).collect();

        fn root(parent: &mut Vec<usize>, mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for i in 0..n {
            for j in (i + 1)..n {
                if self.related(&findings[i], &findings[j]) {
                    let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
                    if ri != rj {
                        // Smaller root wins so group identity is stable.
                        let (lo, hi) = if ri < rj { (ri, rj) } else { (rj, ri) };
                        parent[hi] = lo;
                    }
                }
            }
        }

        let mut clusters: Vec<Vec<Finding>> = Vec::new();
        let mut cluster_of: Vec<Option<usize>> = vec![None; n];
        for (i, finding) in findings.into_iter().enumerate() {
            let r = root(&mut parent, i);
            let idx = match cluster_of[r] {
                Some(idx) => idx,
                None => {
                    clusters.push(Vec::new());
                    cluster_of[r] = Some(clusters.len() - 1);
                    clusters.len() - 1
                }
            };
            clusters[idx].push(finding);
        }

        clusters
            .into_iter()
            .enumerate()
            .map(|(seq, members)| Self::merge(seq, members))
            .collect()
    }

    /// Pairwise equivalence relation. Symmetric by construction.
    fn related(&self, a: &Finding, b: &Finding) -> bool {
        let a_weak = !a.is_resolved() || a.is_unmapped();
        let b_weak = !b.is_resolved() || b.is_unmapped();

        if a_weak || b_weak {
            // Only an identical rule id reported by different tools confirms
            // equivalence for weak findings.
            return a.rule_id == b.rule_id && a.tool != b.tool;
        }

        if !swc::classes_equivalent(&a.class, &b.class) {
            return false;
        }

        let (Some(loc_a), Some(loc_b)) = (a.location.resolved(), b.location.resolved()) else {
            return false;
        };
        let overlap = loc_a.overlap_lines(loc_b);
        if overlap == 0 {
            return false;
        }
        let smaller = loc_a.line_count().min(loc_b.line_count()).max(1);
        (overlap as f64) / (smaller as f64) >= self.config.overlap_fraction
    }

    fn merge(sequence: usize, members: Vec<Finding>) -> CorrelationGroup {
        debug_assert!(!members.is_empty());

        let severity = members
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Informational);

        let class = members
            .iter()
            .skip(1)
            .fold(members[0].class.clone(), |acc, f| {
                swc::shared_class(&acc, &f.class)
            });
        let swc_code = members
            .iter()
            .find_map(|f| f.swc.clone())
            .or_else(|| swc::swc_for_class(&class).map(str::to_string));

        let mut descriptions: Vec<&str> = Vec::new();
        for member in &members {
            let text = member.description.trim();
            if !text.is_empty() && !descriptions.contains(&text) {
                descriptions.push(text);
            }
        }

        // Location of the highest-severity resolved member.
        let location = members
            .iter()
            .filter(|f| f.is_resolved())
            .max_by_key(|f| f.severity)
            .and_then(|f| f.location.resolved())
            .cloned();

        let contributing_findings: Vec<FindingId> = members.iter().map(|f| f.id.clone()).collect();

        CorrelationGroup {
            id: format!("group-{:04}", sequence),
            class,
            swc: swc_code,
            severity,
            description: descriptions.join("\n"),
            location,
            contributing_findings,
            confidence: 0.0,
            exploit_verdict: None,
            members,
        }
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(CorrelatorConfig::default())
    }
}
