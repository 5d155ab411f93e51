//! Confidence scorer: turns cross-tool and cross-layer agreement into a
//! score in [0,1] per correlation group.
//!
//! The combination is a noisy-or over the distinct contributing tools'
//! trust weights, then a diversity bonus taken as a fraction of the remaining
//! headroom when agreeing tools span multiple layer categories. Both steps
//! only ever add, so the score is monotonically non-decreasing in the set of
//! independent agreeing findings.

use crate::correlate::CorrelationGroup;
use crate::core::{AnalysisJob, Layer};
use std::collections::{BTreeSet, HashMap};

/// Score at or above which a group counts as confirmed-tier. Capped signals
/// stay below it until corroborated or exploit-validated.
pub const CONFIRMED_TIER: f64 = 0.8;

/// Ceiling a single agreeing signal can contribute: even a fully trusted
/// tool alone never clears the confirmed tier.
const SINGLE_SIGNAL_CEILING: f64 = 0.55;

/// Headroom fraction added per additional distinct layer category.
const LAYER_DIVERSITY_BONUS: f64 = 0.1;
const MAX_DIVERSITY_BONUS: f64 = 0.3;

/// Cap for singleton findings with unresolved locations or unmapped classes.
const OUTLIER_CAP: f64 = 0.5;

/// Cap for groups corroborated only by AI review.
const AI_ONLY_CAP: f64 = 0.75;

pub struct ConfidenceScorer {
    trust_weights: HashMap<String, f64>,
    default_weight: f64,
}

impl ConfidenceScorer {
    pub fn new(trust_weights: HashMap<String, f64>) -> Self {
        Self {
            trust_weights,
            default_weight: AnalysisJob::DEFAULT_TRUST_WEIGHT,
        }
    }

    pub fn for_job(job: &AnalysisJob) -> Self {
        Self::new(job.tool_trust_weights.clone())
    }

    pub fn score_all(&self, groups: &mut [CorrelationGroup]) {
        for group in groups.iter_mut() {
            group.confidence = self.score(group);
        }
    }

    pub fn score(&self, group: &CorrelationGroup) -> f64 {
        let tools: BTreeSet<&str> = group.members.iter().map(|f| f.tool.as_str()).collect();
        let layers: BTreeSet<Layer> = group.members.iter().map(|f| f.layer).collect();

        let mut disbelief = 1.0;
        for tool in &tools {
            let weight = self
                .trust_weights
                .get(*tool)
                .copied()
                .unwrap_or(self.default_weight)
                .clamp(0.0, 1.0);
            disbelief *= 1.0 - SINGLE_SIGNAL_CEILING * weight;
        }
        let base = 1.0 - disbelief;

        let bonus =
            ((layers.len().saturating_sub(1)) as f64 * LAYER_DIVERSITY_BONUS).min(MAX_DIVERSITY_BONUS);
        let mut score = base + (1.0 - base) * bonus;

        if group.is_unconfirmed_outlier() {
            score = score.min(OUTLIER_CAP);
        }
        if layers.iter().all(|l| *l == Layer::Ai) {
            score = score.min(AI_ONLY_CAP);
        }

        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::swc;
    use crate::core::{Finding, FindingId, FindingLocation, Severity, SourceLocation};

    fn member(tool: &str, layer: Layer, resolved: bool) -> Finding {
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
            swc: swc::swc_for_class("reentrancy").map(str::to_string),
            severity: Severity::High,
            location,
            description: String::new(),
            rule_id: format!("{tool}:reentrancy"),
            evidence: None,
        }
    }

    fn group_of(members: Vec<Finding>) -> CorrelationGroup {
        let contributing_findings = members.iter().map(|f| f.id.clone()).collect();
        CorrelationGroup {
            id: "group-0000".to_string(),
            class: "reentrancy".to_string(),
            swc: Some("SWC-107".to_string()),
            severity: Severity::High,
            description: String::new(),
            location: Some(SourceLocation::new("Vault.sol", 10, 15)),
            contributing_findings,
            confidence: 0.0,
            exploit_verdict: None,
            members,
        }
    }

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(AnalysisJob::default_trust_weights())
    }

    #[test]
    fn test_agreement_beats_standalone() {
        let scorer = scorer();
        let solo_static = scorer.score(&group_of(vec![member("slither", Layer::Static, true)]));
        let solo_symbolic = scorer.score(&group_of(vec![member("mythril", Layer::Symbolic, true)]));
        let agreed = scorer.score(&group_of(vec![
            member("slither", Layer::Static, true),
            member("mythril", Layer::Symbolic, true),
        ]));
        assert!(agreed > solo_static);
        assert!(agreed > solo_symbolic);
    }

    #[test]
    fn test_monotonic_in_agreeing_findings() {
        let scorer = scorer();
        let mut members = vec![member("slither", Layer::Static, true)];
        let mut previous = scorer.score(&group_of(members.clone()));

        for (tool, layer) in [
            ("mythril", Layer::Symbolic),
            ("echidna", Layer::Fuzzing),
            ("halmos", Layer::Formal),
            ("ai-review", Layer::Ai),
        ] {
            members.push(member(tool, layer, true));
            let next = scorer.score(&group_of(members.clone()));
            assert!(
                next >= previous,
                "adding {tool} lowered confidence: {next} < {previous}"
            );
            previous = next;
        }
    }

    #[test]
    fn test_cross_layer_scores_higher_than_same_layer() {
        // Same trust weights, one pair within a layer, one across layers.
        let weights: HashMap<String, f64> =
            [("a", 0.8), ("b", 0.8)].map(|(t, w)| (t.to_string(), w)).into();
        let scorer_eq = ConfidenceScorer::new(weights);

        let same_layer = scorer_eq.score(&group_of(vec![
            member("a", Layer::Static, true),
            member("b", Layer::Static, true),
        ]));
        let cross_layer = scorer_eq.score(&group_of(vec![
            member("a", Layer::Static, true),
            member("b", Layer::Symbolic, true),
        ]));
        assert!(cross_layer > same_layer);
    }

    #[test]
    fn test_single_tool_stays_below_confirmed_tier() {
        let scorer = scorer();
        let solo = scorer.score(&group_of(vec![member("slither", Layer::Static, true)]));
        assert!(solo < CONFIRMED_TIER);
    }

    #[test]
    fn test_unresolved_singleton_is_capped() {
        let scorer = scorer();
        let capped = scorer.score(&group_of(vec![member("mythril", Layer::Symbolic, false)]));
        assert!(capped <= OUTLIER_CAP);
    }

    #[test]
    fn test_ai_only_group_is_capped() {
        let weights: HashMap<String, f64> = [("ai-review".to_string(), 1.0)].into();
        let scorer = ConfidenceScorer::new(weights);
        let members = vec![member("ai-review", Layer::Ai, true)];
        assert!(scorer.score(&group_of(members)) <= AI_ONLY_CAP);
    }
}
