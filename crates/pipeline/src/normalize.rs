//! Finding normalizer: the 1:1, side-effect-free transform from raw
//! [`ToolFinding`]s into canonical [`Finding`]s.
//!
//! Three translations happen here: tool-native severity scales onto the
//! unified ordinal, tool rule ids onto vulnerability classes and SWC codes,
//! and raw locations onto resolved source ranges. Nothing is ever dropped: a
//! finding that cannot be mapped or resolved is tagged and kept.

use crate::core::{
    swc, Finding, FindingId, FindingLocation, RawLocation, Severity, SourceLocation, Target,
    ToolFinding,
};
use crate::scheduler::LayerResult;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Byte-offset to line resolver built from the target's source tree.
#[derive(Debug, Default)]
pub struct SourceIndex {
    /// Relative file path -> byte offset of each line start.
    line_starts: HashMap<String, Vec<u32>>,
}

impl SourceIndex {
    /// Index every Solidity file under the source root. Deployed targets have
    /// no source tree and yield an empty index; byte-offset findings against
    /// them stay unresolved.
    pub fn from_target(target: &Target) -> Self {
        let Some(root) = target.source_root() else {
            return Self::default();
        };
        Self::from_root(root)
    }

    pub fn from_root(root: &Path) -> Self {
        let mut line_starts = HashMap::new();
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "sol"))
        {
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            line_starts.insert(rel, Self::index_content(&content));
        }
        Self { line_starts }
    }

    fn index_content(content: &str) -> Vec<u32> {
        let mut starts = vec![0u32];
        for (offset, byte) in content.bytes().enumerate() {
            if byte == b'\n' {
                starts.push(offset as u32 + 1);
            }
        }
        starts
    }

    /// 1-based line containing `byte_offset`, or `None` when the file is not
    /// indexed.
    pub fn line_at(&self, file: &str, byte_offset: u32) -> Option<u32> {
        let normalized = file.trim_start_matches("./");
        let starts = self
            .line_starts
            .get(normalized)
            .or_else(|| self.line_starts.get(file))?;
        let line = match starts.binary_search(&byte_offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        Some(line as u32)
    }

    #[cfg(test)]
    fn with_file(mut self, file: &str, content: &str) -> Self {
        self.line_starts
            .insert(file.to_string(), Self::index_content(content));
        self
    }
}

pub struct Normalizer {
    source_index: SourceIndex,
}

impl Normalizer {
    pub fn new(source_index: SourceIndex) -> Self {
        Self { source_index }
    }

    pub fn for_target(target: &Target) -> Self {
        Self::new(SourceIndex::from_target(target))
    }

    /// Normalize every finding of every layer result. Sequence numbers run
    /// per result, so ids stay collision-free without shared state.
    pub fn normalize_all(&self, results: &[LayerResult]) -> Vec<Finding> {
        results
            .iter()
            .flat_map(|result| {
                result
                    .findings
                    .iter()
                    .enumerate()
                    .map(|(seq, tf)| self.normalize(tf, result, seq))
            })
            .collect()
    }

    /// Exactly one canonical finding per raw finding.
    pub fn normalize(&self, raw: &ToolFinding, result: &LayerResult, sequence: usize) -> Finding {
        let severity = map_severity(&raw.tool, &raw.raw_severity);
        let (class, swc_code) = map_class(&raw.tool, &raw.rule_id);
        let location = self.resolve_location(&raw.raw_location);

        if swc_code.is_none() {
            debug!(tool = %raw.tool, rule = %raw.rule_id, "no class mapping, keeping unmapped");
        }
        if !location.is_resolved() {
            warn!(tool = %raw.tool, rule = %raw.rule_id, "location unresolved, keeping finding");
        }

        Finding {
            id: FindingId::new(&raw.tool, result.layer, sequence),
            tool: raw.tool.clone(),
            layer: result.layer,
            class,
            swc: swc_code.map(str::to_string),
            severity,
            location,
            description: raw.message.clone(),
            rule_id: raw.rule_id.clone(),
            evidence: raw.evidence.clone(),
        }
    }

    fn resolve_location(&self, raw: &RawLocation) -> FindingLocation {
        if let (Some(file), Some(line)) = (&raw.file, raw.line) {
            let mut resolved =
                SourceLocation::new(file, line, raw.end_line.unwrap_or(line).max(line));
            resolved.contract = raw.contract.clone();
            resolved.function = raw.function.clone();
            return FindingLocation::Resolved(resolved);
        }

        // Byte offsets can still resolve through the source index.
        if let (Some(file), Some(start)) = (&raw.file, raw.byte_start) {
            if let Some(start_line) = self.source_index.line_at(file, start) {
                let end_line = raw
                    .byte_end
                    .and_then(|end| self.source_index.line_at(file, end))
                    .unwrap_or(start_line)
                    .max(start_line);
                let mut resolved = SourceLocation::new(file, start_line, end_line);
                resolved.contract = raw.contract.clone();
                resolved.function = raw.function.clone();
                return FindingLocation::Resolved(resolved);
            }
        }

        FindingLocation::Unresolved {
            file: raw.file.clone(),
            byte_start: raw.byte_start,
            byte_end: raw.byte_end,
        }
    }
}

/// Tool-native severity onto the unified ordinal. Unknown labels fall back to
/// medium rather than being dropped or inflated.
pub fn map_severity(tool: &str, raw: &str) -> Severity {
    let raw = raw.to_lowercase();
    match raw.as_str() {
        "critical" => Severity::Critical,
        "high" => Severity::High,
        "medium" | "warning" => Severity::Medium,
        "low" => Severity::Low,
        "info" | "informational" | "note" => Severity::Informational,
        // Slither's gas-optimization impact maps to the bottom of the scale.
        "optimization" if tool == "slither" => Severity::Informational,
        _ => Severity::Medium,
    }
}

/// Tool rule id onto (class, SWC code). Unmapped rules keep the raw rule id
/// as their class with no SWC code.
pub fn map_class(tool: &str, rule_id: &str) -> (String, Option<&'static str>) {
    let class = match tool {
        "slither" => slither_class(rule_id),
        "mythril" => swc::class_for_swc(rule_id).map(str::to_string),
        "echidna" | "halmos" => Some(property_class(rule_id)),
        _ => None,
    };
    // Tools (the AI reviewer in particular) may already report a canonical
    // class name.
    let class = class.or_else(|| swc::family_of(rule_id).map(|_| rule_id.to_lowercase()));

    match class {
        Some(class) => {
            let code = swc::swc_for_class(&class);
            (class, code)
        }
        None => (rule_id.to_lowercase(), None),
    }
}

fn slither_class(rule_id: &str) -> Option<String> {
    let class = match rule_id {
        "reentrancy-eth" | "reentrancy-no-eth" | "reentrancy-benign" | "reentrancy-events"
        | "reentrancy-unlimited-gas" => "reentrancy",
        "unprotected-upgrade" => "access-control",
        "suicidal" => "unprotected-selfdestruct",
        "unchecked-transfer" => "unchecked-transfer",
        "unchecked-lowlevel" => "unchecked-lowlevel",
        "unchecked-send" => "unchecked-send",
        "arbitrary-send" => "unprotected-ether",
        "controlled-delegatecall" => "controlled-delegatecall",
        "delegatecall-loop" => "delegatecall-loop",
        "timestamp" => "timestamp-dependence",
        "weak-prng" => "weak-randomness",
        "divide-before-multiply" => "integer-overflow",
        "locked-ether" => "unprotected-ether",
        "tx-origin" => "tx-origin-auth",
        "shadowing-state" => "shadowing-state",
        "uninitialized-state" | "uninitialized-storage" | "uninitialized-local" => {
            "uninitialized-storage"
        }
        "pragma" => "floating-pragma",
        "solc-version" => "outdated-compiler",
        _ => return None,
    };
    Some(class.to_string())
}

fn property_class(rule_id: &str) -> String {
    if rule_id.contains("assert") {
        "assertion-violation".to_string()
    } else {
        "property-violation".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Layer, RawLocation};
    use std::time::Duration;

    fn result_with(findings: Vec<ToolFinding>, layer: Layer, tool: &str) -> LayerResult {
        LayerResult::completed(layer, tool, findings, Duration::from_millis(1))
    }

    fn normalizer() -> Normalizer {
        let index = SourceIndex::default()
            .with_file("Vault.sol", "line one\nline two\nline three\nline four\n");
        Normalizer::new(index)
    }

    #[test]
    fn test_one_finding_per_tool_finding() {
        let raw = vec![
            ToolFinding::new("slither", "reentrancy-eth", "High", "a"),
            ToolFinding::new("slither", "made-up-rule", "Weird", "b"),
        ];
        let results = vec![result_with(raw, Layer::Static, "slither")];
        let findings = normalizer().normalize_all(&results);
        assert_eq!(findings.len(), 2);
        assert_ne!(findings[0].id, findings[1].id);
    }

    #[test]
    fn test_severity_mapping_with_fallback() {
        assert_eq!(map_severity("slither", "High"), Severity::High);
        assert_eq!(map_severity("slither", "Optimization"), Severity::Informational);
        assert_eq!(map_severity("mythril", "unknown-level"), Severity::Medium);
        assert_eq!(map_severity("echidna", "warning"), Severity::Medium);
    }

    #[test]
    fn test_class_mapping() {
        let (class, code) = map_class("slither", "reentrancy-eth");
        assert_eq!(class, "reentrancy");
        assert_eq!(code, Some("SWC-107"));

        let (class, code) = map_class("mythril", "SWC-104");
        assert_eq!(class, "unchecked-call");
        assert_eq!(code, Some("SWC-104"));

        // AI reviewer reporting a canonical class name directly.
        let (class, code) = map_class("ai-review", "reentrancy");
        assert_eq!(class, "reentrancy");
        assert_eq!(code, Some("SWC-107"));

        // Unknown rule: kept, unmapped.
        let (class, code) = map_class("slither", "brand-new-detector");
        assert_eq!(class, "brand-new-detector");
        assert_eq!(code, None);
    }

    #[test]
    fn test_byte_offset_resolution() {
        let raw = ToolFinding::new("slither", "reentrancy-eth", "High", "x")
            .with_location(RawLocation::at_bytes(Some("Vault.sol"), 10, 20));
        let result = result_with(vec![raw], Layer::Static, "slither");
        let finding = &normalizer().normalize_all(std::slice::from_ref(&result))[0];

        let loc = finding.location.resolved().expect("should resolve");
        assert_eq!(loc.start_line, 2);
        assert_eq!(loc.end_line, 3);
    }

    #[test]
    fn test_unresolvable_location_kept() {
        let raw = ToolFinding::new("mythril", "SWC-101", "Low", "bytecode arithmetic")
            .with_location(RawLocation::at_bytes(None, 1432, 1432));
        let result = result_with(vec![raw], Layer::Symbolic, "mythril");
        let finding = &normalizer().normalize_all(std::slice::from_ref(&result))[0];

        assert!(!finding.is_resolved());
        match &finding.location {
            FindingLocation::Unresolved { byte_start, .. } => {
                assert_eq!(*byte_start, Some(1432));
            }
            FindingLocation::Resolved(_) => panic!("must stay unresolved"),
        }
    }

    #[test]
    fn test_line_at() {
        let index = SourceIndex::default().with_file("a.sol", "ab\ncd\nef");
        assert_eq!(index.line_at("a.sol", 0), Some(1));
        assert_eq!(index.line_at("a.sol", 2), Some(1));
        assert_eq!(index.line_at("a.sol", 3), Some(2));
        assert_eq!(index.line_at("a.sol", 7), Some(3));
        assert_eq!(index.line_at("missing.sol", 0), None);
    }
}
