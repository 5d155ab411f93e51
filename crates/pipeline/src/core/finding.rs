use crate::core::job::Layer;
use crate::core::severity::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw output record produced by a single tool adapter, before normalization.
///
/// The severity, rule id and location are kept exactly as the wrapped tool
/// reported them; the normalizer owns every translation into the canonical
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFinding {
    pub tool: String,

    pub rule_id: String,

    pub raw_severity: String,

    pub raw_location: RawLocation,

    pub message: String,

    /// Tool-specific evidence, e.g. a counterexample transaction trace from a
    /// fuzzer or symbolic executor. Consumed by the exploit validator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl ToolFinding {
    pub fn new(tool: &str, rule_id: &str, raw_severity: &str, message: &str) -> Self {
        Self {
            tool: tool.to_string(),
            rule_id: rule_id.to_string(),
            raw_severity: raw_severity.to_string(),
            raw_location: RawLocation::default(),
            message: message.to_string(),
            evidence: None,
        }
    }

    pub fn with_location(mut self, location: RawLocation) -> Self {
        self.raw_location = location;
        self
    }

    pub fn with_evidence(mut self, evidence: String) -> Self {
        self.evidence = Some(evidence);
        self
    }
}

/// Location exactly as a tool reported it: line-based, byte-offset-based, or
/// absent. Tools disagree wildly here; resolution happens in the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_start: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_end: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl RawLocation {
    pub fn at_lines(file: &str, line: u32, end_line: u32) -> Self {
        Self {
            file: Some(file.to_string()),
            line: Some(line),
            end_line: Some(end_line),
            ..Default::default()
        }
    }

    pub fn at_bytes(file: Option<&str>, byte_start: u32, byte_end: u32) -> Self {
        Self {
            file: file.map(str::to_string),
            byte_start: Some(byte_start),
            byte_end: Some(byte_end),
            ..Default::default()
        }
    }

    pub fn in_function(mut self, contract: &str, function: &str) -> Self {
        self.contract = Some(contract.to_string());
        self.function = Some(function.to_string());
        self
    }
}

/// Globally unique finding identifier, namespaced as `tool/layer/sequence`.
///
/// Each adapter invocation yields at most one recorded `LayerResult`, and the
/// normalizer numbers findings within it, so ids never collide across tools or
/// layers and need no shared counter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FindingId(String);

impl FindingId {
    pub fn new(tool: &str, layer: Layer, sequence: usize) -> Self {
        Self(format!("{}/{}/{:04}", tool, layer, sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully resolved source location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    pub start_line: u32,

    pub end_line: u32,
}

impl SourceLocation {
    pub fn new(file: &str, start_line: u32, end_line: u32) -> Self {
        Self {
            file: file.to_string(),
            contract: None,
            function: None,
            start_line,
            end_line,
        }
    }

    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Number of lines shared with `other`, zero when the files differ.
    pub fn overlap_lines(&self, other: &SourceLocation) -> u32 {
        if self.file != other.file {
            return 0;
        }
        let start = self.start_line.max(other.start_line);
        let end = self.end_line.min(other.end_line);
        if start > end {
            0
        } else {
            end - start + 1
        }
    }
}

/// Canonical location: either resolved to source lines or kept as the raw
/// byte offsets the tool reported. Unresolved findings are never dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FindingLocation {
    Resolved(SourceLocation),
    Unresolved {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        byte_start: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        byte_end: Option<u32>,
    },
}

impl FindingLocation {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&SourceLocation> {
        match self {
            Self::Resolved(loc) => Some(loc),
            Self::Unresolved { .. } => None,
        }
    }
}

/// Canonical vulnerability finding. Immutable once created; exactly one per
/// `ToolFinding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: FindingId,

    pub tool: String,

    pub layer: Layer,

    /// Canonical vulnerability class, or the raw rule id when no mapping
    /// exists (in which case `swc` is `None` and the finding is unmapped).
    pub class: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub swc: Option<String>,

    pub severity: Severity,

    pub location: FindingLocation,

    pub description: String,

    pub rule_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl Finding {
    pub fn is_unmapped(&self) -> bool {
        self.swc.is_none()
    }

    pub fn is_resolved(&self) -> bool {
        self.location.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_id_namespacing() {
        let a = FindingId::new("slither", Layer::Static, 1);
        let b = FindingId::new("slither", Layer::Ai, 1);
        let c = FindingId::new("mythril", Layer::Static, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "slither/static/0001");
    }

    #[test]
    fn test_overlap_lines() {
        let a = SourceLocation::new("a.sol", 10, 15);
        let b = SourceLocation::new("a.sol", 10, 14);
        assert_eq!(a.overlap_lines(&b), 5);

        let c = SourceLocation::new("b.sol", 10, 14);
        assert_eq!(a.overlap_lines(&c), 0);

        let d = SourceLocation::new("a.sol", 20, 25);
        assert_eq!(a.overlap_lines(&d), 0);
    }
}
