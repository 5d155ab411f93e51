//! Shared vulnerability class tables: SWC registry mapping and the
//! class-equivalence relation used by both the normalizer and the correlator.
//!
//! Classes are canonical kebab-case names. Tools report the same underlying
//! weakness under different labels ("reentrancy-eth", "state-change-after-call");
//! the equivalence table collapses them into families without erasing the more
//! specific member label.

/// (canonical family, member classes). The family name itself is always a
/// member of its own family.
const CLASS_FAMILIES: &[(&str, &[&str])] = &[
    (
        "reentrancy",
        &[
            "reentrancy",
            "state-change-after-external-call",
            "state-change-after-call",
            "cross-function-reentrancy",
            "read-only-reentrancy",
        ],
    ),
    (
        "access-control",
        &[
            "access-control",
            "missing-access-control",
            "unprotected-function",
            "tx-origin-auth",
            "unprotected-selfdestruct",
        ],
    ),
    (
        "unchecked-call",
        &[
            "unchecked-call",
            "unchecked-send",
            "unchecked-transfer",
            "unchecked-lowlevel",
        ],
    ),
    (
        "integer-overflow",
        &["integer-overflow", "integer-underflow", "arithmetic-wrap"],
    ),
    (
        "delegatecall",
        &["delegatecall", "controlled-delegatecall", "delegatecall-loop"],
    ),
    (
        "timestamp-dependence",
        &["timestamp-dependence", "block-values-as-time"],
    ),
    ("weak-randomness", &["weak-randomness", "weak-prng"]),
    ("dos", &["dos", "gas-limit-dos", "unbounded-loop"]),
    (
        "assertion-violation",
        &["assertion-violation", "invariant-violation", "property-violation"],
    ),
    ("unprotected-ether", &["unprotected-ether", "arbitrary-send"]),
    ("floating-pragma", &["floating-pragma"]),
    ("outdated-compiler", &["outdated-compiler"]),
    ("shadowing", &["shadowing", "shadowing-state"]),
    ("uninitialized-storage", &["uninitialized-storage", "uninitialized-state"]),
];

const SWC_CODES: &[(&str, &str)] = &[
    ("reentrancy", "SWC-107"),
    ("integer-overflow", "SWC-101"),
    ("unprotected-selfdestruct", "SWC-106"),
    ("unprotected-ether", "SWC-105"),
    ("unchecked-call", "SWC-104"),
    ("floating-pragma", "SWC-103"),
    ("outdated-compiler", "SWC-102"),
    ("delegatecall", "SWC-112"),
    ("weak-randomness", "SWC-120"),
    ("timestamp-dependence", "SWC-116"),
    ("shadowing", "SWC-119"),
    ("access-control", "SWC-115"),
    ("dos", "SWC-128"),
    ("assertion-violation", "SWC-110"),
    ("uninitialized-storage", "SWC-109"),
];

/// Canonical family for a class, or `None` when the class is unknown to the
/// shared table.
pub fn family_of(class: &str) -> Option<&'static str> {
    let class = class.to_lowercase();
    CLASS_FAMILIES
        .iter()
        .find(|(_, members)| members.contains(&class.as_str()))
        .map(|(family, _)| *family)
}

/// Two classes are equivalent when equal or belonging to the same family.
pub fn classes_equivalent(a: &str, b: &str) -> bool {
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    match (family_of(a), family_of(b)) {
        (Some(fa), Some(fb)) => fa == fb,
        _ => false,
    }
}

/// Merge policy for a correlation group's class: identical classes keep their
/// exact label; differing-but-equivalent classes fall back to the shared
/// family name.
pub fn shared_class(a: &str, b: &str) -> String {
    if a.eq_ignore_ascii_case(b) {
        return a.to_lowercase();
    }
    family_of(a)
        .filter(|fa| family_of(b) == Some(fa))
        .map(str::to_string)
        .unwrap_or_else(|| a.to_lowercase())
}

/// SWC registry code for a class, resolved through its family.
pub fn swc_for_class(class: &str) -> Option<&'static str> {
    let direct = SWC_CODES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(class))
        .map(|(_, code)| *code);
    if direct.is_some() {
        return direct;
    }
    let family = family_of(class)?;
    SWC_CODES
        .iter()
        .find(|(c, _)| *c == family)
        .map(|(_, code)| *code)
}

/// Reverse lookup for tools (mythril) that report SWC ids directly.
pub fn class_for_swc(swc: &str) -> Option<&'static str> {
    SWC_CODES
        .iter()
        .find(|(_, code)| code.eq_ignore_ascii_case(swc))
        .map(|(class, _)| *class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalence_within_family() {
        assert!(classes_equivalent(
            "reentrancy",
            "state-change-after-external-call"
        ));
        assert!(classes_equivalent("unchecked-send", "unchecked-transfer"));
        assert!(!classes_equivalent("reentrancy", "delegatecall"));
        assert!(!classes_equivalent("reentrancy", "totally-unknown"));
    }

    #[test]
    fn test_shared_class_prefers_exact_match() {
        assert_eq!(shared_class("reentrancy", "reentrancy"), "reentrancy");
        assert_eq!(
            shared_class("state-change-after-call", "reentrancy"),
            "reentrancy"
        );
        assert_eq!(
            shared_class("cross-function-reentrancy", "cross-function-reentrancy"),
            "cross-function-reentrancy"
        );
    }

    #[test]
    fn test_swc_resolution_through_family() {
        assert_eq!(swc_for_class("reentrancy"), Some("SWC-107"));
        assert_eq!(swc_for_class("state-change-after-call"), Some("SWC-107"));
        assert_eq!(swc_for_class("unchecked-send"), Some("SWC-104"));
        assert_eq!(swc_for_class("made-up-class"), None);
    }

    #[test]
    fn test_swc_reverse_lookup() {
        assert_eq!(class_for_swc("SWC-107"), Some("reentrancy"));
        assert_eq!(class_for_swc("swc-104"), Some("unchecked-call"));
        assert_eq!(class_for_swc("SWC-999"), None);
    }
}
