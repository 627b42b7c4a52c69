//! Extraction of facts from raw tool output.
//!
//! Rules are applied line by line; a line yields at most one fact (the first
//! matching rule wins).

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Fact, FactCategory};

static COMPLEXITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^function\s+`?([\w.:]+)`?\s+has\s+complexity\s+(\d+)").unwrap()
});
static DEFINED_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(class|function|def|fn|struct|method)\s+`?([\w.:]+)`?",
        r"\s+(?:is\s+)?defined\s+in\s+(\S+)"
    ))
    .unwrap()
});
static DEFINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+\.\w+)\s+defines\s+`?([\w.:]+)`?").unwrap());
static VIOLATIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s+violations?\s+found\b").unwrap());
static ERROR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:error|Error|ERROR)(?:\[\w+\])?:\s*(.+)$").unwrap());
static FAILED_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([1-9]\d*)\s+(?:tests?\s+)?failed\b").unwrap());
static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(all checks passed|tests? passed)\b").unwrap());
static FILE_CONTAINS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^file\s+(\S+)\s+contains\s+(.+)$").unwrap());

/// Facts observed in `output`, attributed to `source` at `step`.
///
/// Ids are `<source>-<step>-<index>` so re-running extraction on the same
/// output yields the same ids.
pub fn extract_facts(output: &str, source: &str, step: u32) -> Vec<Fact> {
    let mut facts = Vec::new();
    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((category, statement, confidence)) = classify_line(line) else {
            continue;
        };
        let id = format!("{source}-{step}-{}", facts.len());
        // Confidences below are constants in [0, 1].
        if let Ok(fact) = Fact::new(id, category, statement, confidence, source, step) {
            facts.push(fact);
        }
    }
    facts
}

fn classify_line(line: &str) -> Option<(FactCategory, String, f64)> {
    if let Some(caps) = COMPLEXITY_RE.captures(line) {
        return Some((
            FactCategory::CodeStructure,
            format!("Function {} has complexity {}", &caps[1], &caps[2]),
            0.9,
        ));
    }
    if let Some(caps) = DEFINED_IN_RE.captures(line) {
        return Some((
            FactCategory::CodeStructure,
            format!("{} {} is defined in {}", caps[1].to_lowercase(), &caps[2], &caps[3]),
            0.8,
        ));
    }
    if let Some(caps) = DEFINES_RE.captures(line) {
        return Some((
            FactCategory::CodeStructure,
            format!("{} is defined in {}", &caps[2], &caps[1]),
            0.8,
        ));
    }
    if let Some(caps) = VIOLATIONS_RE.captures(line) {
        let count: u64 = caps[1].parse().unwrap_or(u64::MAX);
        return Some(if count == 0 {
            (
                FactCategory::Verification,
                "No violations found".to_string(),
                0.9,
            )
        } else {
            (
                FactCategory::Error,
                format!("{count} violation(s) found"),
                0.9,
            )
        });
    }
    if let Some(caps) = ERROR_LINE_RE.captures(line) {
        return Some((FactCategory::Error, caps[1].trim().to_string(), 0.8));
    }
    if let Some(caps) = FAILED_COUNT_RE.captures(line) {
        return Some((
            FactCategory::Error,
            format!("{} test(s) failed", &caps[1]),
            0.9,
        ));
    }
    if PASSED_RE.is_match(line) {
        return Some((FactCategory::Verification, line.to_string(), 0.95));
    }
    if let Some(caps) = FILE_CONTAINS_RE.captures(line) {
        return Some((
            FactCategory::FileContent,
            format!("{} contains {}", &caps[1], caps[2].trim()),
            0.7,
        ));
    }
    None
}
