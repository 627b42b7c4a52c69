//! Detection of repeating or unproductive agent behavior.
//!
//! The detector is a pure function over the tail of the action history. Passes
//! run in a fixed priority order and the first match wins:
//!
//! 1. [`LoopType::IdenticalAction`]: the same failing action on the same target.
//! 2. [`LoopType::ErrorCycle`]: two failing actions alternating A,B,A,B.
//! 3. [`LoopType::NoProgress`]: the same successful, non-modifying action repeated.
//!
//! Cycles over three or more distinct actions are not classified.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ActionRecord, ActionResult};

/// Parameter keys consulted (in order) for an action's target entity.
const ENTITY_KEYS: [&str; 3] = ["entity", "function", "symbol"];

/// Closed set of loop classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopType {
    IdenticalAction,
    ErrorCycle,
    NoProgress,
}

impl LoopType {
    /// Detection passes in priority order.
    pub const PRIORITY: [LoopType; 3] = [
        LoopType::IdenticalAction,
        LoopType::ErrorCycle,
        LoopType::NoProgress,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LoopType::IdenticalAction => "IDENTICAL_ACTION",
            LoopType::ErrorCycle => "ERROR_CYCLE",
            LoopType::NoProgress => "NO_PROGRESS",
        }
    }

    fn suggestions(self) -> Vec<String> {
        let lines: &[&str] = match self {
            LoopType::IdenticalAction => &[
                "Re-read the current file content before editing again; it may have changed.",
                "Try a different editing approach such as replace_lines instead of repeating the same edit.",
                "If the target cannot be changed this way, escalate instead of retrying.",
            ],
            LoopType::ErrorCycle => &[
                "Stop alternating between the two failing actions.",
                "Read the error messages of both actions and address the shared root cause.",
                "Re-read the affected file and try a different tool.",
            ],
            LoopType::NoProgress => &[
                "Repeating this action is not changing anything; move on to a modifying step.",
                "If the work is already done, advance to verification instead of re-checking.",
            ],
        };
        lines.iter().map(|line| line.to_string()).collect()
    }
}

impl fmt::Display for LoopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Verdict of a single detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDetection {
    pub detected: bool,
    pub loop_type: Option<LoopType>,
    pub confidence: f64,
    pub description: String,
    pub suggestions: Vec<String>,
}

impl LoopDetection {
    pub fn none() -> Self {
        Self {
            detected: false,
            loop_type: None,
            confidence: 0.0,
            description: String::new(),
            suggestions: Vec::new(),
        }
    }

    fn found(loop_type: LoopType, confidence: f64, description: String) -> Self {
        Self {
            detected: true,
            loop_type: Some(loop_type),
            confidence,
            description,
            suggestions: loop_type.suggestions(),
        }
    }
}

/// Comparable shape of an action, used to decide whether two records are "the same".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSignature {
    pub action_type: String,
    pub target_file: Option<String>,
    pub target_entity: Option<String>,
    pub outcome: ActionResult,
}

impl ActionSignature {
    pub fn from_record(record: &ActionRecord) -> Self {
        let target_entity = ENTITY_KEYS
            .iter()
            .find_map(|key| record.parameters.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string);
        Self {
            action_type: record.action.clone(),
            target_file: record.target.clone(),
            target_entity,
            outcome: record.result,
        }
    }

    /// Strict: every field equal. Loose: action type and outcome only.
    pub fn matches(&self, other: &ActionSignature, strict: bool) -> bool {
        if strict {
            self == other
        } else {
            self.action_type == other.action_type && self.outcome == other.outcome
        }
    }
}

/// Thresholds for the detection passes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopDetectorConfig {
    /// Consecutive identical failures that count as a loop.
    pub identical_threshold: usize,
    /// Repetitions of an A,B pair that count as a cycle.
    pub cycle_threshold: usize,
    /// Consecutive successful non-modifying repeats that count as no progress.
    pub no_progress_threshold: usize,
    /// Compare targets strictly in the identical-action pass.
    pub exact_target_match: bool,
    /// Action names that modify files (never counted as no progress).
    pub modifying_actions: Vec<String>,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            identical_threshold: 3,
            cycle_threshold: 2,
            no_progress_threshold: 4,
            exact_target_match: true,
            modifying_actions: [
                "edit_file",
                "write_file",
                "replace_lines",
                "create_file",
                "delete_file",
                "extract_function",
                "apply_patch",
            ]
            .iter()
            .map(|name| name.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoopDetectorConfig {
        &self.config
    }

    /// Classify the tail of `history` (ascending step order).
    pub fn check(&self, history: &[ActionRecord]) -> LoopDetection {
        for loop_type in LoopType::PRIORITY {
            let found = match loop_type {
                LoopType::IdenticalAction => self.identical_action(history),
                LoopType::ErrorCycle => self.error_cycle(history),
                LoopType::NoProgress => self.no_progress(history),
            };
            if let Some(detection) = found {
                debug!(
                    loop_type = %loop_type,
                    confidence = detection.confidence,
                    "loop pattern matched"
                );
                return detection;
            }
        }
        LoopDetection::none()
    }

    fn identical_action(&self, history: &[ActionRecord]) -> Option<LoopDetection> {
        let window = tail(history, self.config.identical_threshold)?;
        if !window.iter().all(ActionRecord::is_failure) {
            return None;
        }
        let first = &window[0];
        let signatures: Vec<ActionSignature> =
            window.iter().map(ActionSignature::from_record).collect();
        let strict = self.config.exact_target_match;
        if !signatures.iter().all(|s| s.matches(&signatures[0], strict)) {
            return None;
        }
        let exact = signatures.iter().all(|s| s.matches(&signatures[0], true));
        let confidence = if exact { 1.0 } else { 0.8 };

        let target = first.target.as_deref().unwrap_or("<no target>");
        Some(LoopDetection::found(
            LoopType::IdenticalAction,
            confidence,
            format!(
                "'{}' on {} failed {} times in a row",
                first.action,
                target,
                window.len()
            ),
        ))
    }

    fn error_cycle(&self, history: &[ActionRecord]) -> Option<LoopDetection> {
        let window = tail(history, self.config.cycle_threshold.checked_mul(2)?)?;
        if !window.iter().all(ActionRecord::is_failure) {
            return None;
        }
        let a = &window[0].action;
        let b = &window[1].action;
        if a == b {
            return None;
        }
        let alternates = window.iter().enumerate().all(|(idx, record)| {
            let expected = if idx % 2 == 0 { a } else { b };
            &record.action == expected
        });
        if !alternates {
            return None;
        }

        Some(LoopDetection::found(
            LoopType::ErrorCycle,
            1.0,
            format!(
                "'{}' and '{}' alternated {} times, all failing",
                a,
                b,
                self.config.cycle_threshold
            ),
        ))
    }

    fn no_progress(&self, history: &[ActionRecord]) -> Option<LoopDetection> {
        let window = tail(history, self.config.no_progress_threshold)?;
        let action = &window[0].action;
        if self.config.modifying_actions.iter().any(|m| m == action) {
            return None;
        }
        if !window
            .iter()
            .all(|record| &record.action == action && record.is_success())
        {
            return None;
        }

        Some(LoopDetection::found(
            LoopType::NoProgress,
            0.9,
            format!(
                "'{}' succeeded {} times without any file modification",
                action,
                window.len()
            ),
        ))
    }
}

/// Last `n` records, or `None` when history is shorter or `n` is zero.
fn tail(history: &[ActionRecord], n: usize) -> Option<&[ActionRecord]> {
    if n == 0 || history.len() < n {
        return None;
    }
    Some(&history[history.len() - n..])
}
