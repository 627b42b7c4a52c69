//! Adaptive step budget: the authority on whether a task keeps going.
//!
//! A positive loop verdict stops the task, so loop suggestions reach callers
//! through the stopping [`BudgetDecision`] and the persisted last detection,
//! not through later steps of the same run.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::loop_detector::{LoopDetection, LoopDetector, LoopDetectorConfig};
use crate::core::types::ActionRecord;

/// Budget limits and growth/shrink policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Initial step ceiling.
    pub base_budget: u32,
    /// Absolute ceiling; progress never grows the budget past it.
    pub max_budget: u32,
    /// Identical consecutive actions that stop the task in legacy mode.
    pub runaway_threshold: usize,
    /// Steps added to the ceiling per forward phase transition.
    pub progress_extension: u32,
    /// Steps removed from the ceiling when a new loop is detected.
    pub loop_penalty: u32,
    /// Use the loop detector; `false` selects legacy runaway detection.
    pub enhanced_loop_detection: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            base_budget: 30,
            max_budget: 50,
            runaway_threshold: 3,
            progress_extension: 2,
            loop_penalty: 3,
            enhanced_loop_detection: true,
        }
    }
}

/// Which check stopped the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    LoopDetected,
    Runaway,
    BudgetExhausted,
}

/// Continue/stop verdict for one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetDecision {
    pub should_continue: bool,
    pub reason: String,
    /// Set exactly when `should_continue` is false.
    pub stop: Option<StopKind>,
    pub loop_detection: Option<LoopDetection>,
}

impl BudgetDecision {
    fn proceed() -> Self {
        Self {
            should_continue: true,
            reason: "Continue".to_string(),
            stop: None,
            loop_detection: None,
        }
    }

    fn stop(kind: StopKind, reason: String, loop_detection: Option<LoopDetection>) -> Self {
        Self {
            should_continue: false,
            reason,
            stop: Some(kind),
            loop_detection,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveBudget {
    config: BudgetConfig,
    current_budget: u32,
    loop_detector: Option<LoopDetector>,
    last_detection: Option<LoopDetection>,
}

impl AdaptiveBudget {
    /// Budget with enhanced loop detection per `config.enhanced_loop_detection`.
    pub fn new(config: BudgetConfig, detector_config: LoopDetectorConfig) -> Self {
        let loop_detector = config
            .enhanced_loop_detection
            .then(|| LoopDetector::new(detector_config));
        let current_budget = config.base_budget.min(config.max_budget);
        Self {
            config,
            current_budget,
            loop_detector,
            last_detection: None,
        }
    }

    /// Restore a persisted ceiling, clamped to `max_budget`.
    pub fn with_current_budget(mut self, current_budget: u32) -> Self {
        self.current_budget = current_budget.min(self.config.max_budget);
        self
    }

    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    pub fn current_budget(&self) -> u32 {
        self.current_budget
    }

    /// Restore the last positive verdict so the same loop is not penalized twice.
    pub fn with_last_detection(mut self, detection: Option<LoopDetection>) -> Self {
        self.last_detection = detection.filter(|d| d.detected);
        self
    }

    pub fn last_detection(&self) -> Option<&LoopDetection> {
        self.last_detection.as_ref()
    }

    pub fn loop_detector(&self) -> Option<&LoopDetector> {
        self.loop_detector.as_ref()
    }

    pub fn remaining(&self, steps_taken: u32) -> u32 {
        self.current_budget.saturating_sub(steps_taken)
    }

    pub fn check_continue(&mut self, steps_taken: u32, history: &[ActionRecord]) -> BudgetDecision {
        if let Some(detector) = &self.loop_detector {
            let detection = detector.check(history);
            if detection.detected {
                let label = detection
                    .loop_type
                    .map(|loop_type| loop_type.label())
                    .unwrap_or("LOOP");
                let reason = format!("{label} detected: {}", detection.description);
                if self.last_detection.as_ref() != Some(&detection) {
                    self.current_budget = self
                        .current_budget
                        .saturating_sub(self.config.loop_penalty);
                    warn!(
                        steps_taken,
                        budget = self.current_budget,
                        reason = %reason,
                        "loop detected"
                    );
                    self.last_detection = Some(detection.clone());
                }
                return BudgetDecision::stop(StopKind::LoopDetected, reason, Some(detection));
            }
        } else if is_runaway(history, self.config.runaway_threshold) {
            warn!(steps_taken, "runaway action detected");
            return BudgetDecision::stop(
                StopKind::Runaway,
                "Runaway: identical action repeated".to_string(),
                None,
            );
        }

        if steps_taken >= self.current_budget {
            debug!(steps_taken, budget = self.current_budget, "budget exhausted");
            return BudgetDecision::stop(
                StopKind::BudgetExhausted,
                format!(
                    "Budget exhausted ({steps_taken}/{} steps)",
                    self.current_budget
                ),
                None,
            );
        }
        BudgetDecision::proceed()
    }

    /// Extend the ceiling after real progress, never past `max_budget`.
    pub fn record_progress(&mut self) -> u32 {
        let extended = self
            .current_budget
            .saturating_add(self.config.progress_extension)
            .min(self.config.max_budget);
        if extended != self.current_budget {
            debug!(from = self.current_budget, to = extended, "budget extended");
        }
        self.current_budget = extended;
        extended
    }

    /// Suggestions from the most recent positive loop detection.
    pub fn get_loop_suggestions(&self) -> Vec<String> {
        self.last_detection
            .as_ref()
            .map(|detection| detection.suggestions.clone())
            .unwrap_or_default()
    }
}

/// Last `threshold` actions share name and parameters (results ignored).
fn is_runaway(history: &[ActionRecord], threshold: usize) -> bool {
    if threshold == 0 || history.len() < threshold {
        return false;
    }
    let window = &history[history.len() - threshold..];
    let first = &window[0];
    window
        .iter()
        .all(|record| record.action == first.action && record.parameters == first.parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loop_detector::LoopType;
    use crate::test_support::{failed, succeeded};

    fn budget(base: u32, max: u32) -> AdaptiveBudget {
        AdaptiveBudget::new(
            BudgetConfig {
                base_budget: base,
                max_budget: max,
                ..BudgetConfig::default()
            },
            LoopDetectorConfig::default(),
        )
    }

    fn legacy() -> AdaptiveBudget {
        AdaptiveBudget::new(
            BudgetConfig {
                enhanced_loop_detection: false,
                ..BudgetConfig::default()
            },
            LoopDetectorConfig::default(),
        )
    }

    fn varied() -> Vec<ActionRecord> {
        vec![
            succeeded(1, "read_file", Some("foo.py")),
            succeeded(2, "run_check", None),
            succeeded(3, "edit_file", Some("foo.py")),
        ]
    }

    #[test]
    fn stops_when_budget_exhausted() {
        let mut budget = budget(3, 3);
        let decision = budget.check_continue(3, &varied());
        assert!(!decision.should_continue);
        assert!(decision.reason.contains("Budget exhausted"));
        assert_eq!(decision.stop, Some(StopKind::BudgetExhausted));
        assert!(decision.loop_detection.is_none());
    }

    #[test]
    fn continues_under_budget() {
        let mut budget = budget(5, 10);
        let decision = budget.check_continue(3, &varied());
        assert!(decision.should_continue);
        assert_eq!(decision.reason, "Continue");
        assert_eq!(decision.stop, None);
        assert_eq!(budget.remaining(3), 2);
    }

    #[test]
    fn loop_detection_stops_regardless_of_remaining_budget() {
        let mut budget = budget(30, 50);
        let history = vec![
            failed(1, "edit_file", Some("foo.py")),
            failed(2, "edit_file", Some("foo.py")),
            failed(3, "edit_file", Some("foo.py")),
        ];
        let decision = budget.check_continue(3, &history);
        assert!(!decision.should_continue);
        assert!(decision.reason.starts_with("IDENTICAL_ACTION detected:"));
        assert_eq!(decision.stop, Some(StopKind::LoopDetected));
        let detection = decision.loop_detection.expect("detection");
        assert_eq!(detection.loop_type, Some(LoopType::IdenticalAction));
        assert_eq!(budget.current_budget(), 27);
        assert!(!budget.get_loop_suggestions().is_empty());
    }

    #[test]
    fn repeated_checks_with_same_inputs_agree() {
        let mut budget = budget(30, 50);
        let history = vec![
            failed(1, "edit_file", Some("foo.py")),
            failed(2, "edit_file", Some("foo.py")),
            failed(3, "edit_file", Some("foo.py")),
        ];
        let first = budget.check_continue(3, &history);
        let second = budget.check_continue(3, &history);
        assert_eq!(first, second);
        assert_eq!(budget.current_budget(), 27);

        let mut exhausted = self::budget(3, 3);
        let first = exhausted.check_continue(3, &varied());
        let second = exhausted.check_continue(3, &varied());
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_mode_stops_on_runaway_only() {
        let mut budget = legacy();
        assert!(budget.loop_detector().is_none());

        // Different results but identical name and parameters still count.
        let history = vec![
            failed(1, "run_check", None),
            succeeded(2, "run_check", None),
            failed(3, "run_check", None),
        ];
        let decision = budget.check_continue(3, &history);
        assert!(!decision.should_continue);
        assert_eq!(decision.reason, "Runaway: identical action repeated");
        assert_eq!(decision.stop, Some(StopKind::Runaway));
        assert!(decision.loop_detection.is_none());
        assert!(budget.get_loop_suggestions().is_empty());
    }

    #[test]
    fn runaway_on_last_budgeted_step_is_runaway() {
        let mut budget = AdaptiveBudget::new(
            BudgetConfig {
                base_budget: 3,
                max_budget: 3,
                enhanced_loop_detection: false,
                ..BudgetConfig::default()
            },
            LoopDetectorConfig::default(),
        );
        let history = vec![
            succeeded(1, "run_tests", None),
            succeeded(2, "run_tests", None),
            succeeded(3, "run_tests", None),
        ];
        let decision = budget.check_continue(3, &history);
        assert_eq!(decision.stop, Some(StopKind::Runaway));
    }

    #[test]
    fn restored_detection_is_not_penalized_again() {
        let history = vec![
            failed(1, "edit_file", Some("foo.py")),
            failed(2, "edit_file", Some("foo.py")),
            failed(3, "edit_file", Some("foo.py")),
        ];
        let mut first = budget(30, 50);
        first.check_continue(3, &history);
        assert_eq!(first.current_budget(), 27);

        let mut restored = budget(30, 50)
            .with_current_budget(first.current_budget())
            .with_last_detection(first.last_detection().cloned());
        assert!(!restored.get_loop_suggestions().is_empty());
        let decision = restored.check_continue(3, &history);
        assert_eq!(decision.stop, Some(StopKind::LoopDetected));
        assert_eq!(restored.current_budget(), 27);
    }

    #[test]
    fn legacy_mode_ignores_loop_patterns() {
        let mut budget = legacy();
        let history = vec![
            failed(1, "edit_file", Some("foo.py")),
            failed(2, "extract_function", Some("foo.py")),
            failed(3, "edit_file", Some("foo.py")),
            failed(4, "extract_function", Some("foo.py")),
        ];
        assert!(budget.check_continue(4, &history).should_continue);
    }

    #[test]
    fn progress_extends_up_to_max() {
        let mut budget = budget(10, 13);
        assert_eq!(budget.record_progress(), 12);
        assert_eq!(budget.record_progress(), 13);
        assert_eq!(budget.record_progress(), 13);
    }

    #[test]
    fn base_above_max_is_capped() {
        let budget = budget(20, 10);
        assert_eq!(budget.current_budget(), 10);
        assert_eq!(budget.remaining(25), 0);
    }

    #[test]
    fn no_suggestions_before_any_loop() {
        let budget = budget(5, 5);
        assert!(budget.get_loop_suggestions().is_empty());
    }
}
