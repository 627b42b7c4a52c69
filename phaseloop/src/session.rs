//! Per-task ownership of the core state.
//!
//! A [`TaskSession`] bundles the fact store, phase machine, adaptive budget and
//! action history of exactly one task. Nothing here is shared between tasks.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::budget::{AdaptiveBudget, BudgetDecision};
use crate::core::extract::extract_facts;
use crate::core::facts::FactStore;
use crate::core::phase::{Phase, PhaseContext, PhaseMachine, PhaseStateError};
use crate::core::types::{ActionRecord, ActionResult, Fact};
use crate::io::config::AgentConfig;
use crate::io::task_state::TaskSnapshot;

/// What the agent reports back after one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub action: String,
    pub target: Option<String>,
    pub parameters: BTreeMap<String, Value>,
    pub result: ActionResult,
    pub summary: String,
    pub error: Option<String>,
    /// Raw tool output; facts are extracted from it.
    pub output: String,
    pub files_modified: Vec<String>,
    /// `None` leaves the previous verification status in place.
    pub verification_passing: Option<bool>,
    pub tests_passing: Option<bool>,
    /// Explicit transition requested by the agent (e.g. escalation).
    pub requested_phase: Option<Phase>,
}

impl StepReport {
    pub fn new(action: impl Into<String>, result: ActionResult) -> Self {
        Self {
            action: action.into(),
            target: None,
            parameters: BTreeMap::new(),
            result,
            summary: String::new(),
            error: None,
            output: String::new(),
            files_modified: Vec::new(),
            verification_passing: None,
            tests_passing: None,
            requested_phase: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskSession {
    task_id: String,
    steps_taken: u32,
    history: Vec<ActionRecord>,
    facts: FactStore,
    machine: PhaseMachine,
    budget: AdaptiveBudget,
    files_modified: BTreeSet<String>,
    verification_passing: bool,
    tests_passing: bool,
    high_confidence: f64,
}

impl TaskSession {
    pub fn new(task_id: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            task_id: task_id.into(),
            steps_taken: 0,
            history: Vec::new(),
            facts: FactStore::new().with_compaction_threshold(config.facts.compaction_threshold),
            machine: PhaseMachine::new().with_limits(config.phases.clone()),
            budget: AdaptiveBudget::new(config.budget.clone(), config.loop_detection.clone()),
            files_modified: BTreeSet::new(),
            verification_passing: false,
            tests_passing: false,
            high_confidence: config.facts.high_confidence,
        }
    }

    /// Rebuild a session from a persisted snapshot.
    ///
    /// A snapshot without phase state starts a fresh `init` machine; a present
    /// but corrupt phase state is rejected.
    pub fn from_snapshot(
        snapshot: TaskSnapshot,
        config: &AgentConfig,
    ) -> Result<Self, PhaseStateError> {
        let machine = match &snapshot.phase_machine_state {
            Some(state) => PhaseMachine::from_state(state)?,
            None => {
                debug!(task_id = %snapshot.task_id, "no phase state in snapshot, starting at init");
                PhaseMachine::new()
            }
        }
        .with_limits(config.phases.clone());

        let mut budget = AdaptiveBudget::new(config.budget.clone(), config.loop_detection.clone());
        if let Some(current) = snapshot.current_budget {
            budget = budget.with_current_budget(current);
        }
        budget = budget.with_last_detection(snapshot.last_loop_detection);

        Ok(Self {
            task_id: snapshot.task_id,
            steps_taken: snapshot.steps_taken,
            history: snapshot.action_history,
            facts: FactStore::restore(snapshot.facts, snapshot.superseded_facts)
                .with_compaction_threshold(config.facts.compaction_threshold),
            machine,
            budget,
            files_modified: snapshot.files_modified,
            verification_passing: snapshot.verification_passing,
            tests_passing: snapshot.tests_passing,
            high_confidence: config.facts.high_confidence,
        })
    }

    pub fn to_snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            steps_taken: self.steps_taken,
            action_history: self.history.clone(),
            facts: self.facts.all().to_vec(),
            superseded_facts: self.facts.superseded_ids(),
            files_modified: self.files_modified.clone(),
            verification_passing: self.verification_passing,
            tests_passing: self.tests_passing,
            current_budget: Some(self.budget.current_budget()),
            last_loop_detection: self.budget.last_detection().cloned(),
            phase_machine_state: Some(self.machine.to_state()),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn steps_taken(&self) -> u32 {
        self.steps_taken
    }

    pub fn history(&self) -> &[ActionRecord] {
        &self.history
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn machine(&self) -> &PhaseMachine {
        &self.machine
    }

    pub fn budget(&self) -> &AdaptiveBudget {
        &self.budget
    }

    pub fn phase(&self) -> Phase {
        self.machine.current_phase()
    }

    pub fn files_modified(&self) -> &BTreeSet<String> {
        &self.files_modified
    }

    /// Facts confident enough to show the agent.
    pub fn briefing_facts(&self) -> Vec<&Fact> {
        self.facts.get_high_confidence(self.high_confidence)
    }

    pub fn phase_context(&self) -> PhaseContext {
        PhaseContext {
            current_phase: self.machine.current_phase(),
            steps_in_phase: self.machine.steps_in_phase(),
            total_steps: self.steps_taken,
            verification_passing: self.verification_passing,
            tests_passing: self.tests_passing,
            files_modified: self.files_modified.clone(),
            facts: self.facts.get_active().into_iter().cloned().collect(),
        }
    }

    pub fn check_continue(&mut self) -> BudgetDecision {
        self.budget.check_continue(self.steps_taken, &self.history)
    }

    /// Append the step's action record and fold its observations into state.
    pub fn record(&mut self, report: StepReport) -> &ActionRecord {
        let step = self.steps_taken + 1;
        for fact in extract_facts(&report.output, &report.action, step) {
            self.facts.add(fact);
        }
        self.files_modified.extend(report.files_modified);
        if let Some(passing) = report.verification_passing {
            self.verification_passing = passing;
        }
        if let Some(passing) = report.tests_passing {
            self.tests_passing = passing;
        }

        self.history.push(ActionRecord {
            step,
            action: report.action,
            target: report.target,
            parameters: report.parameters,
            result: report.result,
            summary: report.summary,
            error: report.error,
        });
        self.steps_taken = step;
        self.machine.advance_step();
        &self.history[self.history.len() - 1]
    }

    /// Transition to `target`; forward progress extends the budget.
    pub fn transition(&mut self, target: Phase) -> bool {
        let from = self.machine.current_phase();
        let context = self.phase_context();
        if !self.machine.transition(target, &context) {
            warn!(task_id = %self.task_id, %from, to = %target, "transition not allowed");
            return false;
        }
        if from.forward() == Some(target) {
            self.budget.record_progress();
        }
        true
    }

    /// Apply the machine's auto-transition suggestion, if any.
    pub fn auto_transition(&mut self) -> Option<Phase> {
        let target = self.machine.should_auto_transition(&self.phase_context())?;
        self.transition(target).then_some(target)
    }
}
