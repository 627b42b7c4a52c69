//! Finite-state machine over task phases.
//!
//! ```text
//! init -> analyze -> plan -> implement -> verify -> complete
//!                                 ^           |
//!                                 +-----------+
//! any non-terminal phase -> escalate
//! ```
//!
//! Every allowed edge is a row in [`TRANSITIONS`]; pairs not in the table are
//! disallowed. `complete` and `escalate` are terminal.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::types::{Fact, FactCategory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Analyze,
    Plan,
    Implement,
    Verify,
    Complete,
    Escalate,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Init,
        Phase::Analyze,
        Phase::Plan,
        Phase::Implement,
        Phase::Verify,
        Phase::Complete,
        Phase::Escalate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Analyze => "analyze",
            Phase::Plan => "plan",
            Phase::Implement => "implement",
            Phase::Verify => "verify",
            Phase::Complete => "complete",
            Phase::Escalate => "escalate",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Escalate)
    }

    /// Next phase on the canonical forward path, if any.
    pub fn forward(self) -> Option<Phase> {
        match self {
            Phase::Init => Some(Phase::Analyze),
            Phase::Analyze => Some(Phase::Plan),
            Phase::Plan => Some(Phase::Implement),
            Phase::Implement => Some(Phase::Verify),
            Phase::Verify => Some(Phase::Complete),
            Phase::Complete | Phase::Escalate => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PhaseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| PhaseStateError::UnknownPhase(s.to_string()))
    }
}

/// Failures when rebuilding a machine from persisted state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseStateError {
    #[error("unknown phase '{0}'")]
    UnknownPhase(String),
    #[error("phase history contains terminal phase '{0}'")]
    TerminalInHistory(Phase),
}

/// Snapshot of task state used to evaluate transition guards.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseContext {
    pub current_phase: Phase,
    pub steps_in_phase: u32,
    pub total_steps: u32,
    pub verification_passing: bool,
    pub tests_passing: bool,
    pub files_modified: BTreeSet<String>,
    pub facts: Vec<Fact>,
}

impl PhaseContext {
    /// Context with no facts, no modifications and nothing passing.
    pub fn empty(current_phase: Phase) -> Self {
        Self {
            current_phase,
            steps_in_phase: 0,
            total_steps: 0,
            verification_passing: false,
            tests_passing: false,
            files_modified: BTreeSet::new(),
            facts: Vec::new(),
        }
    }

    pub fn has_fact_of_type(&self, category: FactCategory) -> bool {
        self.facts.iter().any(|fact| fact.category() == category)
    }

    pub fn has_modifications(&self) -> bool {
        !self.files_modified.is_empty()
    }
}

type Guard = fn(&PhaseContext) -> bool;

/// One allowed edge of the phase graph.
#[derive(Clone, Copy)]
pub struct TransitionRule {
    pub from: Phase,
    pub to: Phase,
    pub description: &'static str,
    guard: Guard,
}

impl TransitionRule {
    pub fn allows(&self, context: &PhaseContext) -> bool {
        (self.guard)(context)
    }
}

impl fmt::Debug for TransitionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionRule")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .finish()
    }
}

fn always(_: &PhaseContext) -> bool {
    true
}

fn understands_code(context: &PhaseContext) -> bool {
    context.has_fact_of_type(FactCategory::CodeStructure)
}

fn has_modifications(context: &PhaseContext) -> bool {
    context.has_modifications()
}

fn all_passing(context: &PhaseContext) -> bool {
    context.verification_passing && context.tests_passing
}

fn verification_failing(context: &PhaseContext) -> bool {
    !context.verification_passing
}

const fn rule(from: Phase, to: Phase, description: &'static str, guard: Guard) -> TransitionRule {
    TransitionRule {
        from,
        to,
        description,
        guard,
    }
}

pub const TRANSITIONS: &[TransitionRule] = &[
    rule(Phase::Init, Phase::Analyze, "start analysis", always),
    rule(Phase::Analyze, Phase::Plan, "code structure understood", understands_code),
    rule(Phase::Plan, Phase::Implement, "code structure understood", understands_code),
    rule(Phase::Implement, Phase::Verify, "files modified", has_modifications),
    rule(Phase::Verify, Phase::Complete, "verification and tests pass", all_passing),
    rule(Phase::Verify, Phase::Implement, "verification failing", verification_failing),
    rule(Phase::Init, Phase::Escalate, "escalate", always),
    rule(Phase::Analyze, Phase::Escalate, "escalate", always),
    rule(Phase::Plan, Phase::Escalate, "escalate", always),
    rule(Phase::Implement, Phase::Escalate, "escalate", always),
    rule(Phase::Verify, Phase::Escalate, "escalate", always),
];

fn find_rule(from: Phase, to: Phase) -> Option<&'static TransitionRule> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.from == from && rule.to == to)
}

/// An edge whose guard currently passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub description: &'static str,
}

/// Step limits per phase before the machine suggests escalation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PhaseLimits {
    pub init: u32,
    pub analyze: u32,
    pub plan: u32,
    pub implement: u32,
    pub verify: u32,
}

impl Default for PhaseLimits {
    fn default() -> Self {
        Self {
            init: 5,
            analyze: 5,
            plan: 5,
            implement: 10,
            verify: 5,
        }
    }
}

impl PhaseLimits {
    /// `None` for terminal phases.
    pub fn max_steps(&self, phase: Phase) -> Option<u32> {
        match phase {
            Phase::Init => Some(self.init),
            Phase::Analyze => Some(self.analyze),
            Phase::Plan => Some(self.plan),
            Phase::Implement => Some(self.implement),
            Phase::Verify => Some(self.verify),
            Phase::Complete | Phase::Escalate => None,
        }
    }
}

/// Persisted form of [`PhaseMachine`] using plain phase names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMachineState {
    pub current_phase: String,
    pub steps_in_phase: u32,
    pub phase_history: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseMachine {
    current_phase: Phase,
    steps_in_phase: u32,
    phase_history: Vec<Phase>,
    limits: PhaseLimits,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current_phase: Phase::Init,
            steps_in_phase: 0,
            phase_history: Vec::new(),
            limits: PhaseLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PhaseLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    pub fn steps_in_phase(&self) -> u32 {
        self.steps_in_phase
    }

    pub fn phase_history(&self) -> &[Phase] {
        &self.phase_history
    }

    pub fn limits(&self) -> &PhaseLimits {
        &self.limits
    }

    pub fn is_terminal(&self) -> bool {
        self.current_phase.is_terminal()
    }

    pub fn can_transition(&self, target: Phase, context: &PhaseContext) -> bool {
        find_rule(self.current_phase, target).is_some_and(|rule| rule.allows(context))
    }

    /// Move to `target` if its guard passes. Returns `false` and leaves the
    /// machine unchanged otherwise.
    pub fn transition(&mut self, target: Phase, context: &PhaseContext) -> bool {
        if !self.can_transition(target, context) {
            debug!(from = %self.current_phase, to = %target, "transition denied");
            return false;
        }
        info!(
            from = %self.current_phase,
            to = %target,
            steps_in_phase = self.steps_in_phase,
            "phase transition"
        );
        self.phase_history.push(self.current_phase);
        self.current_phase = target;
        self.steps_in_phase = 0;
        true
    }

    pub fn advance_step(&mut self) {
        self.steps_in_phase += 1;
    }

    /// Phase the driving loop should move to without an explicit request.
    ///
    /// A phase that has run past its step limit is escalated; otherwise the
    /// canonical forward edge is suggested when its guard passes.
    pub fn should_auto_transition(&self, context: &PhaseContext) -> Option<Phase> {
        let max_steps = self.limits.max_steps(self.current_phase)?;
        if self.steps_in_phase > max_steps {
            return Some(Phase::Escalate);
        }
        let forward = self.current_phase.forward()?;
        self.can_transition(forward, context).then_some(forward)
    }

    pub fn get_available_transitions(&self, context: &PhaseContext) -> Vec<Transition> {
        TRANSITIONS
            .iter()
            .filter(|rule| rule.from == self.current_phase && rule.allows(context))
            .map(|rule| Transition {
                from: rule.from,
                to: rule.to,
                description: rule.description,
            })
            .collect()
    }

    pub fn to_state(&self) -> PhaseMachineState {
        PhaseMachineState {
            current_phase: self.current_phase.as_str().to_string(),
            steps_in_phase: self.steps_in_phase,
            phase_history: self
                .phase_history
                .iter()
                .map(|phase| phase.as_str().to_string())
                .collect(),
        }
    }

    /// Rebuild a machine with default limits; unknown phase names are rejected.
    pub fn from_state(state: &PhaseMachineState) -> Result<Self, PhaseStateError> {
        let current_phase: Phase = state.current_phase.parse()?;
        let phase_history = state
            .phase_history
            .iter()
            .map(|name| {
                let phase: Phase = name.parse()?;
                if phase.is_terminal() {
                    return Err(PhaseStateError::TerminalInHistory(phase));
                }
                Ok(phase)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            current_phase,
            steps_in_phase: state.steps_in_phase,
            phase_history,
            limits: PhaseLimits::default(),
        })
    }
}
