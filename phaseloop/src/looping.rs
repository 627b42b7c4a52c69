//! Step loop driving one task through its phases.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::budget::StopKind;
use crate::core::loop_detector::{LoopDetection, LoopType};
use crate::core::phase::Phase;
use crate::io::prompt::{BriefingInputs, PromptBuilder};
use crate::session::{StepReport, TaskSession};

/// What the agent is asked to do next.
#[derive(Debug, Clone)]
pub struct StepRequest {
    /// 1-indexed number of the step about to run.
    pub step: u32,
    pub phase: Phase,
    /// Rendered phase briefing.
    pub briefing: String,
}

/// Seam to the LLM/tool layer. Tests use scripted agents.
pub trait Agent {
    fn step(&self, request: &StepRequest) -> Result<StepReport>;
}

/// Reason why `run_task` stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStop {
    /// The task reached `complete`.
    Complete,
    /// The task reached `escalate` through a transition.
    Escalated,
    /// The loop detector fired; the task was escalated. This is the only
    /// place the detector's suggestions surface during a run.
    LoopDetected {
        loop_type: Option<LoopType>,
        reason: String,
        suggestions: Vec<String>,
    },
    /// Legacy runaway check fired (identical actions repeated).
    Runaway { reason: String },
    BudgetExhausted { steps_taken: u32, budget: u32 },
}

/// Summary of a `run_task` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: String,
    pub steps_executed: u32,
    pub final_phase: Phase,
    pub stop: LoopStop,
}

/// Run agent steps until the task completes, escalates, loops or runs out of
/// budget.
///
/// Agent and rendering errors stop the loop immediately and propagate.
pub fn run_task<A: Agent, F: FnMut(&TaskSession)>(
    session: &mut TaskSession,
    agent: &A,
    prompts: &PromptBuilder,
    mut on_step: F,
) -> Result<TaskOutcome> {
    let mut steps_executed = 0u32;
    loop {
        if let Some(stop) = terminal_stop(session.phase()) {
            return Ok(outcome(session, steps_executed, stop));
        }

        let decision = session.check_continue();
        if let Some(kind) = decision.stop {
            let stop = match kind {
                StopKind::LoopDetected => {
                    session.transition(Phase::Escalate);
                    let detection = decision.loop_detection.unwrap_or_else(LoopDetection::none);
                    LoopStop::LoopDetected {
                        loop_type: detection.loop_type,
                        reason: decision.reason,
                        suggestions: detection.suggestions,
                    }
                }
                StopKind::Runaway => LoopStop::Runaway {
                    reason: decision.reason,
                },
                StopKind::BudgetExhausted => LoopStop::BudgetExhausted {
                    steps_taken: session.steps_taken(),
                    budget: session.budget().current_budget(),
                },
            };
            info!(task_id = %session.task_id(), ?stop, "task stopped");
            return Ok(outcome(session, steps_executed, stop));
        }

        let inputs = BriefingInputs::from_session(session);
        let request = StepRequest {
            step: inputs.step,
            phase: inputs.phase,
            briefing: prompts.build(&inputs)?,
        };
        debug!(
            task_id = %session.task_id(),
            step = request.step,
            phase = %request.phase,
            "running agent step"
        );
        let mut report = agent
            .step(&request)
            .with_context(|| format!("agent step {} of task {}", request.step, session.task_id()))?;

        let requested = report.requested_phase.take();
        session.record(report);
        steps_executed += 1;

        // Denied requests are logged by the session and otherwise ignored.
        match requested {
            Some(target) => {
                session.transition(target);
            }
            None => {
                session.auto_transition();
            }
        }
        on_step(session);
    }
}

fn terminal_stop(phase: Phase) -> Option<LoopStop> {
    match phase {
        Phase::Complete => Some(LoopStop::Complete),
        Phase::Escalate => Some(LoopStop::Escalated),
        _ => None,
    }
}

fn outcome(session: &TaskSession, steps_executed: u32, stop: LoopStop) -> TaskOutcome {
    TaskOutcome {
        task_id: session.task_id().to_string(),
        steps_executed,
        final_phase: session.phase(),
        stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ActionResult;
    use crate::io::config::AgentConfig;
    use crate::test_support::{ScriptedAgent, report};

    fn session_with(config: &AgentConfig) -> TaskSession {
        TaskSession::new("task-1", config)
    }

    #[test]
    fn already_terminal_task_does_not_call_agent() {
        let mut session = session_with(&AgentConfig::default());
        assert!(session.transition(Phase::Escalate));
        let agent = ScriptedAgent::new(Vec::new());

        let outcome =
            run_task(&mut session, &agent, &PromptBuilder::new(4_000), |_| {}).expect("run");
        assert_eq!(outcome.stop, LoopStop::Escalated);
        assert_eq!(outcome.steps_executed, 0);
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn repeated_failures_escalate_with_loop_verdict() {
        let mut session = session_with(&AgentConfig::default());
        let failing = || {
            let mut step = report("edit_file", ActionResult::Failure);
            step.target = Some("foo.py".to_string());
            step
        };
        let agent = ScriptedAgent::new(vec![failing(), failing(), failing()]);

        let mut seen = Vec::new();
        let outcome = run_task(&mut session, &agent, &PromptBuilder::new(4_000), |s| {
            seen.push(s.steps_taken());
        })
        .expect("run");

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(outcome.final_phase, Phase::Escalate);
        match outcome.stop {
            LoopStop::LoopDetected {
                loop_type,
                reason,
                suggestions,
            } => {
                assert_eq!(loop_type, Some(LoopType::IdenticalAction));
                assert!(reason.starts_with("IDENTICAL_ACTION detected"));
                assert!(!suggestions.is_empty());
            }
            other => panic!("expected loop stop, got {other:?}"),
        }
    }

    #[test]
    fn budget_exhaustion_stops_without_escalating() {
        let mut config = AgentConfig::default();
        config.budget.base_budget = 2;
        config.budget.max_budget = 2;
        let mut session = session_with(&config);
        // `init -> analyze` is a forward transition, but the ceiling is already at max.
        let agent = ScriptedAgent::new(vec![
            report("list_files", ActionResult::Success),
            report("read_file", ActionResult::Success),
        ]);

        let outcome =
            run_task(&mut session, &agent, &PromptBuilder::new(4_000), |_| {}).expect("run");
        assert_eq!(
            outcome.stop,
            LoopStop::BudgetExhausted {
                steps_taken: 2,
                budget: 2
            }
        );
        assert_eq!(outcome.final_phase, Phase::Analyze);
    }

    #[test]
    fn requested_escalation_is_honored() {
        let mut session = session_with(&AgentConfig::default());
        let mut give_up = report("ask_human", ActionResult::Partial);
        give_up.requested_phase = Some(Phase::Escalate);
        let agent = ScriptedAgent::new(vec![give_up]);

        let outcome =
            run_task(&mut session, &agent, &PromptBuilder::new(4_000), |_| {}).expect("run");
        assert_eq!(outcome.stop, LoopStop::Escalated);
        assert_eq!(outcome.steps_executed, 1);
    }

    #[test]
    fn agent_errors_propagate() {
        let mut session = session_with(&AgentConfig::default());
        let agent = ScriptedAgent::new(Vec::new());

        let err = run_task(&mut session, &agent, &PromptBuilder::new(4_000), |_| {})
            .expect_err("script exhausted");
        assert!(format!("{err:#}").contains("agent step 1 of task task-1"));
    }
}
