//! Lifecycle tests driving `run_task` through whole tasks.
//!
//! A scripted agent replays tool reports; the session's phase machine, fact
//! store and budget react to them exactly as they would in a live run.

use phaseloop::core::phase::Phase;
use phaseloop::core::types::ActionResult;
use phaseloop::io::config::AgentConfig;
use phaseloop::io::prompt::PromptBuilder;
use phaseloop::io::task_state::{load_task_state, task_state_path, write_task_state};
use phaseloop::looping::{LoopStop, run_task};
use phaseloop::session::{StepReport, TaskSession};
use phaseloop::test_support::{ScriptedAgent, TestWorkspace, report};

fn analyze_step() -> StepReport {
    let mut step = report("analyze_file", ActionResult::Success);
    step.target = Some("src/parser.py".to_string());
    step.output = "Function parse has complexity 14\nclass Parser defined in src/parser.py".to_string();
    step
}

fn edit_step() -> StepReport {
    let mut step = report("edit_file", ActionResult::Success);
    step.target = Some("src/parser.py".to_string());
    step.files_modified = vec!["src/parser.py".to_string()];
    step
}

fn verify_step(passing: bool) -> StepReport {
    let mut step = report(
        "run_check",
        if passing {
            ActionResult::Success
        } else {
            ActionResult::Failure
        },
    );
    step.verification_passing = Some(passing);
    step.tests_passing = Some(passing);
    step.output = if passing {
        "All checks passed".to_string()
    } else {
        "2 violations found".to_string()
    };
    step
}

/// Full lifecycle: init → analyze → plan → implement → verify → complete.
///
/// Every forward transition extends the budget by the progress extension.
#[test]
fn full_lifecycle_reaches_complete() {
    let workspace = TestWorkspace::new().expect("workspace");
    let config = AgentConfig::default();
    let mut session = TaskSession::new("refactor-parser", &config);
    let agent = ScriptedAgent::new(vec![
        report("list_files", ActionResult::Success),
        analyze_step(),
        report("write_plan", ActionResult::Success),
        edit_step(),
        verify_step(true),
    ]);

    let snapshot_path = task_state_path(workspace.root(), "refactor-parser");
    let mut phases = Vec::new();
    let outcome = run_task(&mut session, &agent, &PromptBuilder::new(8_000), |s| {
        phases.push(s.phase());
        write_task_state(&snapshot_path, &s.to_snapshot()).expect("persist");
    })
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(outcome.steps_executed, 5);
    assert_eq!(
        phases,
        vec![
            Phase::Analyze,
            Phase::Plan,
            Phase::Implement,
            Phase::Verify,
            Phase::Complete
        ]
    );
    assert_eq!(session.budget().current_budget(), config.budget.base_budget + 10);
    assert_eq!(
        session.machine().phase_history(),
        &[
            Phase::Init,
            Phase::Analyze,
            Phase::Plan,
            Phase::Implement,
            Phase::Verify
        ]
    );

    let requests = agent.requests();
    assert!(requests[0].briefing.contains("phase: init"));
    assert!(requests[2].briefing.contains("phase: plan"));
    assert!(
        requests[2]
            .briefing
            .contains("Function parse has complexity 14")
    );
    assert!(requests[4].briefing.contains("src/parser.py"));

    let stored = load_task_state(&snapshot_path).expect("load");
    let restored = TaskSession::from_snapshot(stored, &config).expect("restore");
    assert_eq!(restored.phase(), Phase::Complete);
    assert_eq!(restored.steps_taken(), 5);
}

#[test]
fn failed_verification_returns_to_implement() {
    let mut session = TaskSession::new("fix-lint", &AgentConfig::default());
    let mut back_to_implement = verify_step(false);
    back_to_implement.requested_phase = Some(Phase::Implement);
    let agent = ScriptedAgent::new(vec![
        report("list_files", ActionResult::Success),
        analyze_step(),
        report("write_plan", ActionResult::Success),
        edit_step(),
        back_to_implement,
        edit_step(),
        verify_step(true),
    ]);

    let outcome =
        run_task(&mut session, &agent, &PromptBuilder::new(8_000), |_| {}).expect("run");

    assert_eq!(outcome.stop, LoopStop::Complete);
    assert_eq!(outcome.steps_executed, 7);
    let errors: Vec<_> = session
        .facts()
        .all()
        .iter()
        .filter(|fact| fact.statement() == "2 violation(s) found")
        .collect();
    assert_eq!(errors.len(), 1);
}

#[test]
fn phase_step_limit_escalates() {
    let mut config = AgentConfig::default();
    config.phases.analyze = 1;
    let mut session = TaskSession::new("stuck-analysis", &config);
    let read = |target: &str| {
        let mut step = report("read_file", ActionResult::Success);
        step.target = Some(target.to_string());
        step
    };
    let agent = ScriptedAgent::new(vec![
        report("list_files", ActionResult::Success),
        read("a.py"),
        read("b.py"),
    ]);

    let outcome =
        run_task(&mut session, &agent, &PromptBuilder::new(8_000), |_| {}).expect("run");
    assert_eq!(outcome.stop, LoopStop::Escalated);
    assert_eq!(outcome.final_phase, Phase::Escalate);
    assert_eq!(outcome.steps_executed, 3);
}

#[test]
fn alternating_failures_stop_as_error_cycle() {
    let mut session = TaskSession::new("flaky", &AgentConfig::default());
    let fail = |name: &str| {
        let mut step = report(name, ActionResult::Failure);
        step.error = Some(format!("{name} failed"));
        step
    };
    let agent = ScriptedAgent::new(vec![
        fail("edit_file"),
        fail("run_tests"),
        fail("edit_file"),
        fail("run_tests"),
    ]);

    let outcome =
        run_task(&mut session, &agent, &PromptBuilder::new(8_000), |_| {}).expect("run");
    match outcome.stop {
        LoopStop::LoopDetected { reason, .. } => {
            assert!(reason.starts_with("ERROR_CYCLE detected"), "{reason}");
        }
        other => panic!("expected error cycle, got {other:?}"),
    }
    assert_eq!(outcome.final_phase, Phase::Escalate);
    assert_eq!(
        session.budget().current_budget(),
        AgentConfig::default().budget.base_budget + 2 - 3
    );
}

#[test]
fn legacy_mode_stops_on_runaway() {
    let mut config = AgentConfig::default();
    config.budget.enhanced_loop_detection = false;
    let mut session = TaskSession::new("legacy", &config);
    let agent = ScriptedAgent::new(vec![
        report("run_tests", ActionResult::Success),
        report("run_tests", ActionResult::Failure),
        report("run_tests", ActionResult::Success),
    ]);

    let outcome =
        run_task(&mut session, &agent, &PromptBuilder::new(8_000), |_| {}).expect("run");
    assert_eq!(
        outcome.stop,
        LoopStop::Runaway {
            reason: "Runaway: identical action repeated".to_string()
        }
    );
    assert_eq!(outcome.final_phase, Phase::Analyze);
}

#[test]
fn runaway_on_final_budgeted_step_is_not_budget_exhaustion() {
    let mut config = AgentConfig::default();
    config.budget.enhanced_loop_detection = false;
    config.budget.base_budget = 3;
    config.budget.max_budget = 3;
    let mut session = TaskSession::new("tight", &config);
    let agent = ScriptedAgent::new(vec![
        report("run_tests", ActionResult::Success),
        report("run_tests", ActionResult::Success),
        report("run_tests", ActionResult::Success),
    ]);

    let outcome =
        run_task(&mut session, &agent, &PromptBuilder::new(8_000), |_| {}).expect("run");
    assert_eq!(outcome.steps_executed, 3);
    assert_eq!(
        outcome.stop,
        LoopStop::Runaway {
            reason: "Runaway: identical action repeated".to_string()
        }
    );
}
