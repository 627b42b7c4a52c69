//! Test-only helpers: action record builders, a scripted agent and a temp workspace.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ActionRecord, ActionResult};
use crate::io::config::{AgentConfig, write_config};
use crate::io::task_state::{TaskSnapshot, task_state_path, write_task_state};
use crate::looping::{Agent, StepRequest};
use crate::session::StepReport;

/// Create a deterministic action record with no parameters.
pub fn action(step: u32, name: &str, target: Option<&str>, result: ActionResult) -> ActionRecord {
    ActionRecord {
        step,
        action: name.to_string(),
        target: target.map(str::to_string),
        parameters: Default::default(),
        result,
        summary: format!("{name} step {step}"),
        error: (result == ActionResult::Failure).then(|| format!("{name} failed")),
    }
}

pub fn failed(step: u32, name: &str, target: Option<&str>) -> ActionRecord {
    action(step, name, target, ActionResult::Failure)
}

pub fn succeeded(step: u32, name: &str, target: Option<&str>) -> ActionRecord {
    action(step, name, target, ActionResult::Success)
}

/// Step report with defaults for everything but the action and result.
pub fn report(name: &str, result: ActionResult) -> StepReport {
    StepReport::new(name, result)
}

/// Agent that replays predetermined reports and records the requests it saw.
pub struct ScriptedAgent {
    reports: RefCell<VecDeque<StepReport>>,
    requests: RefCell<Vec<StepRequest>>,
    calls: Cell<u32>,
}

impl ScriptedAgent {
    pub fn new(reports: Vec<StepReport>) -> Self {
        Self {
            reports: RefCell::new(reports.into()),
            requests: RefCell::new(Vec::new()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn step(&self, request: &StepRequest) -> Result<StepReport> {
        self.calls.set(self.calls.get() + 1);
        self.requests.borrow_mut().push(request.clone());
        self.reports
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent exhausted at step {}", request.step))
    }
}

/// Temporary working directory with a `.phaseloop/` layout.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join(".phaseloop").join("config.toml")
    }

    pub fn write_config(&self, config: &AgentConfig) -> Result<()> {
        write_config(&self.config_path(), config)
    }

    /// Persist `snapshot` at its default location and return the path.
    pub fn write_snapshot(&self, snapshot: &TaskSnapshot) -> Result<PathBuf> {
        let path = task_state_path(self.root(), &snapshot.task_id);
        write_task_state(&path, snapshot)?;
        Ok(path)
    }

    /// Write `records` as a JSON history file and return the path.
    pub fn write_history(&self, name: &str, records: &[ActionRecord]) -> Result<PathBuf> {
        let path = self.root().join(name);
        std::fs::write(&path, serde_json::to_string_pretty(records)?)?;
        Ok(path)
    }
}
