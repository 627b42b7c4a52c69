//! Task snapshot storage (`.phaseloop/tasks/<task_id>.json`).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::loop_detector::LoopDetection;
use crate::core::phase::PhaseMachineState;
use crate::core::types::{ActionRecord, Fact};

/// Persisted state of one task between steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: String,
    #[serde(default)]
    pub steps_taken: u32,
    #[serde(default)]
    pub action_history: Vec<ActionRecord>,
    /// Every fact, active or superseded.
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub superseded_facts: Vec<String>,
    #[serde(default)]
    pub files_modified: BTreeSet<String>,
    #[serde(default)]
    pub verification_passing: bool,
    #[serde(default)]
    pub tests_passing: bool,
    /// Budget ceiling at save time; absent means "start from the configured base".
    #[serde(default)]
    pub current_budget: Option<u32>,
    /// Last positive loop verdict, kept so a restored budget neither forgets
    /// its suggestions nor penalizes the same loop twice.
    #[serde(default)]
    pub last_loop_detection: Option<LoopDetection>,
    /// Absent in snapshots written before phases were tracked.
    #[serde(default)]
    pub phase_machine_state: Option<PhaseMachineState>,
}

impl TaskSnapshot {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            steps_taken: 0,
            action_history: Vec::new(),
            facts: Vec::new(),
            superseded_facts: Vec::new(),
            files_modified: BTreeSet::new(),
            verification_passing: false,
            tests_passing: false,
            current_budget: None,
            last_loop_detection: None,
            phase_machine_state: None,
        }
    }
}

/// Default location of a task snapshot under `root`.
pub fn task_state_path(root: &Path, task_id: &str) -> PathBuf {
    root.join(".phaseloop")
        .join("tasks")
        .join(format!("{task_id}.json"))
}

/// Load a task snapshot from disk.
pub fn load_task_state(path: &Path) -> Result<TaskSnapshot> {
    debug!(path = %path.display(), "loading task state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read task state {}", path.display()))?;
    let state: TaskSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("parse task state {}", path.display()))?;
    debug!(
        task_id = %state.task_id,
        steps_taken = state.steps_taken,
        "task state loaded"
    );
    Ok(state)
}

/// Atomically write a task snapshot to disk (temp file + rename).
pub fn write_task_state(path: &Path, state: &TaskSnapshot) -> Result<()> {
    debug!(
        path = %path.display(),
        task_id = %state.task_id,
        steps_taken = state.steps_taken,
        "writing task state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("task state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp task state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace task state {}", path.display()))?;
    Ok(())
}
