//! Agent configuration stored under `.phaseloop/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::BudgetConfig;
use crate::core::loop_detector::LoopDetectorConfig;
use crate::core::phase::PhaseLimits;

/// Agent configuration (TOML).
///
/// Intended to be edited by humans. Every section is optional; missing fields
/// fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub budget: BudgetConfig,
    pub loop_detection: LoopDetectorConfig,
    pub phases: PhaseLimits,
    pub facts: FactConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactConfig {
    /// Compact the fact store once more than this many facts are active.
    pub compaction_threshold: usize,
    /// Minimum confidence for facts included in phase briefings.
    pub high_confidence: f64,
}

impl Default for FactConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 50,
            high_confidence: 0.7,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        let budget = &self.budget;
        if budget.base_budget == 0 {
            return Err(anyhow!("budget.base_budget must be > 0"));
        }
        if budget.base_budget > budget.max_budget {
            return Err(anyhow!(
                "budget.base_budget ({}) must not exceed budget.max_budget ({})",
                budget.base_budget,
                budget.max_budget
            ));
        }
        if budget.runaway_threshold < 2 {
            return Err(anyhow!("budget.runaway_threshold must be >= 2"));
        }

        let detection = &self.loop_detection;
        if detection.identical_threshold < 2 {
            return Err(anyhow!("loop_detection.identical_threshold must be >= 2"));
        }
        if detection.cycle_threshold == 0 {
            return Err(anyhow!("loop_detection.cycle_threshold must be > 0"));
        }
        if detection.no_progress_threshold < 2 {
            return Err(anyhow!("loop_detection.no_progress_threshold must be >= 2"));
        }

        let phases = &self.phases;
        if [phases.init, phases.analyze, phases.plan, phases.implement, phases.verify]
            .contains(&0)
        {
            return Err(anyhow!("phases.* step limits must be > 0"));
        }

        if self.facts.compaction_threshold == 0 {
            return Err(anyhow!("facts.compaction_threshold must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.facts.high_confidence) {
            return Err(anyhow!("facts.high_confidence must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
