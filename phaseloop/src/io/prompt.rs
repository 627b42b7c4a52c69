//! Phase briefing builder: the per-step prompt handed to the agent.
//!
//! Guidance is selected by the current phase. Facts, loop warnings and the
//! modified-file list are droppable sections, removed in that reverse order of
//! importance when the rendered briefing exceeds its byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::phase::Phase;
use crate::core::types::Fact;
use crate::session::TaskSession;

const BRIEFING_TEMPLATE: &str = include_str!("prompts/briefing.md");

/// Per-phase guidance, included by name as `guidance/<phase>`.
const GUIDANCE_TEMPLATES: [(&str, &str); 7] = [
    ("guidance/init", include_str!("prompts/guidance/init.md")),
    ("guidance/analyze", include_str!("prompts/guidance/analyze.md")),
    ("guidance/plan", include_str!("prompts/guidance/plan.md")),
    ("guidance/implement", include_str!("prompts/guidance/implement.md")),
    ("guidance/verify", include_str!("prompts/guidance/verify.md")),
    ("guidance/complete", include_str!("prompts/guidance/complete.md")),
    ("guidance/escalate", include_str!("prompts/guidance/escalate.md")),
];

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 3] = ["files", "facts", "suggestions"];

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Everything the briefing template needs.
#[derive(Debug, Clone, Serialize)]
pub struct BriefingInputs {
    pub task_id: String,
    pub phase: Phase,
    /// Number of the step about to run (1-indexed).
    pub step: u32,
    pub steps_in_phase: u32,
    pub remaining_budget: u32,
    pub facts: Vec<Fact>,
    pub suggestions: Vec<String>,
    pub files_modified: Vec<String>,
}

impl BriefingInputs {
    pub fn from_session(session: &TaskSession) -> Self {
        let steps_taken = session.steps_taken();
        Self {
            task_id: session.task_id().to_string(),
            phase: session.phase(),
            step: steps_taken + 1,
            steps_in_phase: session.machine().steps_in_phase(),
            remaining_budget: session.budget().remaining(steps_taken),
            facts: session.briefing_facts().into_iter().cloned().collect(),
            suggestions: session.budget().get_loop_suggestions(),
            files_modified: session.files_modified().iter().cloned().collect(),
        }
    }
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("briefing", BRIEFING_TEMPLATE)
            .expect("briefing template should be valid");
        for (name, source) in GUIDANCE_TEMPLATES {
            env.add_template(name, source)
                .expect("guidance template should be valid");
        }
        Self { env }
    }

    fn render(&self, input: &BriefingInputs) -> Result<String> {
        let template = self.env.get_template("briefing")?;
        let rendered = template
            .render(context! {
                task_id => input.task_id,
                phase => input.phase.as_str(),
                step => input.step,
                steps_in_phase => input.steps_in_phase,
                remaining_budget => input.remaining_budget,
                facts => input.facts,
                suggestions => input.suggestions,
                files_modified => input.files_modified,
            })
            .with_context(|| format!("render briefing for phase {}", input.phase))?;
        Ok(rendered)
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (idx, caps) in markers.iter().enumerate() {
        let Some(marker) = caps.get(0) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[marker.end()..end].trim().to_string();
        let required = &caps[2] == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: caps[1].to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    let total = |secs: &[Section]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped briefing section for budget"
            );
            sections.remove(idx);
        }
    }
}

/// Builds briefings within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, input: &BriefingInputs) -> Result<String> {
        let rendered = PromptEngine::new().render(input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
