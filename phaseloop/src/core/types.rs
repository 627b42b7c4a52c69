//! Shared deterministic types for the phase/loop/budget core.
//!
//! These types are the contract between the step loop and its collaborators
//! (tool execution, understanding extraction, persistence). They carry no I/O
//! and must stay deterministic across runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of observation a [`Fact`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactCategory {
    Verification,
    Error,
    CodeStructure,
    FileContent,
    Inference,
}

impl FactCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FactCategory::Verification => "verification",
            FactCategory::Error => "error",
            FactCategory::CodeStructure => "code_structure",
            FactCategory::FileContent => "file_content",
            FactCategory::Inference => "inference",
        }
    }

    /// Retention bonus used when compacting the fact store.
    pub fn retention_bonus(self) -> f64 {
        match self {
            FactCategory::Verification | FactCategory::Error => 2.0,
            FactCategory::CodeStructure => 1.0,
            FactCategory::FileContent => 0.5,
            FactCategory::Inference => 0.0,
        }
    }
}

impl fmt::Display for FactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction-time failures for [`Fact`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactError {
    #[error("fact '{id}' confidence {confidence} is outside [0, 1]")]
    ConfidenceOutOfRange { id: String, confidence: f64 },
    #[error("fact id must not be empty")]
    EmptyId,
}

/// A timestamped, confidence-scored observation.
///
/// Facts are immutable: a newer fact replaces an older one by naming it in
/// `supersedes`, never by editing it. Deserialization runs the same
/// validation as [`Fact::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FactRecord", into = "FactRecord")]
pub struct Fact {
    id: String,
    category: FactCategory,
    statement: String,
    confidence: f64,
    source: String,
    step: u32,
    supersedes: Option<String>,
}

impl Fact {
    /// Create a fact, rounding confidence to two decimals.
    ///
    /// Confidence outside `[0, 1]` (or NaN) is rejected, never clamped.
    pub fn new(
        id: impl Into<String>,
        category: FactCategory,
        statement: impl Into<String>,
        confidence: f64,
        source: impl Into<String>,
        step: u32,
    ) -> Result<Self, FactError> {
        let id = id.into();
        if id.is_empty() {
            return Err(FactError::EmptyId);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(FactError::ConfidenceOutOfRange { id, confidence });
        }
        Ok(Self {
            id,
            category,
            statement: statement.into(),
            confidence: (confidence * 100.0).round() / 100.0,
            source: source.into(),
            step,
            supersedes: None,
        })
    }

    /// Mark this fact as the replacement for `older_id`.
    pub fn superseding(mut self, older_id: impl Into<String>) -> Self {
        self.supersedes = Some(older_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> FactCategory {
        self.category
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn supersedes(&self) -> Option<&str> {
        self.supersedes.as_deref()
    }

    /// Score used to rank facts during compaction (higher is kept).
    pub fn retention_score(&self) -> f64 {
        self.category.retention_bonus() + self.confidence
    }
}

/// Wire form of [`Fact`]; validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FactRecord {
    id: String,
    category: FactCategory,
    statement: String,
    confidence: f64,
    source: String,
    step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    supersedes: Option<String>,
}

impl TryFrom<FactRecord> for Fact {
    type Error = FactError;

    fn try_from(record: FactRecord) -> Result<Self, Self::Error> {
        let fact = Fact::new(
            record.id,
            record.category,
            record.statement,
            record.confidence,
            record.source,
            record.step,
        )?;
        Ok(match record.supersedes {
            Some(older) => fact.superseding(older),
            None => fact,
        })
    }
}

impl From<Fact> for FactRecord {
    fn from(fact: Fact) -> Self {
        Self {
            id: fact.id,
            category: fact.category,
            statement: fact.statement,
            confidence: fact.confidence,
            source: fact.source,
            step: fact.step,
            supersedes: fact.supersedes,
        }
    }
}

/// Outcome of a single agent action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    Success,
    Failure,
    Partial,
}

/// One agent step: the tool invoked and what came of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub step: u32,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    pub result: ActionResult,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn is_failure(&self) -> bool {
        self.result == ActionResult::Failure
    }

    pub fn is_success(&self) -> bool {
        self.result == ActionResult::Success
    }
}
