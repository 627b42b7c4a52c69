//! Fact store with supersession and value-ranked compaction.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::core::types::{Fact, FactCategory};

/// Active facts handed to context assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Understanding {
    pub facts: Vec<Fact>,
}

impl Understanding {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

/// Holds the facts of one task.
///
/// Superseded facts are hidden, not deleted, so the full record survives for
/// persistence. Compaction marks low-value facts superseded as well.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: Vec<Fact>,
    superseded: HashSet<String>,
    compaction_threshold: Option<usize>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compact automatically whenever the active count exceeds `threshold`.
    pub fn with_compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = Some(threshold);
        self
    }

    /// Rebuild a store from persisted facts and superseded ids.
    ///
    /// Later facts repeating an earlier id are dropped, as are ids in
    /// `superseded` that match no fact.
    pub fn restore(facts: Vec<Fact>, superseded: impl IntoIterator<Item = String>) -> Self {
        let mut seen = HashSet::new();
        let facts: Vec<Fact> = facts
            .into_iter()
            .filter(|fact| seen.insert(fact.id().to_string()))
            .collect();
        let known: HashSet<&str> = facts.iter().map(Fact::id).collect();
        let superseded = superseded
            .into_iter()
            .filter(|id| known.contains(id.as_str()))
            .collect();
        Self {
            facts,
            superseded,
            compaction_threshold: None,
        }
    }

    /// Insert `fact`. Ids are unique: a fact whose id is already stored is
    /// ignored and `false` is returned.
    pub fn add(&mut self, fact: Fact) -> bool {
        if self.contains(fact.id()) {
            debug!(fact = fact.id(), "duplicate fact id ignored");
            return false;
        }
        if let Some(older) = fact.supersedes() {
            if self.contains(older) {
                debug!(fact = fact.id(), superseded = older, "fact superseded");
                self.superseded.insert(older.to_string());
            }
        }
        self.facts.push(fact);

        if let Some(threshold) = self.compaction_threshold {
            if self.active_count() > threshold {
                self.compact(threshold);
            }
        }
        true
    }

    fn contains(&self, id: &str) -> bool {
        self.facts.iter().any(|existing| existing.id() == id)
    }

    pub fn get_active(&self) -> Vec<&Fact> {
        self.facts
            .iter()
            .filter(|fact| !self.superseded.contains(fact.id()))
            .collect()
    }

    pub fn get_by_category(&self, category: FactCategory) -> Vec<&Fact> {
        self.get_active()
            .into_iter()
            .filter(|fact| fact.category() == category)
            .collect()
    }

    pub fn get_high_confidence(&self, threshold: f64) -> Vec<&Fact> {
        self.get_active()
            .into_iter()
            .filter(|fact| fact.confidence() >= threshold)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.facts
            .iter()
            .filter(|fact| !self.superseded.contains(fact.id()))
            .count()
    }

    /// Every fact ever added, active or not, in insertion order.
    pub fn all(&self) -> &[Fact] {
        &self.facts
    }

    /// Superseded ids in sorted order.
    pub fn superseded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.superseded.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_superseded(&self, id: &str) -> bool {
        self.superseded.contains(id)
    }

    /// Keep the `max_facts` most valuable active facts and supersede the rest.
    ///
    /// Returns the number of evicted facts; `0` means the store was left
    /// untouched because it already held at most `max_facts` active facts.
    pub fn compact(&mut self, max_facts: usize) -> usize {
        let mut ranked: Vec<(usize, &Fact)> = self
            .facts
            .iter()
            .enumerate()
            .filter(|(_, fact)| !self.superseded.contains(fact.id()))
            .collect();
        if ranked.len() <= max_facts {
            return 0;
        }

        ranked.sort_by(|(a_idx, a), (b_idx, b)| {
            b.retention_score()
                .partial_cmp(&a.retention_score())
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.step().cmp(&a.step()))
                .then_with(|| b_idx.cmp(a_idx))
        });

        let evicted: Vec<String> = ranked[max_facts..]
            .iter()
            .map(|(_, fact)| fact.id().to_string())
            .collect();
        let count = evicted.len();
        self.superseded.extend(evicted);
        debug!(evicted = count, kept = max_facts, "fact store compacted");
        count
    }

    pub fn to_understanding(&self) -> Understanding {
        Understanding {
            facts: self.get_active().into_iter().cloned().collect(),
        }
    }
}
