//! Per-run result, raw-input and alias registries.
//!
//! An [`Orchestrator`](crate::Orchestrator) creates one registry per run and
//! shares it with every stage coordinator of that run. Each coordinator writes
//! its own stage's entries exactly once; callers read after `run` returns.
//! Workers left over from an earlier run hold that run's registry, so results
//! never leak between runs.

use crate::stage_id::StageId;
use dashmap::DashMap;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Lookup key for registry reads: a stage id or an alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StageKey {
    Id(StageId),
    Alias(String),
}

impl From<StageId> for StageKey {
    fn from(id: StageId) -> Self {
        StageKey::Id(id)
    }
}

impl From<&str> for StageKey {
    fn from(alias: &str) -> Self {
        StageKey::Alias(alias.to_string())
    }
}

impl From<String> for StageKey {
    fn from(alias: String) -> Self {
        StageKey::Alias(alias)
    }
}

impl<T: crate::ops::Element> From<&crate::graph::Stage<T>> for StageKey {
    fn from(stage: &crate::graph::Stage<T>) -> Self {
        StageKey::Id(stage.id())
    }
}

impl Display for StageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            StageKey::Id(id) => write!(f, "{id}"),
            StageKey::Alias(a) => write!(f, "alias '{a}'"),
        }
    }
}

pub struct Registry<T> {
    results: DashMap<StageId, Vec<T>>,
    raw_data: DashMap<StageId, Vec<T>>,
    aliases: DashMap<String, StageId>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            results: DashMap::new(),
            raw_data: DashMap::new(),
            aliases: DashMap::new(),
        }
    }
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_result(&self, id: StageId, alias: Option<&str>, result: Vec<T>) {
        if let Some(alias) = alias {
            self.aliases.insert(alias.to_string(), id);
        }
        self.results.insert(id, result);
    }

    pub(crate) fn record_input(&self, id: StageId, input: Vec<T>) {
        self.raw_data.insert(id, input);
    }

    pub fn resolve(&self, key: &StageKey) -> Option<StageId> {
        match key {
            StageKey::Id(id) => Some(*id),
            StageKey::Alias(a) => self.aliases.get(a).map(|r| *r.value()),
        }
    }

    /// Final output of a stage, cloned out of the registry.
    pub fn result(&self, key: &StageKey) -> Option<Vec<T>> {
        let id = self.resolve(key)?;
        self.results.get(&id).map(|r| r.value().clone())
    }

    /// Input delivered to a stage (only recorded with `capture_input`).
    pub fn input(&self, key: &StageKey) -> Option<Vec<T>> {
        let id = self.resolve(key)?;
        self.raw_data.get(&id).map(|r| r.value().clone())
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn aliases(&self) -> Vec<(String, StageId)> {
        self.aliases
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect()
    }
}
