//! Lightweight unique identifier for stages within a [`StageGraph`](crate::graph::StageGraph).
//!
//! Each stage added to a graph is assigned a sequential `StageId`. The id is the
//! key for the orchestrator's result registry, the runtime directory that keeps
//! join points single-instanced, and every log line a coordinator emits.
//!
//! Ids are small, `Copy`, and hashable, so they can be used efficiently as keys
//! in maps or sets while walking the graph.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Unique numeric identifier for a stage in a graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct StageId(u64);

impl StageId {
    /// Create a new `StageId` (used internally by the graph).
    pub(crate) fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "stage-{}", self.0)
    }
}
