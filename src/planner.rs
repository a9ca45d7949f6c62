//! Run planning and topology validation.
//!
//! The planner freezes a [`StageGraph`] into a [`Plan`]: an immutable snapshot
//! of every stage with its resolved predecessor and successor lists. Building
//! a plan also validates the topology, so a malformed graph is reported as an
//! error up front instead of leaving a join point waiting forever:
//!
//! 1. **Dangling edges** -- both endpoints of every edge must belong to the graph.
//! 2. **Cycles** -- Kahn's algorithm must consume every stage.
//! 3. **Roots** -- a non-empty graph needs at least one stage without predecessors.
//!
//! [`Plan::explain`] renders the plan in topological order for debugging.

use crate::error::EngineError;
use crate::graph::{Recursion, StageGraph};
use crate::ops::{Element, OpPipeline};
use crate::stage_id::StageId;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

/// One stage as seen by its coordinator during a run.
pub struct PlannedStage<T> {
    pub id: StageId,
    pub alias: Option<String>,
    pub data: Option<Vec<T>>,
    pub ops: OpPipeline<T>,
    pub tasks: Option<usize>,
    pub min_range: Option<usize>,
    pub recursion: Option<Recursion>,
    pub predecessors: Vec<StageId>,
    pub successors: Vec<StageId>,
}

impl<T> PlannedStage<T> {
    pub fn is_root(&self) -> bool {
        self.predecessors.is_empty()
    }

    pub fn label(&self) -> String {
        match &self.alias {
            Some(a) => format!("{} ({a})", self.id),
            None => self.id.to_string(),
        }
    }
}

/// Validated, immutable snapshot of a stage graph.
pub struct Plan<T> {
    stages: HashMap<StageId, Arc<PlannedStage<T>>>,
    roots: Vec<StageId>,
    order: Vec<StageId>,
}

impl<T: Element> Plan<T> {
    /// Snapshot and validate `graph`.
    ///
    /// # Errors
    /// [`EngineError::DanglingEdge`], [`EngineError::DuplicateAlias`],
    /// [`EngineError::Cycle`] or [`EngineError::NoRoots`] for a malformed
    /// graph.
    pub fn build(graph: &StageGraph<T>) -> Result<Self, EngineError> {
        let (nodes, edges) = graph.snapshot();

        for &(from, to) in &edges {
            if !nodes.contains_key(&from) || !nodes.contains_key(&to) {
                return Err(EngineError::DanglingEdge { from, to });
            }
        }

        let mut aliases = HashSet::new();
        for alias in nodes.values().filter_map(|n| n.alias.as_deref()) {
            if !aliases.insert(alias) {
                return Err(EngineError::DuplicateAlias(alias.to_string()));
            }
        }

        let mut preds: HashMap<StageId, Vec<StageId>> = HashMap::new();
        let mut succs: HashMap<StageId, Vec<StageId>> = HashMap::new();
        for &(from, to) in &edges {
            succs.entry(from).or_default().push(to);
            preds.entry(to).or_default().push(from);
        }

        let ids: Vec<StageId> = nodes.keys().copied().collect();
        let order = topological_order(&ids, &preds, &succs)?;
        let roots: Vec<StageId> = order
            .iter()
            .copied()
            .filter(|id| preds.get(id).is_none_or(Vec::is_empty))
            .collect();
        if roots.is_empty() {
            return Err(EngineError::NoRoots);
        }

        let stages = nodes
            .into_iter()
            .map(|(id, node)| {
                let planned = PlannedStage {
                    id,
                    alias: node.alias,
                    data: node.data,
                    ops: node.ops,
                    tasks: node.tasks,
                    min_range: node.min_range,
                    recursion: node.recursion,
                    predecessors: preds.remove(&id).unwrap_or_default(),
                    successors: succs.remove(&id).unwrap_or_default(),
                };
                (id, Arc::new(planned))
            })
            .collect();

        Ok(Self { stages, roots, order })
    }

    pub fn stage(&self, id: StageId) -> Option<&Arc<PlannedStage<T>>> {
        self.stages.get(&id)
    }

    pub fn roots(&self) -> &[StageId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stages in a topological order (ties broken by id).
    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    pub fn explain(&self) -> PlanExplanation {
        let steps = self
            .order
            .iter()
            .filter_map(|id| self.stages.get(id))
            .map(|s| ExplainStep {
                label: s.label(),
                mode: match s.recursion {
                    Some(r) => {
                        format!("recursive(fanout={}, threshold={})", r.fanout, r.threshold)
                    }
                    None => format!("tree(tasks={:?}, min_range={:?})", s.tasks, s.min_range),
                },
                ops: format!("{:?}", s.ops),
                predecessors: s.predecessors.clone(),
                successors: s.successors.clone(),
                input_len: s.data.as_ref().map(Vec::len),
            })
            .collect();
        PlanExplanation {
            roots: self.roots.clone(),
            steps,
        }
    }
}

/// Kahn's algorithm with a sorted ready set so the order is deterministic.
fn topological_order(
    ids: &[StageId],
    preds: &HashMap<StageId, Vec<StageId>>,
    succs: &HashMap<StageId, Vec<StageId>>,
) -> Result<Vec<StageId>, EngineError> {
    let mut indegree: BTreeMap<StageId, usize> = ids
        .iter()
        .map(|id| (*id, preds.get(id).map_or(0, Vec::len)))
        .collect();
    let mut ready: VecDeque<StageId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(ids.len());

    while let Some(id) = ready.pop_front() {
        order.push(id);
        for next in succs.get(&id).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(*next);
                }
            }
        }
    }

    if order.len() < ids.len() {
        let stuck = indegree
            .iter()
            .find(|(_, d)| **d > 0)
            .map(|(id, _)| *id)
            .or_else(|| ids.first().copied());
        if let Some(id) = stuck {
            return Err(EngineError::Cycle(id));
        }
    }
    Ok(order)
}

/// One line of [`PlanExplanation`].
#[derive(Debug, Clone)]
pub struct ExplainStep {
    pub label: String,
    pub mode: String,
    pub ops: String,
    pub predecessors: Vec<StageId>,
    pub successors: Vec<StageId>,
    pub input_len: Option<usize>,
}

/// Human-readable rendering of a plan.
#[derive(Debug, Clone)]
pub struct PlanExplanation {
    pub roots: Vec<StageId>,
    pub steps: Vec<ExplainStep>,
}

impl Display for PlanExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(f, "Stage plan ({} stages, {} roots)", self.steps.len(), self.roots.len())?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  [{i}] {} {}", step.label, step.mode)?;
            writeln!(f, "      ops: {}", step.ops)?;
            if let Some(len) = step.input_len {
                writeln!(f, "      input: {len} elements")?;
            }
            if !step.predecessors.is_empty() {
                let ids: Vec<String> = step.predecessors.iter().map(ToString::to_string).collect();
                writeln!(f, "      after: {}", ids.join(", "))?;
            }
        }
        Ok(())
    }
}
