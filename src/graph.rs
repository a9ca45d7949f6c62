//! Stage graph construction.
//!
//! A [`StageGraph`] is the container for a DAG of stages; [`Stage`] is a cheap
//! handle to one vertex. Builder methods only record configuration, nothing
//! executes until the graph is handed to
//! [`Orchestrator::run`](crate::Orchestrator::run).
//!
//! ```
//! use stagebeam::{StageGraph, sequence};
//!
//! let g = StageGraph::<i64>::new();
//! let evens = g.stage().data((1..=10).collect()).filter(|v: &i64| v % 2 == 0);
//! let squares = g.stage().alias("squares").map(|v: &i64| v * v);
//! sequence(&evens, &squares);
//!
//! assert!(evens.is_root());
//! assert_eq!(squares.predecessors(), vec![evens.id()]);
//! ```
//!
//! Edges are stored once in the graph, so `a` lists `b` as a successor exactly
//! when `b` lists `a` as a predecessor.

use crate::ops::{Eager, Element, ElementIter, OpPipeline, Split};
use crate::stage_id::StageId;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Ids are unique across graphs so an edge to a foreign stage is detectable.
static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Recursive-decomposition settings of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Recursion {
    /// Children spawned per split.
    pub fanout: usize,
    /// Inputs at or below this size are processed directly.
    pub threshold: usize,
}

/// Configuration of one vertex.
pub struct StageNode<T> {
    pub id: StageId,
    pub alias: Option<String>,
    pub data: Option<Vec<T>>,
    pub ops: OpPipeline<T>,
    pub tasks: Option<usize>,
    pub min_range: Option<usize>,
    pub recursion: Option<Recursion>,
}

impl<T: Clone> Clone for StageNode<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            alias: self.alias.clone(),
            data: self.data.clone(),
            ops: self.ops.clone(),
            tasks: self.tasks,
            min_range: self.min_range,
            recursion: self.recursion,
        }
    }
}

pub struct GraphInner<T> {
    pub nodes: HashMap<StageId, StageNode<T>>,
    pub edges: Vec<(StageId, StageId)>,
}

/// Container for a DAG of stages. Clones share the same graph.
pub struct StageGraph<T> {
    pub(crate) inner: Arc<Mutex<GraphInner<T>>>,
}

impl<T> Default for StageGraph<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GraphInner {
                nodes: HashMap::new(),
                edges: Vec::new(),
            })),
        }
    }
}

impl<T> Clone for StageGraph<T> {
    fn clone(&self) -> Self {
        StageGraph {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Element> StageGraph<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty stage to the graph.
    pub fn stage(&self) -> Stage<T> {
        let id = StageId::new(NEXT_STAGE_ID.fetch_add(1, AtomicOrdering::Relaxed));
        self.inner.lock().nodes.insert(
            id,
            StageNode {
                id,
                alias: None,
                data: None,
                ops: OpPipeline::default(),
                tasks: None,
                min_range: None,
                recursion: None,
            },
        );
        Stage {
            graph: self.clone(),
            id,
        }
    }

    /// Record `from -> to`. Duplicate edges are ignored.
    pub(crate) fn connect(&self, from: StageId, to: StageId) {
        let mut g = self.inner.lock();
        if !g.edges.contains(&(from, to)) {
            g.edges.push((from, to));
        }
    }

    /// Make `to` the only successor of `from`.
    pub(crate) fn connect_sole(&self, from: StageId, to: StageId) {
        let mut g = self.inner.lock();
        g.edges.retain(|&(f, t)| f != from || t == to);
        if !g.edges.contains(&(from, to)) {
            g.edges.push((from, to));
        }
    }

    /// Clone the current nodes and edges.
    pub fn snapshot(&self) -> (HashMap<StageId, StageNode<T>>, Vec<(StageId, StageId)>) {
        let g = self.inner.lock();
        (g.nodes.clone(), g.edges.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, id: StageId, f: impl FnOnce(&mut StageNode<T>)) {
        if let Some(node) = self.inner.lock().nodes.get_mut(&id) {
            f(node);
        }
    }
}

/// Handle to one stage of a [`StageGraph`].
pub struct Stage<T> {
    pub(crate) graph: StageGraph<T>,
    id: StageId,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            id: self.id,
        }
    }
}

impl<T: Element> Stage<T> {
    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn graph(&self) -> &StageGraph<T> {
        &self.graph
    }

    pub fn alias_name(&self) -> Option<String> {
        self.graph
            .inner
            .lock()
            .nodes
            .get(&self.id)
            .and_then(|n| n.alias.clone())
    }

    pub fn predecessors(&self) -> Vec<StageId> {
        let g = self.graph.inner.lock();
        g.edges.iter().filter(|(_, to)| *to == self.id).map(|(from, _)| *from).collect()
    }

    pub fn successors(&self) -> Vec<StageId> {
        let g = self.graph.inner.lock();
        g.edges.iter().filter(|(from, _)| *from == self.id).map(|(_, to)| *to).collect()
    }

    pub fn is_root(&self) -> bool {
        self.predecessors().is_empty()
    }

    /// Input elements. On a non-root stage these are placed ahead of the
    /// elements delivered by predecessors.
    pub fn data(self, data: Vec<T>) -> Self {
        self.graph.update(self.id, |n| n.data = Some(data));
        self
    }

    pub fn alias(self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.graph.update(self.id, |n| n.alias = Some(alias));
        self
    }

    /// Parallelism hint: upper bound on the number of partition workers.
    pub fn tasks(self, tasks: usize) -> Self {
        self.graph.update(self.id, |n| n.tasks = Some(tasks.max(1)));
        self
    }

    /// Minimum number of elements a partition should hold.
    pub fn min_range(self, min: usize) -> Self {
        self.graph.update(self.id, |n| n.min_range = Some(min));
        self
    }

    pub fn filter<F>(self, pred: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&T) -> bool,
    {
        self.graph.update(self.id, |n| n.ops.push_filter(Arc::new(pred)));
        self
    }

    pub fn map<F>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&T) -> T,
    {
        self.graph.update(self.id, |n| n.ops.push_map(Arc::new(f)));
        self
    }

    pub fn for_each<F>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&T),
    {
        self.graph.update(self.id, |n| n.ops.push_for_each(Arc::new(f)));
        self
    }

    /// Whole-partition transform; replaces the filter/map/for_each triad.
    pub fn bulk_transform<F>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(Vec<T>) -> Vec<T>,
    {
        self.graph
            .update(self.id, |n| n.ops.eager = Some(Eager::Bulk(Arc::new(f))));
        self
    }

    /// Iterator-to-iterator transform over the partition; replaces the
    /// filter/map/for_each triad.
    pub fn sequence_transform<F, I>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(ElementIter<T>) -> I,
        I: Iterator<Item = T> + Send + 'static,
    {
        let boxed = move |it: ElementIter<T>| -> ElementIter<T> { Box::new(f(it)) };
        self.graph
            .update(self.id, |n| n.ops.eager = Some(Eager::Sequence(Arc::new(boxed))));
        self
    }

    /// Combiner used to merge two partial results during tree reduction.
    /// The left operand comes from the lower-ranked worker.
    pub fn reduce<F>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(Vec<T>, Vec<T>) -> Vec<T>,
    {
        self.graph.update(self.id, |n| n.ops.reduce = Some(Arc::new(f)));
        self
    }

    pub fn sorted_by<F>(self, cmp: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&T, &T) -> Ordering,
    {
        self.graph.update(self.id, |n| n.ops.sort = Some(Arc::new(cmp)));
        self
    }

    /// Switch the stage to recursive decomposition with `fanout` children per
    /// split; inputs of at most `threshold` elements are processed directly.
    pub fn recursive(self, fanout: usize, threshold: usize) -> Self {
        let recursion = Recursion {
            fanout: fanout.max(1),
            threshold,
        };
        self.graph.update(self.id, |n| n.recursion = Some(recursion));
        self
    }

    /// Split function for recursive decomposition. Receives the input and
    /// the configured fanout.
    pub fn partition_by<F>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(Vec<T>, usize) -> Split<T>,
    {
        self.graph.update(self.id, |n| n.ops.partition = Some(Arc::new(f)));
        self
    }

    /// Merge function for recursive decomposition: child results ordered by
    /// child index plus the criterion the split produced.
    pub fn merge_by<F>(self, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(BTreeMap<usize, Vec<T>>, Vec<T>) -> Vec<T>,
    {
        self.graph.update(self.id, |n| n.ops.merge = Some(Arc::new(f)));
        self
    }

    /// Make `next` the sole successor of this stage and return `next`.
    pub fn then(&self, next: &Stage<T>) -> Stage<T> {
        sequence(self, next);
        next.clone()
    }
}

impl<T: Element + Ord> Stage<T> {
    pub fn sorted_ascending(self) -> Self {
        self.sorted_by(|a: &T, b: &T| a.cmp(b))
    }

    pub fn sorted_descending(self) -> Self {
        self.sorted_by(|a: &T, b: &T| b.cmp(a))
    }
}

/// Linear chain: `b` becomes the sole successor of `a`, replacing any edges
/// `a` already had.
pub fn sequence<T: Element>(a: &Stage<T>, b: &Stage<T>) {
    a.graph.connect_sole(a.id, b.id);
}

/// Fan-out: each of `targets` becomes a successor of `source` and receives
/// its full result.
pub fn parallel<T: Element>(source: &Stage<T>, targets: &[Stage<T>]) {
    for t in targets {
        source.graph.connect(source.id, t.id);
    }
}

/// Join: `target` waits for every stage in `sources` and runs once over the
/// union of their results.
pub fn merge<T: Element>(target: &Stage<T>, sources: &[Stage<T>]) {
    for s in sources {
        target.graph.connect(s.id, target.id);
    }
}
