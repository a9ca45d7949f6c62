//! Recursive-decomposition workers.
//!
//! Instead of one flat fan-out, a recursive worker that receives more than
//! `threshold` elements splits its input with the stage's partition function,
//! spawns one child per sub-list and waits for all of them. Child results are
//! collected in an ordered map keyed by child index and folded by the stage's
//! merge function together with the split's criterion. Fan-in follows the
//! shape of the recursion tree; there is no peer messaging.

use crate::coordinator::CoordMsg;
use crate::error::PipelineFault;
use crate::graph::Recursion;
use crate::metrics::MetricsCollector;
use crate::ops::{Element, OpPipeline, Split};
use crate::runtime::{Actor, Addr, Context, Flow};
use crate::stage_id::StageId;
use crate::worker::guarded;
use std::collections::BTreeMap;
use std::mem::take;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Where a worker reports its result.
pub(crate) enum Upstream<T> {
    Coordinator(Addr<CoordMsg<T>>),
    Parent {
        addr: Addr<RecursiveMsg<T>>,
        index: usize,
    },
}

impl<T: Element> Upstream<T> {
    fn report(&self, rank: u64, result: Vec<T>) {
        match self {
            Upstream::Coordinator(addr) => {
                addr.send(CoordMsg::Result(result));
            }
            Upstream::Parent { addr, index } => {
                addr.send(RecursiveMsg::Report {
                    index: *index,
                    rank,
                    result,
                });
            }
        }
    }
}

pub(crate) enum RecursiveMsg<T> {
    Task {
        partition: Vec<T>,
        upstream: Upstream<T>,
    },
    Report {
        index: usize,
        rank: u64,
        result: Vec<T>,
    },
}

/// Rank of child `index` of a worker ranked `parent`.
pub(crate) fn child_rank(parent: u64, fanout: usize, index: usize) -> u64 {
    parent
        .wrapping_shl((fanout / 2) as u32)
        .wrapping_add(index as u64 + 1)
}

pub(crate) struct RecursiveWorker<T> {
    stage: StageId,
    rank: u64,
    recursion: Recursion,
    ops: OpPipeline<T>,
    coordinator: Addr<CoordMsg<T>>,
    metrics: MetricsCollector,
    /// Shared by the whole tree; set by the coordinator on fault or teardown.
    cancel: Arc<AtomicBool>,
    upstream: Option<Upstream<T>>,
    criterion: Vec<T>,
    expected: usize,
    results: BTreeMap<usize, Vec<T>>,
}

impl<T: Element> RecursiveWorker<T> {
    pub fn new(
        stage: StageId,
        rank: u64,
        recursion: Recursion,
        ops: OpPipeline<T>,
        coordinator: Addr<CoordMsg<T>>,
        metrics: MetricsCollector,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stage,
            rank,
            recursion,
            ops,
            coordinator,
            metrics,
            cancel,
            upstream: None,
            criterion: Vec::new(),
            expected: 0,
            results: BTreeMap::new(),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn fault(&self, fault: PipelineFault) -> Flow {
        warn!(
            stage = %self.stage,
            rank = self.rank,
            error = %fault.message,
            "recursive worker failed"
        );
        self.metrics.fault();
        self.coordinator.send(CoordMsg::Fault(fault));
        Flow::Stop
    }

    fn finish(&self, result: Vec<T>) -> Flow {
        if let Some(upstream) = &self.upstream {
            upstream.report(self.rank, result);
        }
        Flow::Stop
    }

    fn missing_fns(&self) -> Flow {
        self.fault(PipelineFault {
            stage: self.stage,
            rank: Some(self.rank),
            message: "recursive stage without partition_by/merge_by".to_string(),
        })
    }

    fn on_task(&mut self, partition: Vec<T>, ctx: &Context<RecursiveMsg<T>>) -> Flow {
        if self.cancelled() {
            trace!(stage = %self.stage, rank = self.rank, "tree cancelled, skipping task");
            return Flow::Stop;
        }
        let len = partition.len();
        if len <= self.recursion.threshold {
            trace!(stage = %self.stage, rank = self.rank, len, "processing leaf");
            return match guarded(self.stage, self.rank, || self.ops.run(partition)) {
                Ok(result) => self.finish(result),
                Err(fault) => self.fault(fault),
            };
        }

        let (Some(split_fn), Some(merge_fn)) = (&self.ops.partition, &self.ops.merge) else {
            return self.missing_fns();
        };
        let fanout = self.recursion.fanout;
        let split = guarded(self.stage, self.rank, || split_fn(partition, fanout));
        let Split { criterion, parts } = match split {
            Ok(split) => split,
            Err(fault) => return self.fault(fault),
        };
        if self.cancelled() {
            return Flow::Stop;
        }

        // A split that does not shrink the input would recurse forever; run
        // its parts in place instead.
        if parts.is_empty() || parts.iter().all(|p| p.len() >= len) {
            debug!(
                stage = %self.stage,
                rank = self.rank,
                parts = parts.len(),
                "split did not shrink input, merging in place"
            );
            let ops = &self.ops;
            let merged = guarded(self.stage, self.rank, || {
                let results: BTreeMap<usize, Vec<T>> =
                    parts.into_iter().map(|p| ops.run(p)).enumerate().collect();
                merge_fn(results, criterion)
            });
            return match merged {
                Ok(result) => self.finish(result),
                Err(fault) => self.fault(fault),
            };
        }

        self.metrics.recursive_split();
        self.metrics.workers_spawned(parts.len() as u64);
        self.expected = parts.len();
        self.criterion = criterion;
        debug!(
            stage = %self.stage,
            rank = self.rank,
            len,
            children = parts.len(),
            "splitting partition"
        );
        for (index, part) in parts.into_iter().enumerate() {
            let child = ctx.spawn(RecursiveWorker::new(
                self.stage,
                child_rank(self.rank, fanout, index),
                self.recursion,
                self.ops.clone(),
                self.coordinator.clone(),
                self.metrics.clone(),
                Arc::clone(&self.cancel),
            ));
            child.send(RecursiveMsg::Task {
                partition: part,
                upstream: Upstream::Parent {
                    addr: ctx.myself().clone(),
                    index,
                },
            });
        }
        Flow::Continue
    }

    fn on_report(&mut self, index: usize, rank: u64, result: Vec<T>) -> Flow {
        trace!(stage = %self.stage, rank = self.rank, child = rank, index, "child reported");
        if self.cancelled() {
            return Flow::Stop;
        }
        self.results.insert(index, result);
        if self.results.len() < self.expected {
            return Flow::Continue;
        }
        let Some(merge_fn) = self.ops.merge.clone() else {
            return self.missing_fns();
        };
        let results = take(&mut self.results);
        let criterion = take(&mut self.criterion);
        match guarded(self.stage, self.rank, || merge_fn(results, criterion)) {
            Ok(merged) => self.finish(merged),
            Err(fault) => self.fault(fault),
        }
    }
}

impl<T: Element> Actor for RecursiveWorker<T> {
    type Msg = RecursiveMsg<T>;

    fn handle(&mut self, msg: RecursiveMsg<T>, ctx: &Context<RecursiveMsg<T>>) -> Flow {
        match msg {
            RecursiveMsg::Task {
                partition,
                upstream,
            } => {
                self.upstream = Some(upstream);
                self.on_task(partition, ctx)
            }
            RecursiveMsg::Report { index, rank, result } => self.on_report(index, rank, result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;
    use crate::stage_id::StageId;
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Stands in for a coordinator and records what the tree reports.
    struct Sink(Sender<Result<Vec<i64>, PipelineFault>>);

    impl Actor for Sink {
        type Msg = CoordMsg<i64>;

        fn handle(&mut self, msg: CoordMsg<i64>, _ctx: &Context<CoordMsg<i64>>) -> Flow {
            match msg {
                CoordMsg::Result(r) => {
                    let _ = self.0.send(Ok(r));
                }
                CoordMsg::Fault(f) => {
                    let _ = self.0.send(Err(f));
                }
                _ => {}
            }
            Flow::Continue
        }
    }

    fn halving_ops(leaf_runs: Arc<AtomicUsize>) -> OpPipeline<i64> {
        let mut ops = OpPipeline::default();
        ops.push_map(Arc::new(move |v: &i64| {
            leaf_runs.fetch_add(1, Ordering::SeqCst);
            *v
        }));
        ops.partition = Some(Arc::new(|data: Vec<i64>, _: usize| {
            let mid = data.len() / 2;
            Split::new(Vec::new(), vec![data[..mid].to_vec(), data[mid..].to_vec()])
        }));
        ops.merge = Some(Arc::new(|children: BTreeMap<usize, Vec<i64>>, _: Vec<i64>| {
            children.into_values().flatten().collect()
        }));
        ops
    }

    fn start(
        ops: OpPipeline<i64>,
        cancel: Arc<AtomicBool>,
        input: Vec<i64>,
    ) -> Receiver<Result<Vec<i64>, PipelineFault>> {
        let rt = Runtime::new(2).unwrap();
        let (tx, rx) = unbounded();
        let sink = rt.spawn(Sink(tx));
        let recursion = Recursion { fanout: 2, threshold: 1 };
        let root = rt.spawn(RecursiveWorker::new(
            StageId::new(0),
            0,
            recursion,
            ops,
            sink.clone(),
            MetricsCollector::new(),
            cancel,
        ));
        root.send(RecursiveMsg::Task {
            partition: input,
            upstream: Upstream::Coordinator(sink),
        });
        rx
    }

    #[test]
    fn child_ranks_are_distinct_per_parent() {
        assert_eq!(child_rank(0, 2, 0), 1);
        assert_eq!(child_rank(0, 2, 1), 2);
        assert_eq!(child_rank(1, 2, 0), 3);
        assert_eq!(child_rank(2, 4, 3), 12);
    }

    #[test]
    fn uncancelled_tree_reports_merged_result() {
        let leaf_runs = Arc::new(AtomicUsize::new(0));
        let rx = start(
            halving_ops(Arc::clone(&leaf_runs)),
            Arc::new(AtomicBool::new(false)),
            (0..8).collect(),
        );
        let out = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(out, (0..8).collect::<Vec<_>>());
        assert_eq!(leaf_runs.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn cancellation_during_split_stops_the_subtree() {
        let leaf_runs = Arc::new(AtomicUsize::new(0));
        let cancel = Arc::new(AtomicBool::new(false));
        let mut ops = halving_ops(Arc::clone(&leaf_runs));
        let flag = Arc::clone(&cancel);
        ops.partition = Some(Arc::new(move |data: Vec<i64>, _: usize| {
            // The coordinator aborts while the root is splitting.
            flag.store(true, Ordering::Release);
            let mid = data.len() / 2;
            Split::new(Vec::new(), vec![data[..mid].to_vec(), data[mid..].to_vec()])
        }));

        let rx = start(ops, cancel, (0..8).collect());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
        assert_eq!(leaf_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_merge_is_reported_as_a_fault() {
        let leaf_runs = Arc::new(AtomicUsize::new(0));
        let mut ops = halving_ops(Arc::clone(&leaf_runs));
        ops.merge = None;

        let rx = start(ops, Arc::new(AtomicBool::new(false)), (0..4).collect());
        let fault = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert!(fault.message.contains("merge_by"));
    }

    #[test]
    fn last_report_without_merge_is_a_fault() {
        let rt = Runtime::new(1).unwrap();
        let (tx, rx) = unbounded();
        let sink = rt.spawn(Sink(tx));
        let mut ops = halving_ops(Arc::new(AtomicUsize::new(0)));
        ops.merge = None;
        let mut worker = RecursiveWorker::new(
            StageId::new(0),
            0,
            Recursion { fanout: 2, threshold: 1 },
            ops,
            sink,
            MetricsCollector::new(),
            Arc::new(AtomicBool::new(false)),
        );
        worker.expected = 2;

        assert!(matches!(worker.on_report(0, 1, vec![1]), Flow::Continue));
        assert!(matches!(worker.on_report(1, 2, vec![2]), Flow::Stop));
        let fault = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert_eq!(fault.rank, Some(0));
        assert!(fault.message.contains("merge_by"));
    }
}
