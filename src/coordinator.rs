//! Stage coordinators.
//!
//! One coordinator runs per stage per run. It moves through four phases:
//!
//! - **AwaitingParents**: one DATA message is expected from every
//!   predecessor (a root gets a single kick-off DATA from the orchestrator).
//!   Delivered elements are appended to the stage's own data.
//! - **Decomposing**: the buffer is cut into partitions and handed to a fresh
//!   group of tree workers, or to one recursive worker.
//! - **Reducing**: the group reports exactly one RESULT. The result is
//!   recorded and a full copy is sent as DATA to every successor.
//! - **Completing**: once every successor has acknowledged with SHUTDOWN the
//!   coordinator acknowledges each predecessor in turn, or signals the
//!   completion latch if it is a root. Teardown therefore runs from the
//!   leaves back to the roots and no stage stops before its consumers have
//!   its result.

use crate::config::EngineConfig;
use crate::error::{EngineError, PipelineFault};
use crate::metrics::MetricsCollector;
use crate::ops::Element;
use crate::partition::{effective_task_count, split_contiguous};
use crate::planner::{Plan, PlannedStage};
use crate::registry::Registry;
use crate::runtime::{Actor, Addr, Context, Directory, Flow, Group, Runtime};
use crate::stage_id::StageId;
use crate::worker::recursive::{RecursiveMsg, RecursiveWorker, Upstream};
use crate::worker::tree::{TreeMsg, TreeWorker};
use crossbeam_channel::Sender;
use std::mem::take;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

pub(crate) enum CoordMsg<T> {
    /// A predecessor's finished output, or the orchestrator's kick-off.
    Data { from: Option<StageId>, items: Vec<T> },
    /// The merged output of this stage's worker group.
    Result(Vec<T>),
    Fault(PipelineFault),
    /// A successor has finished with this stage's result.
    Shutdown { from: StageId },
    /// Orchestrator teardown.
    Stop,
}

/// Event delivered to the orchestrator's completion latch.
pub(crate) enum Completion {
    RootDone(StageId),
    Failed(EngineError),
}

/// State shared by every coordinator of one run.
pub(crate) struct RunShared<T> {
    pub plan: Plan<T>,
    pub registry: Arc<Registry<T>>,
    pub directory: Directory<StageId, CoordMsg<T>>,
    pub latch: Sender<Completion>,
    pub config: EngineConfig,
    pub metrics: MetricsCollector,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    AwaitingParents,
    Reducing,
    Completing,
}

pub(crate) struct StageCoordinator<T> {
    stage: Arc<PlannedStage<T>>,
    shared: Arc<RunShared<T>>,
    phase: Phase,
    pending_parents: usize,
    pending_acks: usize,
    buffer: Vec<T>,
    workers: Option<Group<TreeMsg<T>>>,
    /// Set to stop a recursive decomposition tree.
    cancel: Option<Arc<AtomicBool>>,
}

impl<T: Element> StageCoordinator<T> {
    pub fn new(stage: Arc<PlannedStage<T>>, shared: Arc<RunShared<T>>) -> Self {
        let pending_parents = stage.predecessors.len().max(1);
        let buffer = stage.data.clone().unwrap_or_default();
        Self {
            stage,
            shared,
            phase: Phase::AwaitingParents,
            pending_parents,
            pending_acks: 0,
            buffer,
            workers: None,
            cancel: None,
        }
    }

    /// Look up the coordinator for `id`, spawning it on first use. `None` if
    /// the stage is not in the plan or the run has been torn down.
    pub fn lookup_or_spawn(
        shared: &Arc<RunShared<T>>,
        runtime: &Arc<Runtime>,
        id: StageId,
    ) -> Option<Addr<CoordMsg<T>>> {
        let stage = Arc::clone(shared.plan.stage(id)?);
        shared.directory.get_or_spawn(runtime, id, || {
            StageCoordinator::new(stage, Arc::clone(shared))
        })
    }

    fn fail(&mut self, err: EngineError) -> Flow {
        warn!(stage = %self.stage.id, error = %err, "stage failed");
        let _ = self.shared.latch.send(Completion::Failed(err));
        self.abort_workers();
        Flow::Stop
    }

    fn abort_workers(&mut self) {
        if let Some(group) = self.workers.take() {
            group.broadcast(TreeMsg::Abort);
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.store(true, Ordering::Release);
        }
    }

    fn on_data(
        &mut self,
        from: Option<StageId>,
        items: Vec<T>,
        ctx: &Context<CoordMsg<T>>,
    ) -> Flow {
        if self.phase != Phase::AwaitingParents {
            warn!(stage = %self.stage.id, ?from, "late data ignored");
            return Flow::Continue;
        }
        trace!(stage = %self.stage.id, ?from, len = items.len(), "data delivered");
        self.buffer.extend(items);
        self.pending_parents = self.pending_parents.saturating_sub(1);
        if self.pending_parents > 0 {
            return Flow::Continue;
        }
        self.decompose(ctx)
    }

    fn decompose(&mut self, ctx: &Context<CoordMsg<T>>) -> Flow {
        let id = self.stage.id;
        if self.stage.is_root() && self.stage.data.is_none() {
            return self.fail(EngineError::MissingData(id));
        }
        if self.shared.config.capture_input {
            self.shared.registry.record_input(id, self.buffer.clone());
        }
        let input = take(&mut self.buffer);
        self.phase = Phase::Reducing;

        if let Some(recursion) = self.stage.recursion {
            if !self.stage.ops.is_recursive_ready() {
                return self.fail(EngineError::MissingRecursiveFns(id));
            }
            self.shared.metrics.workers_spawned(1);
            let cancel = Arc::new(AtomicBool::new(false));
            let root = ctx.spawn(RecursiveWorker::new(
                id,
                0,
                recursion,
                self.stage.ops.clone(),
                ctx.myself().clone(),
                self.shared.metrics.clone(),
                Arc::clone(&cancel),
            ));
            self.cancel = Some(cancel);
            debug!(
                stage = %id,
                worker = %root.id(),
                len = input.len(),
                fanout = recursion.fanout,
                "starting recursive decomposition"
            );
            root.send(RecursiveMsg::Task {
                partition: input,
                upstream: Upstream::Coordinator(ctx.myself().clone()),
            });
            return Flow::Continue;
        }

        let configured = self.stage.tasks.unwrap_or(self.shared.config.default_tasks);
        let count = effective_task_count(configured, self.stage.min_range, input.len());
        if count == 0 {
            debug!(stage = %id, "empty input, skipping workers");
            return self.on_result(Vec::new(), ctx);
        }

        let len = input.len();
        let parts = split_contiguous(input, count);
        let members = (0..count)
            .map(|rank| {
                ctx.spawn(TreeWorker::new(
                    id,
                    self.stage.ops.clone(),
                    rank,
                    count,
                    self.shared.metrics.clone(),
                ))
            })
            .collect();
        let group = Group::new(members);
        debug!(stage = %id, len, tasks = group.len(), "decomposing");
        self.shared.metrics.workers_spawned(count as u64);
        self.shared.metrics.partitions(count as u64);

        let reply = ctx.myself().clone();
        group.scatter(parts, |_, partition| TreeMsg::Task {
            partition,
            group: group.clone(),
            reply: reply.clone(),
        });
        self.workers = Some(group);
        Flow::Continue
    }

    fn on_result(&mut self, result: Vec<T>, ctx: &Context<CoordMsg<T>>) -> Flow {
        if self.phase != Phase::Reducing {
            warn!(stage = %self.stage.id, "unexpected result ignored");
            return Flow::Continue;
        }
        // Every worker has stopped by the time rank 0 reports.
        self.workers = None;
        self.cancel = None;
        let id = self.stage.id;
        if self.shared.directory.is_closed() {
            debug!(stage = %id, "run torn down, dropping result");
            return Flow::Stop;
        }
        debug!(
            stage = %id,
            len = result.len(),
            successors = self.stage.successors.len(),
            "stage result ready"
        );

        let stage = Arc::clone(&self.stage);
        let mut targets = Vec::with_capacity(stage.successors.len());
        for succ in &stage.successors {
            match StageCoordinator::lookup_or_spawn(&self.shared, ctx.runtime(), *succ) {
                Some(addr) => targets.push(addr),
                None if self.shared.directory.is_closed() => {
                    debug!(stage = %id, successor = %succ, "run torn down, dropping result");
                    return Flow::Stop;
                }
                None => {
                    return self.fail(EngineError::UnknownStage(succ.to_string()));
                }
            }
        }
        for addr in &targets {
            addr.send(CoordMsg::Data {
                from: Some(id),
                items: result.clone(),
            });
        }
        self.shared
            .registry
            .record_result(id, stage.alias.as_deref(), result);
        self.shared.metrics.stage_completed();

        if targets.is_empty() {
            return self.complete();
        }
        self.phase = Phase::Completing;
        self.pending_acks = targets.len();
        Flow::Continue
    }

    fn on_shutdown(&mut self, from: StageId) -> Flow {
        if self.phase != Phase::Completing {
            warn!(stage = %self.stage.id, %from, "shutdown before completion ignored");
            return Flow::Continue;
        }
        trace!(stage = %self.stage.id, %from, "successor acknowledged");
        self.pending_acks = self.pending_acks.saturating_sub(1);
        if self.pending_acks > 0 {
            return Flow::Continue;
        }
        self.complete()
    }

    /// Acknowledge every predecessor, or release the latch for a root.
    fn complete(&mut self) -> Flow {
        let id = self.stage.id;
        if self.stage.is_root() {
            debug!(stage = %id, "root complete");
            let _ = self.shared.latch.send(Completion::RootDone(id));
        }
        for pred in &self.stage.predecessors {
            match self.shared.directory.get(pred) {
                Some(addr) => {
                    addr.send(CoordMsg::Shutdown { from: id });
                }
                None => warn!(stage = %id, predecessor = %pred, "predecessor already gone"),
            }
        }
        Flow::Stop
    }
}

impl<T: Element> Actor for StageCoordinator<T> {
    type Msg = CoordMsg<T>;

    fn handle(&mut self, msg: CoordMsg<T>, ctx: &Context<CoordMsg<T>>) -> Flow {
        match msg {
            CoordMsg::Data { from, items } => self.on_data(from, items, ctx),
            CoordMsg::Result(result) => self.on_result(result, ctx),
            CoordMsg::Fault(fault) => self.fail(EngineError::PipelineFault(fault)),
            CoordMsg::Shutdown { from } => self.on_shutdown(from),
            CoordMsg::Stop => {
                self.abort_workers();
                Flow::Stop
            }
        }
    }
}
