//! Hypercube (recursive-doubling) tree reduction.
//!
//! A group of `N` workers, ranked `0..N`, each holds one partial result. In
//! round `l` every worker whose rank is an odd multiple of `2^l` sends its
//! partial result to `rank - 2^l` and stops; the receiver folds it in with the
//! stage combiner and moves on to round `l + 1`. After `ceil(log2 N)` rounds
//! rank 0 holds the combination of every partial, which it reports to the
//! coordinator.
//!
//! Peer messages are delivered asynchronously, so a worker can receive a
//! round-`l + 1` message while it is still waiting for round `l` (or before it
//! has even received its partition). Every incoming REDUCE is pushed into a
//! min-heap keyed by its level tag and only dissolved when the worker reaches
//! `level == tag - 1`. Folding out of order would silently change the result
//! of an order-sensitive combiner.
//!
//! [`ReductionState`] is the pure state machine; [`TreeWorker`] wraps it as an
//! actor.

use crate::coordinator::CoordMsg;
use crate::error::PipelineFault;
use crate::metrics::MetricsCollector;
use crate::ops::{Element, OpPipeline};
use crate::runtime::{Actor, Addr, Context, Flow, Group};
use crate::stage_id::StageId;
use crate::worker::guarded;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::mem::take;
use tracing::{debug, trace, warn};

/// A REDUCE message waiting for its level.
struct Stashed<T> {
    level: u32,
    payload: Vec<T>,
}

impl<T> PartialEq for Stashed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
    }
}

impl<T> Eq for Stashed<T> {}

impl<T> PartialOrd for Stashed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Stashed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level.cmp(&other.level)
    }
}

/// What a worker must do after a state transition.
#[derive(Debug, PartialEq, Eq)]
pub enum Step<T> {
    /// Nothing to do until the next REDUCE arrives.
    Wait,
    /// Send `payload` to sibling `dest` tagged with `level`, then stop.
    Send { dest: usize, level: u32, payload: Vec<T> },
    /// Rank 0 only: the group's reduction is complete.
    Finished(Vec<T>),
}

/// Reduction bookkeeping of one worker.
pub struct ReductionState<T> {
    rank: usize,
    size: usize,
    /// `-1` until the local partition has been processed.
    level: i32,
    partial: Vec<T>,
    stash: BinaryHeap<Reverse<Stashed<T>>>,
}

impl<T> ReductionState<T> {
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            level: -1,
            partial: Vec::new(),
            stash: BinaryHeap::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn stashed(&self) -> usize {
        self.stash.len()
    }

    /// Install the locally computed partial result and start reducing.
    pub fn start(
        &mut self,
        partial: Vec<T>,
        combine: impl FnMut(Vec<T>, Vec<T>) -> Vec<T>,
    ) -> Step<T> {
        self.partial = partial;
        self.level = 0;
        self.advance(combine)
    }

    /// Accept a REDUCE from a sibling. Returns `(step, early)` where `early`
    /// is true when the message had to wait for a lower level.
    pub fn offer(
        &mut self,
        level: u32,
        payload: Vec<T>,
        combine: impl FnMut(Vec<T>, Vec<T>) -> Vec<T>,
    ) -> (Step<T>, bool) {
        let early = self.level < 0 || level as i32 != self.level + 1;
        self.stash.push(Reverse(Stashed { level, payload }));
        if self.level < 0 {
            return (Step::Wait, early);
        }
        (self.advance(combine), early)
    }

    fn advance(&mut self, mut combine: impl FnMut(Vec<T>, Vec<T>) -> Vec<T>) -> Step<T> {
        loop {
            let level = self.level as u32;
            let span = 1usize << (level + 1);
            if self.rank % span != 0 {
                return Step::Send {
                    dest: self.rank - (1usize << level),
                    level: level + 1,
                    payload: take(&mut self.partial),
                };
            }

            let ready = self
                .stash
                .peek()
                .is_some_and(|Reverse(s)| s.level == level + 1);
            if ready {
                if let Some(Reverse(msg)) = self.stash.pop() {
                    let left = take(&mut self.partial);
                    self.partial = combine(left, msg.payload);
                    self.level += 1;
                }
                continue;
            }

            let source = self.rank + (1usize << level);
            if source >= self.size {
                if self.rank == 0 {
                    return Step::Finished(take(&mut self.partial));
                }
                self.level += 1;
                continue;
            }
            return Step::Wait;
        }
    }
}

pub(crate) enum TreeMsg<T> {
    Task {
        partition: Vec<T>,
        group: Group<TreeMsg<T>>,
        reply: Addr<CoordMsg<T>>,
    },
    Reduce {
        level: u32,
        payload: Vec<T>,
    },
    /// Sent by the coordinator when the run is torn down or a sibling faulted.
    Abort,
}

impl<T: Element> Clone for TreeMsg<T> {
    fn clone(&self) -> Self {
        match self {
            TreeMsg::Task {
                partition,
                group,
                reply,
            } => TreeMsg::Task {
                partition: partition.clone(),
                group: group.clone(),
                reply: reply.clone(),
            },
            TreeMsg::Reduce { level, payload } => TreeMsg::Reduce {
                level: *level,
                payload: payload.clone(),
            },
            TreeMsg::Abort => TreeMsg::Abort,
        }
    }
}

/// Partition worker taking part in a hypercube reduction.
pub(crate) struct TreeWorker<T> {
    stage: StageId,
    ops: OpPipeline<T>,
    state: ReductionState<T>,
    group: Option<Group<TreeMsg<T>>>,
    reply: Option<Addr<CoordMsg<T>>>,
    metrics: MetricsCollector,
}

impl<T: Element> TreeWorker<T> {
    pub fn new(
        stage: StageId,
        ops: OpPipeline<T>,
        rank: usize,
        size: usize,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            stage,
            ops,
            state: ReductionState::new(rank, size),
            group: None,
            reply: None,
            metrics,
        }
    }

    fn rank(&self) -> u64 {
        self.state.rank() as u64
    }

    fn fault(&self, fault: PipelineFault) -> Flow {
        warn!(
            stage = %self.stage,
            rank = self.rank(),
            error = %fault.message,
            "partition worker failed"
        );
        self.metrics.fault();
        if let Some(reply) = &self.reply {
            reply.send(CoordMsg::Fault(fault));
        }
        Flow::Stop
    }

    /// Carry out a step produced by the state machine.
    fn apply(&self, step: Step<T>) -> Flow {
        match step {
            Step::Wait => Flow::Continue,
            Step::Send { dest, level, payload } => {
                trace!(
                    stage = %self.stage,
                    rank = self.rank(),
                    dest,
                    level,
                    "sending partial result"
                );
                self.metrics.reduce_sent();
                match self.group.as_ref().and_then(|g| g.get(dest)) {
                    Some(peer) => {
                        peer.send(TreeMsg::Reduce { level, payload });
                    }
                    None => warn!(stage = %self.stage, dest, "reduction peer missing from group"),
                }
                Flow::Stop
            }
            Step::Finished(result) => {
                debug!(stage = %self.stage, len = result.len(), "tree reduction finished");
                if let Some(reply) = &self.reply {
                    reply.send(CoordMsg::Result(result));
                }
                Flow::Stop
            }
        }
    }
}

impl<T: Element> Actor for TreeWorker<T> {
    type Msg = TreeMsg<T>;

    fn handle(&mut self, msg: TreeMsg<T>, _ctx: &Context<TreeMsg<T>>) -> Flow {
        match msg {
            TreeMsg::Task {
                partition,
                group,
                reply,
            } => {
                if self.state.level() >= 0 {
                    warn!(stage = %self.stage, rank = self.rank(), "duplicate task ignored");
                    return Flow::Continue;
                }
                self.group = Some(group);
                self.reply = Some(reply);
                trace!(
                    stage = %self.stage,
                    rank = self.rank(),
                    len = partition.len(),
                    "running partition"
                );

                let (stage, rank) = (self.stage, self.rank());
                let ops = &self.ops;
                let state = &mut self.state;
                let step = guarded(stage, rank, || {
                    let partial = ops.run(partition);
                    state.start(partial, |l, r| ops.combine(l, r))
                });
                match step {
                    Ok(step) => self.apply(step),
                    Err(fault) => self.fault(fault),
                }
            }
            TreeMsg::Reduce { level, payload } => {
                let (stage, rank) = (self.stage, self.rank());
                let ops = &self.ops;
                let state = &mut self.state;
                let offered =
                    guarded(stage, rank, || state.offer(level, payload, |l, r| ops.combine(l, r)));
                match offered {
                    Ok((step, early)) => {
                        if early {
                            trace!(stage = %stage, rank, level, "stashed early partial result");
                            self.metrics.reduce_stashed();
                        }
                        self.apply(step)
                    }
                    Err(fault) => self.fault(fault),
                }
            }
            TreeMsg::Abort => Flow::Stop,
        }
    }
}
