//! The stream orchestrator: entry point for executing a stage graph.
//!
//! An [`Orchestrator`] owns the worker pool. Every [`Orchestrator::run`] gets
//! fresh result/raw-input/alias registries and a fresh metrics collector,
//! plans the graph, starts one coordinator per root, blocks the caller until
//! every root reports completion, and tears the run down. Results of the last
//! run are read afterwards with [`Orchestrator::result`] and
//! [`Orchestrator::input_data`].
//!
//! ```
//! use stagebeam::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let orch = Orchestrator::<i64>::new()?;
//! let g = StageGraph::new();
//! g.stage()
//!     .alias("scaled")
//!     .data(vec![5, -1, 3])
//!     .filter(|v: &i64| *v > 0)
//!     .map(|v: &i64| v * 10)
//!     .sorted_ascending();
//!
//! orch.run(&g)?;
//! assert_eq!(orch.result("scaled")?, vec![30, 50]);
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::coordinator::{CoordMsg, Completion, RunShared, StageCoordinator};
use crate::error::EngineError;
use crate::graph::StageGraph;
use crate::metrics::{MetricsCollector, RunMetrics};
use crate::ops::Element;
use crate::planner::Plan;
use crate::registry::{Registry, StageKey};
use crate::runtime::{Directory, Runtime};
use crate::stage_id::StageId;
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a successful run.
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub stages: usize,
    pub roots: Vec<StageId>,
    pub elapsed: Duration,
    pub metrics: RunMetrics,
}

pub struct Orchestrator<T> {
    config: EngineConfig,
    runtime: Arc<Runtime>,
    last: Mutex<RunState<T>>,
    running: AtomicBool,
}

/// Registries and counters owned by a single run. Workers of an abandoned
/// run keep their own copy, so they never touch a later run's state.
struct RunState<T> {
    registry: Arc<Registry<T>>,
    metrics: MetricsCollector,
}

impl<T: Clone> RunState<T> {
    fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            metrics: MetricsCollector::new(),
        }
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, EngineError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Element> Orchestrator<T> {
    /// Orchestrator with [`EngineConfig::default`].
    ///
    /// # Errors
    /// [`EngineError::RuntimeBuild`] if the worker pool cannot be created.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(EngineConfig::default())
    }

    /// # Errors
    /// [`EngineError::RuntimeBuild`] if the worker pool cannot be created.
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let runtime = Runtime::new(config.pool_threads())?;
        Ok(Self {
            config,
            runtime,
            last: Mutex::new(RunState::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registries of the current or most recent run.
    pub fn registry(&self) -> Arc<Registry<T>> {
        Arc::clone(&self.last.lock().registry)
    }

    /// Counters of the current or most recent run.
    pub fn metrics(&self) -> MetricsCollector {
        self.last.lock().metrics.clone()
    }

    pub fn threads(&self) -> usize {
        self.runtime.threads()
    }

    /// Execute `graph` and block until every root stage has completed.
    ///
    /// Each run starts with empty registries and zeroed counters, so only this
    /// run's results are visible afterwards.
    ///
    /// # Errors
    /// - [`EngineError::AlreadyRunning`] if another run is in progress.
    /// - Topology errors from [`Plan::build`].
    /// - [`EngineError::MissingData`], [`EngineError::MissingRecursiveFns`] or
    ///   [`EngineError::PipelineFault`] raised while executing.
    /// - [`EngineError::Timeout`] when `run_timeout` elapses first.
    pub fn run(&self, graph: &StageGraph<T>) -> Result<RunSummary, EngineError> {
        let _guard = RunGuard::acquire(&self.running)?;
        let state = RunState::new();
        let registry = Arc::clone(&state.registry);
        let metrics = state.metrics.clone();
        *self.last.lock() = state;
        metrics.record_start();
        let started = Instant::now();

        let plan = Plan::build(graph)?;
        let roots = plan.roots().to_vec();
        let stages = plan.len();
        info!(stages, roots = roots.len(), threads = self.threads(), "starting run");

        let (latch, done) = unbounded();
        let shared = Arc::new(RunShared {
            plan,
            registry,
            directory: Directory::new(),
            latch,
            config: self.config.clone(),
            metrics: metrics.clone(),
        });

        for root in &roots {
            match StageCoordinator::lookup_or_spawn(&shared, &self.runtime, *root) {
                Some(addr) => {
                    addr.send(CoordMsg::Data {
                        from: None,
                        items: Vec::new(),
                    });
                }
                None => {
                    self.teardown(&shared);
                    return Err(EngineError::UnknownStage(root.to_string()));
                }
            }
        }

        let outcome = self.await_roots(&done, roots.len());
        self.teardown(&shared);
        metrics.record_end();
        outcome?;

        let elapsed = started.elapsed();
        info!(stages, elapsed_ms = elapsed.as_millis() as u64, "run finished");
        Ok(RunSummary {
            stages,
            roots,
            elapsed,
            metrics: metrics.snapshot(),
        })
    }

    /// Count down the completion latch, one event per root.
    fn await_roots(&self, done: &Receiver<Completion>, roots: usize) -> Result<(), EngineError> {
        let deadline = self.config.run_timeout.map(|t| (Instant::now() + t, t));
        let mut remaining = roots;
        while remaining > 0 {
            let event = match deadline {
                Some((at, limit)) => done.recv_deadline(at).map_err(|e| match e {
                    RecvTimeoutError::Timeout => EngineError::Timeout(limit),
                    RecvTimeoutError::Disconnected => EngineError::Disconnected,
                })?,
                None => done.recv().map_err(|_| EngineError::Disconnected)?,
            };
            match event {
                Completion::RootDone(id) => {
                    remaining -= 1;
                    debug!(stage = %id, remaining, "root released latch");
                }
                Completion::Failed(err) => {
                    warn!(error = %err, "run failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Stop every coordinator still registered for the run.
    fn teardown(&self, shared: &RunShared<T>) {
        shared.directory.close();
        debug!(coordinators = shared.directory.len(), "tearing down run");
        for addr in shared.directory.drain() {
            addr.send(CoordMsg::Stop);
        }
    }

    /// Final output of a stage from the last run.
    ///
    /// # Errors
    /// [`EngineError::UnknownStage`] if the key has no recorded result.
    pub fn result(&self, key: impl Into<StageKey>) -> Result<Vec<T>, EngineError> {
        let key = key.into();
        self.registry()
            .result(&key)
            .ok_or_else(|| EngineError::UnknownStage(key.to_string()))
    }

    /// Input delivered to a stage in the last run. Requires
    /// [`EngineConfig::capture_input`].
    ///
    /// # Errors
    /// [`EngineError::UnknownStage`] if nothing was recorded for the key.
    pub fn input_data(&self, key: impl Into<StageKey>) -> Result<Vec<T>, EngineError> {
        let key = key.into();
        self.registry()
            .input(&key)
            .ok_or_else(|| EngineError::UnknownStage(key.to_string()))
    }
}
