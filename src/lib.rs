//! # Stagebeam
//!
//! A **stage-graph execution engine** for Rust. You describe a computation as a
//! directed acyclic graph of *stages*; each stage owns an operation pipeline and
//! optional starting data. The engine cuts every stage's input into partitions,
//! runs them on a pool of lightweight actors, folds the partial results back
//! together with a tree reduction and streams the merged output to the next
//! stages.
//!
//! ## Key Features
//!
//! - **Fluent stage builder** - filter, map, for_each, bulk and sequence transforms
//! - **Graph composition** - `then`, [`sequence`], [`parallel`] fan-out and [`merge`] joins
//! - **Hypercube tree reduction** - partial results combine in `log2(n)` rounds, in rank order
//! - **Sorted stages** - per-partition sort plus an order-preserving merge
//! - **Recursive decomposition** - divide-and-conquer stages with user split/merge
//!   functions
//! - **Fault reporting** - panics in user code surface as [`PipelineFault`] instead of
//!   hanging the run
//! - **Run metrics and plan explanation** - counters, timing and a readable topology dump
//!
//! ## Quick Start
//!
//! ```
//! use stagebeam::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let orch = Orchestrator::<i64>::new()?;
//! let g = StageGraph::new();
//!
//! let evens = g
//!     .stage()
//!     .alias("evens")
//!     .data((1..=20).collect())
//!     .tasks(4)
//!     .filter(|v: &i64| v % 2 == 0);
//! let squares = g.stage().alias("squares").map(|v: &i64| v * v);
//! evens.then(&squares);
//!
//! orch.run(&g)?;
//! assert_eq!(orch.result("evens")?, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
//! assert_eq!(orch.result(&squares)?[0], 4);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### StageGraph and Stage
//!
//! A [`StageGraph`] is the container for a computation. [`StageGraph::stage`]
//! creates a [`Stage`] handle; builder methods on the handle configure data,
//! operations, task count and aliases, and edges are added with
//! [`Stage::then`] or the free functions [`sequence`], [`parallel`] and
//! [`merge`]. Stages without predecessors are *roots* and must carry data.
//!
//! ### Operation pipeline
//!
//! Each stage runs its [`OpPipeline`] on every partition:
//!
//! 1. an *eager* transform if one is set (bulk over the whole partition, or a
//!    sequence transform over its iterator); otherwise the lazy triad of
//!    `filter`, `map` and `for_each`, applied element by element;
//! 2. a per-partition sort if the stage is sorted.
//!
//! Partial results are then merged with the stage's combiner: a custom
//! `reduce`, an order-preserving merge for sorted stages, or concatenation.
//!
//! ### Orchestrator
//!
//! An [`Orchestrator`] owns the worker pool and the result registry.
//! [`Orchestrator::run`] validates the graph, executes it, and blocks until
//! every root has completed. Results are read back by stage id, handle or
//! alias with [`Orchestrator::result`].
//!
//! ## Configuration
//!
//! [`EngineConfig`] controls pool size, the default task count, an optional
//! run timeout and raw-input capture. It can be built in code or parsed from
//! JSON.
//!
//! ## Logging
//!
//! The engine emits [`tracing`](https://docs.rs/tracing) events: `info` at run
//! boundaries, `debug` per stage, `trace` per message. Install any subscriber
//! to see them.
//!
//! ## Testing
//!
//! The [`testing`] module provides order-sensitive and multiset assertions,
//! fixtures, and a pre-configured orchestrator with a run timeout.

pub mod config;
pub(crate) mod coordinator;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod ops;
pub mod orchestrator;
pub mod partition;
pub mod planner;
pub mod registry;
pub(crate) mod runtime;
pub mod stage_id;
pub mod testing;
pub mod worker;

// General re-exports
pub use config::EngineConfig;
pub use error::{EngineError, PipelineFault};
pub use graph::{Recursion, Stage, StageGraph, merge, parallel, sequence};
pub use metrics::{MetricsCollector, RunMetrics};
pub use ops::{Element, ElementIter, OpPipeline, Split};
pub use orchestrator::{Orchestrator, RunSummary};
pub use planner::{Plan, PlanExplanation};
pub use registry::{Registry, StageKey};
pub use stage_id::StageId;
