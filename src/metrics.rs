//! Execution metrics for a run.
//!
//! Every run of an [`Orchestrator`](crate::Orchestrator) gets a fresh
//! [`MetricsCollector`]. Coordinators and workers bump its counters while the
//! run executes. After `run` returns the counters can be inspected, printed,
//! or saved as JSON.
//!
//! ```no_run
//! use stagebeam::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let orch = Orchestrator::<i32>::new()?;
//! let g = StageGraph::new();
//! g.stage().data(vec![1, 2, 3, 4]).tasks(2);
//! orch.run(&g)?;
//!
//! orch.metrics().print();
//! orch.metrics().save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time copy of the counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Stages whose result was recorded.
    pub stages_completed: u64,
    /// Partition workers spawned (tree and recursive).
    pub workers_spawned: u64,
    /// Partitions handed to tree-reduction workers.
    pub partitions: u64,
    /// REDUCE messages exchanged between siblings.
    pub reduce_messages: u64,
    /// REDUCE messages that arrived before their level and were stashed.
    pub stashed_messages: u64,
    /// Recursive splits performed.
    pub recursive_splits: u64,
    /// Pipeline faults reported.
    pub faults: u64,
    /// Wall-clock time of the last run, if finished.
    pub elapsed_ms: Option<u64>,
}

#[derive(Default)]
struct Counters {
    stages_completed: AtomicU64,
    workers_spawned: AtomicU64,
    partitions: AtomicU64,
    reduce_messages: AtomicU64,
    stashed_messages: AtomicU64,
    recursive_splits: AtomicU64,
    faults: AtomicU64,
}

/// Thread-safe counters shared by every actor of a run. Clones share state.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
    window: Arc<Mutex<(Option<Instant>, Option<Instant>)>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_start(&self) {
        *self.window.lock() = (Some(Instant::now()), None);
    }

    pub fn record_end(&self) {
        self.window.lock().1 = Some(Instant::now());
    }

    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        match *self.window.lock() {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    pub(crate) fn stage_completed(&self) {
        self.counters.stages_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn workers_spawned(&self, n: u64) {
        self.counters.workers_spawned.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn partitions(&self, n: u64) {
        self.counters.partitions.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn reduce_sent(&self) {
        self.counters.reduce_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reduce_stashed(&self) {
        self.counters.stashed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recursive_split(&self) {
        self.counters.recursive_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fault(&self) {
        self.counters.faults.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> RunMetrics {
        let c = &self.counters;
        RunMetrics {
            stages_completed: c.stages_completed.load(Ordering::Relaxed),
            workers_spawned: c.workers_spawned.load(Ordering::Relaxed),
            partitions: c.partitions.load(Ordering::Relaxed),
            reduce_messages: c.reduce_messages.load(Ordering::Relaxed),
            stashed_messages: c.stashed_messages.load(Ordering::Relaxed),
            recursive_splits: c.recursive_splits.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            elapsed_ms: self.elapsed().map(|d| d.as_millis() as u64),
        }
    }

    /// All metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!(self.snapshot())
    }

    /// Print all metrics to stdout in a human-readable format.
    pub fn print(&self) {
        let m = self.snapshot();
        println!("\n========== Stage Metrics ==========");
        if let Some(ms) = m.elapsed_ms {
            println!("Execution Time: {ms} ms");
            println!("-----------------------------------");
        }
        println!("stages_completed: {}", m.stages_completed);
        println!("workers_spawned: {}", m.workers_spawned);
        println!("partitions: {}", m.partitions);
        println!("reduce_messages: {}", m.reduce_messages);
        println!("stashed_messages: {} (arrived ahead of their level)", m.stashed_messages);
        println!("recursive_splits: {}", m.recursive_splits);
        println!("faults: {}", m.faults);
        println!("===================================\n");
    }

    /// Save all metrics to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let mut file = File::create(path)?;
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}
