//! Pre-built datasets and helpers for tests.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ops::{Element, Split};
use crate::orchestrator::Orchestrator;
use std::collections::BTreeMap;
use std::time::Duration;

/// Mixed-sign integers with duplicates, zero and one large outlier.
///
/// ```
/// use stagebeam::testing::signed_values;
///
/// assert_eq!(signed_values().len(), 18);
/// ```
#[must_use]
pub fn signed_values() -> Vec<i64> {
    vec![3, 2, 1, 1, 0, 2, 45, 78, 99, 34, 31, 8, 1, 123, 14, 9257, -10, -15]
}

/// Orchestrator with a four-thread pool and a ten-second run timeout, so a
/// stalled run fails the test instead of hanging it.
///
/// # Errors
/// Propagates pool construction failures.
pub fn test_orchestrator<T: Element>() -> Result<Orchestrator<T>, EngineError> {
    Orchestrator::with_config(
        EngineConfig::default()
            .with_threads(4)
            .with_run_timeout(Duration::from_secs(10)),
    )
}

/// Quicksort split: the first element is the pivot, the rest is routed to
/// `[smaller, not smaller]`.
pub fn pivot_split<T: Element + Ord>(mut input: Vec<T>, _fanout: usize) -> Split<T> {
    if input.is_empty() {
        return Split::new(Vec::new(), Vec::new());
    }
    let pivot = input.swap_remove(0);
    let (lo, hi): (Vec<T>, Vec<T>) = input.into_iter().partition(|v| *v < pivot);
    Split::new(vec![pivot], vec![lo, hi])
}

/// Quicksort merge: children in index order with the pivot between them.
pub fn pivot_merge<T: Element>(mut children: BTreeMap<usize, Vec<T>>, pivot: Vec<T>) -> Vec<T> {
    let mut out = children.remove(&0).unwrap_or_default();
    out.extend(pivot);
    for (_, rest) in children {
        out.extend(rest);
    }
    out
}
