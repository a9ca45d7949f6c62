//! Partition workers.
//!
//! - [`tree`]: runs the stage pipeline on one flat partition, then merges with
//!   its siblings by hypercube tree reduction.
//! - [`recursive`]: splits oversized inputs into a tree of child workers with
//!   the stage's partition/merge functions.

pub(crate) mod recursive;
pub mod tree;

use crate::error::PipelineFault;
use crate::stage_id::StageId;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run user code, converting a panic into a [`PipelineFault`].
pub(crate) fn guarded<R>(
    stage: StageId,
    rank: u64,
    f: impl FnOnce() -> R,
) -> Result<R, PipelineFault> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| PipelineFault::from_panic(stage, rank, payload))
}
