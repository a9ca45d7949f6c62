//! Error types surfaced by the engine.

use crate::stage_id::StageId;
use std::any::Any;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::time::Duration;

/// A failure raised while a worker was running user code.
///
/// Panics inside filter/map/reduce/partition/merge closures are caught at the
/// worker boundary and reported as a fault instead of leaving the sibling
/// group's reduction waiting forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFault {
    /// Stage whose pipeline failed.
    pub stage: StageId,
    /// Rank of the failing worker inside its group, if a worker failed.
    pub rank: Option<u64>,
    /// Panic payload or configuration message.
    pub message: String,
}

impl PipelineFault {
    pub(crate) fn from_panic(stage: StageId, rank: u64, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked with a non-string payload".to_string()
        };
        Self {
            stage,
            rank: Some(rank),
            message,
        }
    }
}

impl Display for PipelineFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self.rank {
            Some(rank) => write!(f, "{} (rank {rank}): {}", self.stage, self.message),
            None => write!(f, "{}: {}", self.stage, self.message),
        }
    }
}

/// Error type for graph validation and run execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0} reached decomposition without data; call .data(...) on root stages")]
    MissingData(StageId),
    #[error(
        "{0} is configured for recursive decomposition but has no partition_by/merge_by functions"
    )]
    MissingRecursiveFns(StageId),
    #[error("stage graph contains a cycle through {0}")]
    Cycle(StageId),
    #[error("edge {from} -> {to} references a stage outside the graph")]
    DanglingEdge { from: StageId, to: StageId },
    #[error("alias '{0}' is used by more than one stage")]
    DuplicateAlias(String),
    #[error("graph has no root stage")]
    NoRoots,
    #[error("a run is already in progress on this orchestrator")]
    AlreadyRunning,
    #[error("pipeline fault in {0}")]
    PipelineFault(PipelineFault),
    #[error("run did not complete within {0:?}")]
    Timeout(Duration),
    #[error("unknown stage: {0}")]
    UnknownStage(String),
    #[error("failed to build worker pool: {0}")]
    RuntimeBuild(#[from] rayon::ThreadPoolBuildError),
    #[error("completion latch disconnected before every root finished")]
    Disconnected,
    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<PipelineFault> for EngineError {
    fn from(fault: PipelineFault) -> Self {
        EngineError::PipelineFault(fault)
    }
}
