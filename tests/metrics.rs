//! Tests for run metrics.

use anyhow::Result;
use stagebeam::testing::*;
use stagebeam::*;

#[test]
fn counters_reflect_the_last_run() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let a = g.stage().data((0..40).collect()).tasks(8);
    let b = g.stage().tasks(1);
    a.then(&b);
    let summary = orch.run(&g)?;

    let m = summary.metrics;
    assert_eq!(m.stages_completed, 2);
    assert_eq!(m.partitions, 9);
    assert_eq!(m.workers_spawned, 9);
    // Every worker except rank 0 sends exactly one partial result.
    assert_eq!(m.reduce_messages, 7);
    assert!(m.stashed_messages <= m.reduce_messages);
    assert_eq!(m.faults, 0);
    assert!(m.elapsed_ms.is_some());
    Ok(())
}

#[test]
fn counters_reset_between_runs() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    g.stage().data((0..10).collect()).tasks(4);

    orch.run(&g)?;
    let first = orch.metrics().snapshot();
    orch.run(&g)?;
    let second = orch.metrics().snapshot();

    assert_eq!(first.partitions, second.partitions);
    assert_eq!(first.reduce_messages, second.reduce_messages);
    Ok(())
}

#[test]
fn metrics_json_has_every_counter() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    g.stage().data(vec![1, 2, 3]).tasks(3);
    orch.run(&g)?;

    let json = orch.metrics().to_json();
    for key in [
        "stages_completed",
        "workers_spawned",
        "partitions",
        "reduce_messages",
        "stashed_messages",
        "recursive_splits",
        "faults",
        "elapsed_ms",
    ] {
        assert!(json.get(key).is_some(), "missing {key}");
    }
    Ok(())
}

#[test]
fn metrics_save_to_file() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    g.stage().data((0..6).collect()).tasks(2);
    orch.run(&g)?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.json");
    let path = path.to_str().ok_or_else(|| anyhow::anyhow!("non-utf8 temp path"))?;
    orch.metrics().save_to_file(path)?;

    let saved: RunMetrics = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    assert_eq!(saved.partitions, 2);
    assert_eq!(saved.stages_completed, 1);
    Ok(())
}
