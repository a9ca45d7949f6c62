//! Single-stage and chained-stage behavior.

use anyhow::Result;
use parking_lot::Mutex;
use stagebeam::testing::*;
use stagebeam::*;
use std::sync::Arc;

const P1_DESCENDING: [i64; 15] = [
    9357, 223, 199, 178, 145, 134, 131, 114, 108, 103, 102, 102, 101, 101, 101,
];

#[test]
fn filter_map_sorted_descending() -> Result<()> {
    for tasks in [1, 2, 3, 5, 8, 18] {
        let orch = test_orchestrator::<i64>()?;
        let g = StageGraph::new();
        let s = g
            .stage()
            .data(signed_values())
            .tasks(tasks)
            .filter(|v: &i64| *v > 0)
            .map(|v: &i64| v + 100)
            .sorted_descending();
        orch.run(&g)?;
        assert_collections_equal(&orch.result(&s)?, &P1_DESCENDING);
    }
    Ok(())
}

#[test]
fn ascending_is_reverse_of_descending() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data(signed_values())
        .tasks(4)
        .filter(|v: &i64| *v > 0)
        .map(|v: &i64| v + 100)
        .sorted_ascending();
    orch.run(&g)?;

    let mut expected = P1_DESCENDING.to_vec();
    expected.reverse();
    assert_collections_equal(&orch.result(&s)?, &expected);
    Ok(())
}

#[test]
fn unsorted_stage_keeps_input_order() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let input: Vec<i64> = (0..1000).collect();
    let s = g.stage().data(input.clone()).tasks(7);
    orch.run(&g)?;
    assert_collections_equal(&orch.result(&s)?, &input);
    Ok(())
}

#[test]
fn repeated_filters_and_maps_compose() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data((1..=30).collect())
        .tasks(3)
        .filter(|v: &i64| v % 2 == 0)
        .filter(|v: &i64| v % 3 == 0)
        .map(|v: &i64| v + 1)
        .map(|v: &i64| v * 10);
    orch.run(&g)?;
    assert_collections_equal(&orch.result(&s)?, &[70, 130, 190, 250, 310]);
    Ok(())
}

#[test]
fn for_each_sees_every_surviving_element() -> Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data((0..50).collect())
        .tasks(5)
        .filter(|v: &i64| v % 5 == 0)
        .for_each(move |v: &i64| sink.lock().push(*v));
    orch.run(&g)?;

    let expected: Vec<i64> = (0..50).filter(|v| v % 5 == 0).collect();
    assert_collections_equal(&orch.result(&s)?, &expected);
    assert_collections_unordered_equal(&seen.lock(), &expected);
    Ok(())
}

#[test]
fn bulk_transform_replaces_lazy_ops() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data((1..=8).collect())
        .tasks(2)
        .filter(|_: &i64| false)
        .bulk_transform(|part: Vec<i64>| vec![part.iter().sum()]);
    orch.run(&g)?;

    // One partial sum per partition, in rank order.
    assert_collections_equal(&orch.result(&s)?, &[10, 26]);
    Ok(())
}

#[test]
fn sequence_transform_runs_over_iterator() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data((1..=12).collect())
        .tasks(3)
        .sequence_transform(|it: ElementIter<i64>| it.flat_map(|v| [v, -v]).filter(|v| v % 4 != 0));
    orch.run(&g)?;

    let expected: Vec<i64> = (1..=12)
        .flat_map(|v| [v, -v])
        .filter(|v| v % 4 != 0)
        .collect();
    assert_collections_equal(&orch.result(&s)?, &expected);
    Ok(())
}

#[test]
fn empty_input_yields_empty_result() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let a = g.stage().alias("a").data(Vec::new()).tasks(4);
    let b = g.stage().alias("b").map(|v: &i64| v + 1);
    a.then(&b);
    orch.run(&g)?;

    assert!(orch.result("a")?.is_empty());
    assert!(orch.result("b")?.is_empty());
    Ok(())
}

#[test]
fn chained_stages_feed_results_forward() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let first = g.stage().data((1..=10).collect()).tasks(3).map(|v: &i64| v * 2);
    let second = g.stage().filter(|v: &i64| v % 3 != 0);
    let third = g.stage().alias("last").tasks(2).sorted_descending();
    first.then(&second).then(&third);
    orch.run(&g)?;

    assert_collections_equal(&orch.result(&first)?, &[2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
    assert_collections_equal(&orch.result(&second)?, &[2, 4, 8, 10, 14, 16, 20]);
    assert_collections_equal(&orch.result("last")?, &[20, 16, 14, 10, 8, 4, 2]);
    Ok(())
}

#[test]
fn non_root_data_precedes_delivered_elements() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let up = g.stage().data(vec![1, 2, 3]).tasks(1);
    let down = g.stage().data(vec![100, 200]).tasks(2);
    sequence(&up, &down);
    orch.run(&g)?;

    assert_collections_equal(&orch.result(&down)?, &[100, 200, 1, 2, 3]);
    Ok(())
}

#[test]
fn captures_raw_input_when_enabled() -> Result<()> {
    let orch = Orchestrator::<i64>::with_config(
        EngineConfig::default()
            .with_threads(2)
            .with_capture_input(true),
    )?;
    let g = StageGraph::new();
    let a = g.stage().alias("src").data(vec![5, 6, 7]).map(|v: &i64| v - 5);
    let b = g.stage().alias("dst");
    a.then(&b);
    orch.run(&g)?;

    assert_collections_equal(&orch.input_data("src")?, &[5, 6, 7]);
    assert_collections_equal(&orch.input_data("dst")?, &[0, 1, 2]);
    Ok(())
}

#[test]
fn raw_input_is_not_captured_by_default() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    g.stage().alias("src").data(vec![1]);
    orch.run(&g)?;

    assert!(matches!(orch.input_data("src"), Err(EngineError::UnknownStage(_))));
    Ok(())
}

#[test]
fn unknown_alias_is_an_error() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    g.stage().alias("known").data(vec![1]);
    orch.run(&g)?;

    assert!(orch.result("known").is_ok());
    let err = orch.result("missing").unwrap_err();
    assert!(matches!(err, EngineError::UnknownStage(ref name) if name == "missing"));
    Ok(())
}

#[test]
fn works_with_non_numeric_elements() -> Result<()> {
    let orch = test_orchestrator::<String>()?;
    let g = StageGraph::new();
    let words = g
        .stage()
        .data(
            ["pear", "apple", "fig", "banana"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .tasks(2)
        .map(|s: &String| s.to_uppercase())
        .sorted_ascending();
    orch.run(&g)?;

    assert_eq!(orch.result(&words)?, vec!["APPLE", "BANANA", "FIG", "PEAR"]);
    Ok(())
}
