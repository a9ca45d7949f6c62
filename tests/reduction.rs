//! Partitioning and tree reduction across task counts.

use anyhow::Result;
use stagebeam::partition::{effective_task_count, split_contiguous};
use stagebeam::testing::*;
use stagebeam::*;

#[test]
fn partitions_cover_input_exactly_once() {
    let data: Vec<u32> = (0..37).collect();
    for t in 1..=data.len() {
        let parts = split_contiguous(data.clone(), t);
        assert_eq!(parts.len(), t);
        let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        let (min, max) = (sizes.iter().min(), sizes.iter().max());
        assert!(max.zip(min).is_some_and(|(hi, lo)| hi - lo <= 1));
        let flat: Vec<u32> = parts.into_iter().flatten().collect();
        assert_collections_equal(&flat, &data);
    }
}

#[test]
fn task_count_is_bounded_by_input() {
    assert_eq!(effective_task_count(64, None, 10), 10);
    assert_eq!(effective_task_count(4, Some(3), 10), 4);
    assert_eq!(effective_task_count(8, Some(3), 10), 4);
    assert_eq!(effective_task_count(8, None, 0), 0);
}

#[test]
fn reduction_matches_sequential_fold_for_every_task_count() -> Result<()> {
    let input: Vec<i64> = (0..45).map(|i| (i * 7919) % 101 - 50).collect();
    let orch = test_orchestrator::<i64>()?;
    for tasks in 1..=input.len() {
        let g = StageGraph::new();
        let s = g
            .stage()
            .data(input.clone())
            .tasks(tasks)
            .filter(|v: &i64| v % 3 != 0)
            .map(|v: &i64| v * 2);
        orch.run(&g)?;

        let expected: Vec<i64> = input
            .iter()
            .filter(|v| *v % 3 != 0)
            .map(|v| v * 2)
            .collect();
        // Concatenation in rank order reproduces the fold exactly.
        assert_collections_equal(&orch.result(&s)?, &expected);
    }
    Ok(())
}

#[test]
fn custom_reduce_sees_lower_rank_on_the_left() -> Result<()> {
    let orch = test_orchestrator::<String>()?;
    let g = StageGraph::new();
    let letters: Vec<String> = "abcdefghijk".chars().map(String::from).collect();
    let s = g
        .stage()
        .data(letters)
        .tasks(11)
        .reduce(|left: Vec<String>, right: Vec<String>| {
            vec![format!("({}{})", left.concat(), right.concat())]
        });
    orch.run(&g)?;

    let out = orch.result(&s)?;
    assert_eq!(out.len(), 1);
    let flattened: String = out[0].chars().filter(char::is_ascii_alphabetic).collect();
    assert_eq!(flattened, "abcdefghijk");
    Ok(())
}

#[test]
fn custom_reduce_overrides_sorted_merge() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data((1..=16).collect())
        .tasks(4)
        .sorted_descending()
        .reduce(|l: Vec<i64>, r: Vec<i64>| vec![l.iter().sum::<i64>() + r.iter().sum::<i64>()]);
    orch.run(&g)?;

    assert_collections_equal(&orch.result(&s)?, &[136]);
    Ok(())
}

#[test]
fn min_range_caps_worker_count() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let s = g
        .stage()
        .data((0..100).collect())
        .tasks(32)
        .min_range(25)
        .bulk_transform(|part: Vec<i64>| vec![part.len() as i64]);
    let summary = orch.run(&g)?;

    assert_collections_equal(&orch.result(&s)?, &[25, 25, 25, 25]);
    assert_eq!(summary.metrics.partitions, 4);
    assert_eq!(summary.metrics.workers_spawned, 4);
    Ok(())
}

#[test]
fn sorted_merge_keeps_duplicates() -> Result<()> {
    let orch = test_orchestrator::<i64>()?;
    let g = StageGraph::new();
    let input: Vec<i64> = (0..200).map(|i| i % 7).collect();
    let s = g.stage().data(input.clone()).tasks(9).sorted_ascending();
    orch.run(&g)?;

    let out = orch.result(&s)?;
    assert_sorted(&out);
    assert_collections_unordered_equal(&out, &input);
    Ok(())
}
