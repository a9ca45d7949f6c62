use anyhow::Result;
use stagebeam::testing::*;
use stagebeam::*;
use std::time::Duration;

#[test]
fn json_fields_override_defaults() -> Result<()> {
    let cfg = EngineConfig::from_json(r#"{ "default_tasks": 3, "run_timeout": 1500 }"#)?;
    assert_eq!(cfg.default_tasks, 3);
    assert_eq!(cfg.run_timeout, Some(Duration::from_millis(1500)));
    assert_eq!(cfg.threads, None);
    assert!(!cfg.capture_input);
    Ok(())
}

#[test]
fn empty_json_is_the_default_config() -> Result<()> {
    assert_eq!(EngineConfig::from_json("{}")?, EngineConfig::default());
    Ok(())
}

#[test]
fn malformed_json_is_a_config_error() {
    let err = EngineConfig::from_json(r#"{ "threads": "many" }"#).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn config_survives_a_json_round_trip() -> Result<()> {
    let cfg = EngineConfig::default()
        .with_threads(3)
        .with_run_timeout(Duration::from_secs(2))
        .with_capture_input(true);
    let text = serde_json::to_string(&cfg)?;
    assert_eq!(EngineConfig::from_json(&text)?, cfg);
    Ok(())
}

#[test]
fn orchestrator_uses_configured_thread_count() -> Result<()> {
    let orch = Orchestrator::<i64>::with_config(EngineConfig::default().with_threads(3))?;
    assert_eq!(orch.threads(), 3);
    assert_eq!(orch.config().threads, Some(3));
    Ok(())
}

#[test]
fn default_tasks_applies_to_stages_without_a_hint() -> Result<()> {
    let orch = Orchestrator::<i64>::with_config(
        EngineConfig::default().with_threads(2).with_default_tasks(5),
    )?;
    let g = StageGraph::new();
    let s = g.stage().data((0..50).collect());
    let summary = orch.run(&g)?;

    assert_eq!(summary.metrics.partitions, 5);
    assert_collections_equal(&orch.result(&s)?, &(0..50).collect::<Vec<_>>());
    Ok(())
}
