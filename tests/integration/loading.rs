//! Pipeline directory loading tests.

use crate::common::{DAILY_STATS_SQL, write_pipeline};
use cadence::testing::ScriptedBackend;
use cadence::{
    ConfigError, InMemoryJobRepository, PipelineName, Scheduler, load_pipelines,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Test: Incomplete entries are left out of the registry without failing the load.
#[tokio::test]
async fn test_incomplete_entries_are_skipped() {
    let root = TempDir::new().unwrap();
    write_pipeline(
        root.path(),
        "daily_stats",
        Some(DAILY_STATS_SQL),
        Some(r#"{"cron": "0 1 * * *"}"#),
    );
    write_pipeline(root.path(), "no_statement", None, Some(r#"{"cron": "0 2 * * *"}"#));
    write_pipeline(root.path(), "no_config", Some("SELECT 1"), None);
    std::fs::write(root.path().join("README.md"), "not a pipeline").unwrap();

    let registry = load_pipelines(root.path()).unwrap();

    let names: Vec<&str> = registry.names().map(PipelineName::as_str).collect();
    assert_eq!(names, vec!["daily_stats"]);

    let mut scheduler = Scheduler::new(
        Arc::new(InMemoryJobRepository::new()),
        Arc::new(ScriptedBackend::succeeding()),
    );
    assert_eq!(scheduler.register_all(&registry).unwrap(), 1);

    let trigger = scheduler.triggers().next().unwrap();
    assert_eq!(trigger.pipeline().as_str(), "daily_stats");
    assert_eq!(trigger.expression(), "0 1 * * *");
}

/// Test: A pipeline without a cron expression is manual only.
#[tokio::test]
async fn test_pipeline_without_cron_is_manual_only() {
    let root = TempDir::new().unwrap();
    write_pipeline(root.path(), "backfill", Some("SELECT 1"), Some(r#"{"cron": ""}"#));
    write_pipeline(root.path(), "adhoc", Some("SELECT 1"), Some(r#"{"owner": "data"}"#));

    let registry = load_pipelines(root.path()).unwrap();
    assert_eq!(registry.len(), 2);

    let mut scheduler = Scheduler::new(
        Arc::new(InMemoryJobRepository::new()),
        Arc::new(ScriptedBackend::succeeding()),
    );
    scheduler.register_all(&registry).unwrap();
    assert_eq!(scheduler.triggers().count(), 0);

    let (handle, task) = scheduler.start().await;
    let report = handle.run_now("adhoc").await.unwrap();
    assert!(report.outcome.is_success());

    handle.shutdown().await.unwrap();
    let _ = task.await;
}

/// Test: An invalid cron expression fails the whole load.
#[test]
fn test_invalid_cron_fails_load() {
    let root = TempDir::new().unwrap();
    write_pipeline(root.path(), "good", Some("SELECT 1"), Some(r#"{"cron": "0 1 * * *"}"#));
    write_pipeline(root.path(), "bad", Some("SELECT 1"), Some(r#"{"cron": "every morning"}"#));

    let err = load_pipelines(root.path()).unwrap_err();
    match err {
        ConfigError::InvalidSchedule { pipeline, .. } => assert_eq!(pipeline.as_str(), "bad"),
        other => panic!("expected InvalidSchedule, got {other:?}"),
    }
}

/// Test: Malformed JSON and zero-day windows are configuration errors.
#[test]
fn test_malformed_config_fails_load() {
    let root = TempDir::new().unwrap();
    write_pipeline(root.path(), "broken", Some("SELECT 1"), Some("{cron: 0 1 * * *"));
    assert!(matches!(
        load_pipelines(root.path()),
        Err(ConfigError::Json { .. })
    ));

    let root = TempDir::new().unwrap();
    write_pipeline(root.path(), "empty_window", Some("SELECT 1"), Some(r#"{"window_days": 0}"#));
    assert!(matches!(
        load_pipelines(root.path()),
        Err(ConfigError::InvalidWindow { .. })
    ));
}

/// Test: Pipeline options and window overrides reach the definition.
#[test]
fn test_options_and_window_override() {
    let root = TempDir::new().unwrap();
    write_pipeline(
        root.path(),
        "weekly",
        Some("SELECT 1"),
        Some(r#"{"cron": "@weekly", "window_days": 7, "target": "weekly_stats"}"#),
    );

    let registry = load_pipelines(root.path()).unwrap();
    let weekly = registry.get(&PipelineName::new("weekly")).unwrap();

    assert_eq!(weekly.schedule(), Some("@weekly"));
    assert_eq!(weekly.window().unwrap().size_days(), 7);
    assert_eq!(
        weekly.options().get("target").and_then(|v| v.as_str()),
        Some("weekly_stats")
    );
}
