//! Unit tests for node lifecycle
//!
//! Init refusals, config append, start failures and cleanup, against the
//! simulated engine.

use std::sync::Arc;
use std::time::Duration;

use shardlord_core::engine::SimulatedEngine;
use shardlord_core::node::{NodeHandle, NodeIdentity, NodePhase};
use shardlord_core::ShardlordError;

fn node(
    base: &std::path::Path,
    engine: &Arc<SimulatedEngine>,
    port: u16,
) -> NodeHandle<SimulatedEngine> {
    NodeHandle::new(
        NodeIdentity::under(base, "W1", port),
        engine.clone(),
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn test_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    let mut handle = node(dir.path(), &engine, 5433);

    handle
        .init()
        .await
        .unwrap()
        .append_config("port = 5433\n")
        .await
        .unwrap()
        .start()
        .await
        .unwrap();
    assert_eq!(handle.phase(), NodePhase::Running);
    assert_eq!(engine.running_ports(), vec![5433]);

    let conf = std::fs::read_to_string(handle.data_dir().join("postgresql.conf")).unwrap();
    assert!(conf.ends_with("\nport = 5433\n"));
    assert!(handle.log_file().parent().unwrap().is_dir());

    handle.run_sql("postgres", "select 1").await.unwrap();
    assert_eq!(engine.statements_on(5433), vec!["select 1".to_string()]);

    handle.cleanup().await.unwrap();
    assert_eq!(handle.phase(), NodePhase::CleanedUp);
    assert!(engine.running_ports().is_empty());
    assert!(!dir.path().join("W1").exists());

    // Second cleanup is a no-op
    handle.cleanup().await.unwrap();
}

#[tokio::test]
async fn test_init_refuses_non_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    let stray = dir.path().join("W1").join("keep.txt");
    std::fs::create_dir_all(stray.parent().unwrap()).unwrap();
    std::fs::write(&stray, "not ours").unwrap();

    let mut handle = node(dir.path(), &engine, 5433);
    let err = handle.init().await.err().unwrap();
    assert!(matches!(err, ShardlordError::Init { .. }));
    assert_eq!(handle.phase(), NodePhase::Created);

    // A directory we never took over must survive cleanup
    handle.cleanup().await.unwrap();
    assert!(stray.exists());
}

#[tokio::test]
async fn test_init_refuses_bound_port() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    engine.occupy_port(5433);

    let mut handle = node(dir.path(), &engine, 5433);
    let err = handle.init().await.err().unwrap();

    assert!(err.to_string().contains("5433"));
    assert!(!dir.path().join("W1").exists());
}

#[tokio::test]
async fn test_append_before_init_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    let mut handle = node(dir.path(), &engine, 5433);

    let err = handle.append_config("port = 5433").await.err().unwrap();
    assert!(matches!(err, ShardlordError::Precondition { .. }));
}

#[tokio::test]
async fn test_crash_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    engine.crash_on_start(5433);

    let mut handle = node(dir.path(), &engine, 5433);
    handle.init().await.unwrap();
    let err = handle.start().await.err().unwrap();

    match err {
        ShardlordError::Crash { node, log_tail, .. } => {
            assert_eq!(node, "W1");
            assert!(log_tail.contains("FATAL"));
        }
        other => panic!("expected crash, got {other}"),
    }
    assert_eq!(handle.phase(), NodePhase::Initialized);

    handle.cleanup().await.unwrap();
    assert!(!dir.path().join("W1").exists());
}

#[tokio::test]
async fn test_stalled_start_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    engine.stall_on_start(5433);

    let mut handle = node(dir.path(), &engine, 5433);
    handle.init().await.unwrap();
    let err = handle.start().await.err().unwrap();

    assert!(matches!(
        err,
        ShardlordError::Start { timeout, .. } if timeout == Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn test_query_requires_running_node() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    let mut handle = node(dir.path(), &engine, 5433);
    handle.init().await.unwrap();

    let err = handle.run_sql("postgres", "select 1").await.err().unwrap();
    assert!(matches!(err, ShardlordError::Query { .. }));
    assert!(engine.statements().is_empty());
}

#[tokio::test]
async fn test_failed_stop_keeps_node_running() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new());
    engine.fail_next_stop(5433);

    let mut handle = node(dir.path(), &engine, 5433);
    handle.init().await.unwrap().start().await.unwrap();

    let err = handle.cleanup().await.err().unwrap();
    assert!(matches!(err, ShardlordError::Cleanup { .. }));
    assert_eq!(handle.phase(), NodePhase::Running);
    assert!(dir.path().join("W1").exists());

    handle.cleanup().await.unwrap();
    assert!(!dir.path().join("W1").exists());
}
