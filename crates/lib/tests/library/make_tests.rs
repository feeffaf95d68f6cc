use std::sync::Arc;

use cairn_lib::command::shell;
use cairn_lib::config::{PoolKind, RunConfig};
use cairn_lib::pool::{ClusterPool, Pool};
use cairn_lib::store::{OBJECTS, Progress, progress};
use cairn_lib::{BuildError, Engine, Layout, LayoutEntry, make};
use serde_json::json;

use super::common::{always_fails, constant, keep_going};

#[cfg(unix)]
#[tokio::test]
async fn shell_targets_hand_files_downstream() {
  let dir = tempfile::TempDir::new().unwrap();
  let out = dir.path().join("greeting.txt");
  let out_str = out.to_string_lossy().to_string();

  let layout = Layout::from_entries([
    LayoutEntry::target("write", shell(format!("printf hello > '{}'", out_str))).file_out(&out_str),
    LayoutEntry::target("read", shell(format!("cat '{}'", out_str))).file_in(&out_str),
  ]);
  let engine = Arc::new(Engine::new(layout, RunConfig::default()).unwrap());
  let pool = Pool::from_config(engine.config());

  let first = make(&engine, &pool).await.unwrap();
  assert_eq!(first.built, vec!["read", "write"]);
  assert!(first.imports.is_empty());
  assert_eq!(engine.store().get("read", OBJECTS).unwrap(), Some(json!("hello")));

  let second = make(&engine, &pool).await.unwrap();
  assert!(second.built.is_empty());
  assert_eq!(second.skipped, vec!["read", "write"]);

  // A lost output forces its producer and everything downstream to rebuild.
  std::fs::remove_file(&out).unwrap();
  let third = make(&engine, &pool).await.unwrap();
  assert_eq!(third.built, vec!["read", "write"]);
  assert!(out.exists());
  pool.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_run_keeps_going_past_failures() {
  let layout = Layout::from_entries([
    LayoutEntry::target("ok-1", constant(json!(1))),
    LayoutEntry::target("ok-2", constant(json!(2))).depends_on("ok-1"),
    LayoutEntry::target("broken", always_fails("bad input")).with_retries(1),
    LayoutEntry::target("needs-broken", constant(json!(3))).depends_on("broken"),
    LayoutEntry::target("needs-both", constant(json!(4)))
      .depends_on("ok-2")
      .depends_on("needs-broken"),
  ]);
  let config = RunConfig {
    jobs: 3,
    pool: PoolKind::Cluster,
    ..keep_going()
  };
  let engine = Arc::new(Engine::new(layout, config).unwrap());
  let pool = ClusterPool::start(engine.config().jobs);

  let report = make(&engine, &pool).await.unwrap();
  pool.shutdown().await;

  assert_eq!(report.built, vec!["ok-1", "ok-2"]);
  assert_eq!(report.failed, vec!["broken"]);
  assert_eq!(report.blocked, vec!["needs-both", "needs-broken"]);
  assert!(!report.succeeded());

  let store = engine.store();
  assert_eq!(progress(store, "ok-2").unwrap(), Some(Progress::Done));
  assert_eq!(progress(store, "broken").unwrap(), Some(Progress::Failed));
  assert!(!store.exists("needs-both", OBJECTS).unwrap());
}

#[tokio::test]
async fn failed_targets_are_retried_on_the_next_run() {
  let layout = Layout::from_entries([LayoutEntry::target("flaky", always_fails("nope"))]);
  let engine = Arc::new(Engine::new(layout, keep_going()).unwrap());
  let pool = Pool::from_config(engine.config());

  let first = make(&engine, &pool).await.unwrap();
  let second = make(&engine, &pool).await.unwrap();
  assert_eq!(first.failed, vec!["flaky"]);
  assert_eq!(second.failed, vec!["flaky"]);
  assert!(second.skipped.is_empty());
}

#[tokio::test]
async fn fatal_failure_reports_the_target() {
  let layout = Layout::from_entries([
    LayoutEntry::target("first", constant(json!(1))),
    LayoutEntry::target("second", always_fails("exploded")).depends_on("first"),
    LayoutEntry::target("third", constant(json!(3))).depends_on("second"),
  ]);
  let engine = Arc::new(Engine::new(layout, RunConfig::default()).unwrap());
  let pool = Pool::from_config(engine.config());

  let err = make(&engine, &pool).await.unwrap_err();
  assert!(matches!(&err, BuildError::TargetFailed { key, message } if key == "second" && message == "exploded"));
  assert_eq!(engine.store().get("first", OBJECTS).unwrap(), Some(json!(1)));
  assert!(!engine.store().exists("third", OBJECTS).unwrap());
  assert!(!engine.is_running());
}
