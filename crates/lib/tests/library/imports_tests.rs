use cairn_lib::config::RunConfig;
use cairn_lib::hooks::EventKind;
use cairn_lib::imports::{MISSING_SENTINEL, process_imports};
use cairn_lib::keys::encode_path;
use cairn_lib::pool::{ClusterPool, LocalPool};
use cairn_lib::store::OBJECTS;
use cairn_lib::LayoutEntry;
use serde_json::{Value, json};

use super::common::{constant, recording_engine};

// a, b, c are leaves; mid needs a and b; top needs mid and c.
fn diamond() -> Vec<LayoutEntry> {
  vec![
    LayoutEntry::import("mid").depends_on("a").depends_on("b"),
    LayoutEntry::import("top").depends_on("mid").depends_on("c"),
    LayoutEntry::target("report", constant(Value::Null)).depends_on("top"),
  ]
}

fn position(order: &[String], key: &str) -> usize {
  order.iter().position(|k| k == key).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_batches_complete_before_the_next_starts() {
  let (engine, reporter) = recording_engine(diamond(), RunConfig::default());
  for key in ["a", "b", "c", "mid", "top"] {
    engine.env().assign(key, json!(key));
  }
  let pool = ClusterPool::start(3);

  let report = process_imports(&engine, &pool).await.unwrap();
  pool.shutdown().await;

  assert_eq!(report.batches, 3);
  assert_eq!(report.resolved, vec!["a", "b", "c", "mid", "top"]);

  let order: Vec<String> = reporter.events().into_iter().map(|e| e.key).collect();
  for leaf in ["a", "b", "c"] {
    assert!(position(&order, leaf) < position(&order, "mid"));
  }
  assert!(position(&order, "mid") < position(&order, "top"));
  assert_eq!(reporter.count(EventKind::Target), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn local_and_cluster_pools_agree() {
  let dir = tempfile::TempDir::new().unwrap();
  let data = dir.path().join("data.csv");
  std::fs::write(&data, "x\n1\n").unwrap();
  let data = data.to_string_lossy().to_string();

  let entries = || {
    let mut entries = diamond();
    entries.push(
      LayoutEntry::target("load", constant(Value::Null))
        .file_in(&data)
        .depends_on("unbound"),
    );
    entries
  };

  let (local_engine, _) = recording_engine(entries(), RunConfig::default());
  let (cluster_engine, _) = recording_engine(entries(), RunConfig::default());
  for engine in [&local_engine, &cluster_engine] {
    engine.env().assign("a", json!(1));
    engine.env().assign("mid", json!(2));
  }

  let local = process_imports(&local_engine, &LocalPool::new(2)).await.unwrap();
  let cluster_pool = ClusterPool::start(2);
  let cluster = process_imports(&cluster_engine, &cluster_pool).await.unwrap();
  cluster_pool.shutdown().await;

  assert_eq!(local, cluster);
  assert_eq!(local.missing, vec!["b", "c", "top", "unbound"]);
  assert!(local.resolved.contains(&encode_path(&data)));

  for key in ["a", "b", "mid", "unbound"] {
    assert_eq!(
      local_engine.store().get(key, OBJECTS).unwrap(),
      cluster_engine.store().get(key, OBJECTS).unwrap()
    );
  }
  assert_eq!(
    local_engine.store().get("b", OBJECTS).unwrap(),
    Some(json!(MISSING_SENTINEL))
  );
}
