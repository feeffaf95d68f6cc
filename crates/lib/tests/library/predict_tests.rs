use std::collections::HashMap;
use std::time::Duration;

use cairn_lib::build::Meta;
use cairn_lib::config::RunConfig;
use cairn_lib::graph::DepGraph;
use cairn_lib::store::set_meta;
use cairn_lib::{BuildError, Engine, Layout, LayoutEntry, PredictOptions, predict_runtime, simulate};
use serde_json::Value;

use super::common::constant;

fn secs(pairs: &[(&str, u64)]) -> HashMap<String, Duration> {
  pairs.iter().map(|(k, s)| (k.to_string(), Duration::from_secs(*s))).collect()
}

#[test]
fn every_node_is_assigned_exactly_once() {
  let mut graph = DepGraph::new();
  for (dep, dependent) in [("a", "c"), ("b", "c"), ("c", "e"), ("d", "e"), ("b", "f")] {
    graph.add_edge(dep, dependent);
  }
  let durations = secs(&[("a", 1), ("b", 2), ("c", 3), ("d", 1), ("e", 2), ("f", 5)]);

  for jobs in 1..=4 {
    let schedule = simulate(&graph, &durations, Duration::ZERO, jobs);
    let mut keys: Vec<String> = schedule.assignments.iter().map(|a| a.key.clone()).collect();
    keys.sort();
    assert_eq!(keys, vec!["a", "b", "c", "d", "e", "f"]);
    assert!(schedule.assignments.iter().all(|a| a.worker < jobs));

    let work: Duration = durations.values().sum();
    assert!(schedule.total <= work);
    // Never faster than the critical path b -> c -> e.
    assert!(schedule.total >= Duration::from_secs(7));
  }
}

fn engine() -> Engine {
  let layout = Layout::from_entries([
    LayoutEntry::target("A", constant(Value::Null)).depends_on("raw"),
    LayoutEntry::target("B", constant(Value::Null)).depends_on("A"),
    LayoutEntry::target("C", constant(Value::Null)).depends_on("B"),
    LayoutEntry::target("D", constant(Value::Null)),
  ]);
  Engine::new(layout, RunConfig::default()).unwrap()
}

#[test]
fn prediction_uses_recorded_times_and_ignores_imports() {
  let engine = engine();
  for (key, secs) in [("A", 2), ("B", 3), ("C", 1), ("D", 4)] {
    let mut meta = Meta::new(key, 0);
    meta.time_command = Some(Duration::from_secs(secs));
    set_meta(engine.store(), &meta).unwrap();
  }

  let opts = PredictOptions {
    jobs: 2,
    from_scratch: true,
    ..PredictOptions::default()
  };
  let schedule = predict_runtime(&engine, &opts).unwrap();
  assert_eq!(schedule.total, Duration::from_secs(6));
  assert!(schedule.assignment("raw").is_none());
}

#[test]
fn requested_targets_restrict_to_their_upstream() {
  let engine = engine();
  let opts = PredictOptions {
    targets: Some(vec!["B".to_string()]),
    from_scratch: true,
    known_times: secs(&[("A", 2), ("B", 3), ("D", 100)]),
    ..PredictOptions::default()
  };
  let schedule = predict_runtime(&engine, &opts).unwrap();
  assert_eq!(schedule.total, Duration::from_secs(5));
  assert_eq!(schedule.sequences()[&0], vec!["A", "B"]);
}

#[test]
fn unknown_requested_target_is_an_error() {
  let opts = PredictOptions {
    targets: Some(vec!["nope".to_string()]),
    ..PredictOptions::default()
  };
  assert!(matches!(
    predict_runtime(&engine(), &opts),
    Err(BuildError::UnknownTarget(t)) if t == "nope"
  ));
}
