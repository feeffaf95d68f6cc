//! Runtime prediction.
//!
//! [`simulate`] replays a parallel run on paper: list scheduling over the
//! dependency graph with known durations, nothing executed. Ready nodes are
//! taken in order of how much work waits behind them, ties broken by key, and
//! each goes to the lowest-numbered free worker.
//!
//! [`predict_runtime`] assembles the duration table for an engine and runs
//! the simulation over its targets.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::build::BuildError;
use crate::engine::Engine;
use crate::graph::DepGraph;
use crate::store;

/// Where and when a node runs in the simulated schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
  pub key: String,
  /// Zero-based worker index.
  pub worker: usize,
  /// Zero-based position in that worker's sequence.
  pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
  /// Predicted makespan.
  pub total: Duration,
  /// Sorted by worker, then order.
  pub assignments: Vec<Assignment>,
  /// Nodes that fell back to the default duration, sorted.
  pub untimed: Vec<String>,
}

impl Schedule {
  pub fn assignment(&self, key: &str) -> Option<&Assignment> {
    self.assignments.iter().find(|a| a.key == key)
  }

  /// Keys each worker ran, in order.
  pub fn sequences(&self) -> BTreeMap<usize, Vec<String>> {
    let mut sequences: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for a in &self.assignments {
      sequences.entry(a.worker).or_default().push(a.key.clone());
    }
    sequences
  }
}

struct Running {
  key: String,
  remaining: Duration,
  worker: usize,
}

/// Simulate running `graph` on `jobs` workers.
///
/// Nodes missing from `durations` take `default_time`; they are listed in
/// [`Schedule::untimed`] and warned about once.
pub fn simulate(graph: &DepGraph, durations: &HashMap<String, Duration>, default_time: Duration, jobs: usize) -> Schedule {
  let jobs = jobs.max(1);
  let keys = graph.keys();

  let untimed: Vec<String> = keys.iter().filter(|k| !durations.contains_key(*k)).cloned().collect();
  if !untimed.is_empty() {
    warn!(
      count = untimed.len(),
      default = ?default_time,
      "no duration known for some targets, using the default: {}",
      untimed.join(", ")
    );
  }
  let duration_of = |key: &str| durations.get(key).copied().unwrap_or(default_time);

  let mut in_degree: HashMap<&str, usize> = keys.iter().map(|k| (k.as_str(), graph.dependencies(k).len())).collect();
  let priority: HashMap<&str, usize> = keys.iter().map(|k| (k.as_str(), graph.downstream(k).len())).collect();

  let mut ready: BinaryHeap<(usize, Reverse<String>)> = BinaryHeap::new();
  for key in &keys {
    if in_degree[key.as_str()] == 0 {
      ready.push((priority[key.as_str()], Reverse(key.clone())));
    }
  }

  let mut free: BTreeSet<usize> = (0..jobs).collect();
  let mut running: Vec<Running> = Vec::with_capacity(jobs);
  let mut sequences: Vec<Vec<String>> = vec![Vec::new(); jobs];
  let mut total = Duration::ZERO;

  while !ready.is_empty() || !running.is_empty() {
    while let Some(&worker) = free.first() {
      let Some((_, Reverse(key))) = ready.pop() else {
        break;
      };
      free.remove(&worker);
      sequences[worker].push(key.clone());
      running.push(Running {
        remaining: duration_of(&key),
        key,
        worker,
      });
    }

    let Some(step) = running.iter().map(|r| r.remaining).min() else {
      break;
    };
    total += step;

    let mut retired: Vec<Running> = Vec::new();
    for mut job in std::mem::take(&mut running) {
      job.remaining -= step;
      if job.remaining.is_zero() {
        retired.push(job);
      } else {
        running.push(job);
      }
    }
    retired.sort_by(|a, b| a.key.cmp(&b.key));

    for job in retired {
      free.insert(job.worker);
      for dependent in graph.dependents(&job.key) {
        if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
          *deg -= 1;
          if *deg == 0 {
            let p = priority.get(dependent.as_str()).copied().unwrap_or_default();
            ready.push((p, Reverse(dependent)));
          }
        }
      }
    }
  }

  let assignments = sequences
    .into_iter()
    .enumerate()
    .flat_map(|(worker, keys)| {
      keys
        .into_iter()
        .enumerate()
        .map(move |(order, key)| Assignment { key, worker, order })
    })
    .collect();

  Schedule {
    total,
    assignments,
    untimed,
  }
}

#[derive(Debug, Clone)]
pub struct PredictOptions {
  pub jobs: usize,
  /// Only predict these targets and what they depend on.
  pub targets: Option<Vec<String>>,
  /// Assume nothing is up to date.
  pub from_scratch: bool,
  /// Hypothetical durations, taking precedence over recorded ones.
  pub known_times: HashMap<String, Duration>,
  pub default_time: Duration,
}

impl Default for PredictOptions {
  fn default() -> Self {
    Self {
      jobs: 1,
      targets: None,
      from_scratch: false,
      known_times: HashMap::new(),
      default_time: Duration::ZERO,
    }
  }
}

/// Predict the makespan of building the engine's targets.
///
/// Durations come from `known_times`, then the build times recorded in the
/// store, then `default_time`. Unless `from_scratch` is set, targets the
/// trigger considers up to date take no time.
pub fn predict_runtime(engine: &Engine, opts: &PredictOptions) -> Result<Schedule, BuildError> {
  let layout = engine.layout();
  let all_targets: BTreeSet<String> = layout.targets().into_iter().collect();

  let selected: BTreeSet<String> = match &opts.targets {
    Some(requested) => {
      if let Some(unknown) = requested.iter().find(|t| !all_targets.contains(*t)) {
        return Err(BuildError::UnknownTarget(unknown.clone()));
      }
      engine
        .graph()
        .upstream(requested.iter().map(String::as_str), None)
        .into_iter()
        .filter(|k| all_targets.contains(k))
        .collect()
    }
    None => all_targets,
  };

  let graph = engine.graph().subgraph(selected.iter().map(String::as_str));
  let mut durations = store::build_times(engine.store(), selected.iter().map(String::as_str))?;
  for (key, time) in &opts.known_times {
    if selected.contains(key) {
      durations.insert(key.clone(), *time);
    }
  }

  if !opts.from_scratch {
    for key in &selected {
      if !engine.trigger().should_build(engine, key)? {
        durations.insert(key.clone(), Duration::ZERO);
      }
    }
  }

  debug!(targets = selected.len(), jobs = opts.jobs, "simulating run");
  Ok(simulate(&graph, &durations, opts.default_time, opts.jobs))
}
