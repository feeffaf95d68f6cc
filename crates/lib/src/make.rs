//! Running a whole build.
//!
//! Imports are resolved first. Targets then build in dependency waves: every
//! member of a wave only depends on earlier waves, so a wave is one batch for
//! the worker pool. In keep-going mode, targets downstream of a failure are
//! blocked rather than built. A fatal failure lets the current wave finish
//! and schedules nothing after it.

use std::collections::HashSet;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, error, info, warn};

use crate::build::{BuildError, BuildOutcome, build_target};
use crate::engine::Engine;
use crate::imports::{ImportReport, process_imports};
use crate::pool::WorkerPool;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
  pub built: Vec<String>,
  /// Up to date, not rebuilt.
  pub skipped: Vec<String>,
  pub failed: Vec<String>,
  /// Not attempted because a dependency failed.
  pub blocked: Vec<String>,
  pub imports: ImportReport,
}

impl RunReport {
  pub fn succeeded(&self) -> bool {
    self.failed.is_empty() && self.blocked.is_empty()
  }
}

/// Build every outdated target of `engine`.
pub async fn make<P: WorkerPool>(engine: &Arc<Engine>, pool: &P) -> Result<RunReport, BuildError> {
  engine.set_running(true);
  let result = run(engine, pool).await;
  engine.set_running(false);
  result
}

async fn run<P: WorkerPool>(engine: &Arc<Engine>, pool: &P) -> Result<RunReport, BuildError> {
  let mut report = RunReport {
    imports: process_imports(engine, pool).await?,
    ..RunReport::default()
  };

  let targets = engine.layout().targets();
  let graph = engine.graph().subgraph(targets.iter().map(String::as_str));
  let waves = graph.waves()?;
  info!(targets = targets.len(), waves = waves.len(), workers = pool.workers(), "building targets");

  let mut unusable: HashSet<String> = HashSet::new();

  for (idx, wave) in waves.into_iter().enumerate() {
    let (ready, blocked): (Vec<String>, Vec<String>) = wave
      .into_iter()
      .partition(|key| !graph.dependencies(key).iter().any(|dep| unusable.contains(dep)));

    for key in &blocked {
      warn!(key = %key, "skipping target, a dependency failed");
    }
    unusable.extend(blocked.iter().cloned());
    report.blocked.extend(blocked);

    if ready.is_empty() {
      continue;
    }
    debug!(wave = idx, targets = ready.len(), "building wave");

    let engine = engine.clone();
    let results = pool
      .run_batch(ready, move |key| {
        let engine = engine.clone();
        async move {
          let mut rng = StdRng::from_entropy();
          let outcome = build_target(&engine, &key, &mut rng).await;
          (key, outcome)
        }
      })
      .await?;

    let mut fatal = None;
    for (key, outcome) in results {
      match outcome {
        Ok(BuildOutcome::Built) => report.built.push(key),
        Ok(BuildOutcome::Skipped) => report.skipped.push(key),
        Ok(BuildOutcome::Failed) => {
          unusable.insert(key.clone());
          report.failed.push(key);
        }
        Err(e) => {
          error!(key = %key, error = %e, "build failed");
          fatal.get_or_insert(e);
        }
      }
    }
    if let Some(e) = fatal {
      return Err(e);
    }
  }

  for list in [
    &mut report.built,
    &mut report.skipped,
    &mut report.failed,
    &mut report.blocked,
  ] {
    list.sort();
  }
  info!(
    built = report.built.len(),
    skipped = report.skipped.len(),
    failed = report.failed.len(),
    blocked = report.blocked.len(),
    "run complete"
  );
  Ok(report)
}
