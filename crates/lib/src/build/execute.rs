//! Building a single target.
//!
//! A build derives a fresh meta record, asks the trigger whether anything
//! needs doing, then runs the command under a retry loop. Each attempt takes
//! the mutation guard first, if configured, and waits for it outside any time
//! limit. The command is then evaluated inside three nested controls,
//! innermost first:
//!
//! 1. a [`SeedScope`] that seeds the ambient generator and restores it,
//! 2. the diagnostics sink and error capture of [`CommandContext`],
//! 3. a [`Budget`] enforcing the elapsed and cpu limits.
//!
//! The conclusion step persists the last attempt and decides whether a
//! failure aborts the run.

use std::path::Path;
use std::time::Instant;

use rand::rngs::StdRng;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::budget::Budget;
use super::seed::{SeedScope, derive_seed};
use super::types::{BuildError, BuildOutcome, BuildResult, CapturedError, Meta};
use crate::command::{Command, CommandContext, CommandError, Diagnostics};
use crate::config::LoadStrategy;
use crate::engine::Engine;
use crate::hooks::EventKind;
use crate::layout::LayoutEntry;
use crate::store::{self, OBJECTS, Progress, StoreError};

/// Substrings of errors typical of forked workers touching state that does
/// not survive a fork.
const FORK_KEYWORDS: &[&str] = &[
  "fork",
  "multicore",
  "CoreFoundation",
  "CFRunLoop",
  "objc",
  "Unable to fetch",
  "broken pipe",
];

const FORK_HINT: &str = "this error looks like it comes from forked workers; \
  try the local pool (--pool local) or a single job (-j 1)";

/// Build `key`.
///
/// `rng` is the caller's ambient generator. It is seeded for the duration of
/// each command evaluation and left exactly as it was found.
///
/// Returns `Err` only for fatal problems: a failed target outside keep-going
/// mode, or a broken store.
pub async fn build_target(engine: &Engine, key: &str, rng: &mut StdRng) -> Result<BuildOutcome, BuildError> {
  let entry = engine
    .layout()
    .get(key)
    .ok_or_else(|| BuildError::UnknownTarget(key.to_string()))?;
  let command = entry.command.clone().ok_or_else(|| BuildError::NoCommand(key.to_string()))?;

  let meta = derive_meta(engine, entry);
  if !engine.trigger().should_build(engine, key)? {
    debug!(key = %key, "target is up to date");
    return Ok(BuildOutcome::Skipped);
  }

  announce(engine, &meta)?;

  let downstream = engine.graph().downstream(key);
  engine.memory().manage(engine, key, &downstream, engine.config().jobs)?;

  let result = run_with_retries(engine, entry, command.as_ref(), meta, rng).await;
  conclude(engine, entry, result)
}

/// A fresh meta record for `entry`.
pub fn derive_meta(engine: &Engine, entry: &LayoutEntry) -> Meta {
  let seed = entry.seed.unwrap_or_else(|| derive_seed(engine.config().seed, &entry.key));
  let mut meta = Meta::new(entry.key.clone(), seed);
  meta.imported = entry.is_imported();
  meta
}

fn announce(engine: &Engine, meta: &Meta) -> Result<(), StoreError> {
  if engine.logs_progress() && !meta.imported {
    store::set_progress(engine.store(), &meta.key, Progress::Running)?;
  }
  engine.report(EventKind::Target, &meta.key);
  Ok(())
}

/// Attempt the command until it succeeds or the retries run out.
///
/// With `retries = k` a command that always fails runs `k + 1` times.
async fn run_with_retries(
  engine: &Engine,
  entry: &LayoutEntry,
  command: &dyn Command,
  meta: Meta,
  rng: &mut StdRng,
) -> BuildResult {
  let max_retries = engine.config().retries_for(entry);
  let mut attempt: u32 = 0;

  loop {
    let result = run_attempt(engine, entry, command, meta.clone(), rng).await;
    let Some(error) = &result.meta.error else {
      return result;
    };

    attempt += 1;
    if attempt <= max_retries {
      warn!(
        key = %entry.key,
        attempt,
        max_retries,
        error = %error.message,
        "retrying target"
      );
      engine.report(EventKind::Retry, &entry.key);
      continue;
    }
    return result;
  }
}

async fn run_attempt(
  engine: &Engine,
  entry: &LayoutEntry,
  command: &dyn Command,
  mut meta: Meta,
  rng: &mut StdRng,
) -> BuildResult {
  let elapsed = engine.config().elapsed_for(entry);
  let cpu = engine.config().cpu_for(entry);
  let mut diagnostics = Diagnostics::default();

  // Released when the attempt ends, before the outcome is concluded.
  let _guard = if engine.config().lock_envir {
    Some(engine.env().lock().await)
  } else {
    None
  };

  let started = Instant::now();
  let outcome = Budget::new(
    evaluate(engine, &entry.key, command, meta.seed, rng, &mut diagnostics),
    elapsed.duration(),
    cpu.duration(),
  )
  .await;
  meta.time_command = Some(started.elapsed());
  meta.warnings = diagnostics.warnings;
  meta.messages = diagnostics.messages;

  let value = match outcome {
    Ok(Ok(value)) => Some(value),
    Ok(Err(e)) => {
      meta.error = Some(CapturedError::command(e.to_string()));
      None
    }
    Err(overrun) => {
      meta.error = Some(CapturedError::timeout(overrun.to_string()));
      None
    }
  };

  BuildResult {
    key: entry.key.clone(),
    value,
    meta,
  }
}

/// One seeded command evaluation.
async fn evaluate(
  engine: &Engine,
  key: &str,
  command: &dyn Command,
  seed: u64,
  rng: &mut StdRng,
  diagnostics: &mut Diagnostics,
) -> Result<Value, CommandError> {
  let mut scope = SeedScope::enter(rng, seed);
  let mut ctx = CommandContext::new(key, scope.rng(), engine.env().view(), diagnostics);
  command.run(&mut ctx).await
}

fn conclude(engine: &Engine, entry: &LayoutEntry, result: BuildResult) -> Result<BuildOutcome, BuildError> {
  let BuildResult { key, value, mut meta } = result;

  check_outputs(engine, entry, &mut meta)?;
  if engine.config().verbose >= 1 {
    surface_diagnostics(engine, &meta);
  }

  if let Some(captured) = meta.error.clone() {
    engine.report(EventKind::Fail, &key);
    if engine.logs_progress() && !meta.imported {
      store::set_progress(engine.store(), &key, Progress::Failed)?;
    }
    store::set_meta(engine.store(), &meta)?;

    if !engine.config().keep_going {
      return Err(BuildError::TargetFailed {
        key: engine.codec().display_name(&key),
        message: with_fork_hint(&captured.message),
      });
    }
    error!(key = %key, kind = ?captured.kind, error = %captured.message, "target failed, continuing");
    return Ok(BuildOutcome::Failed);
  }

  let value = value.unwrap_or(Value::Null);
  let strategy = engine.config().memory_strategy_for(entry);
  if engine.config().load_strategy == LoadStrategy::Eager && strategy.binds_values() && !meta.is_file && !meta.imported
  {
    engine.env().assign(key.clone(), value.clone());
  }
  persist(engine, &key, value, &meta)?;
  engine.mark_built(&key);
  if engine.logs_progress() {
    store::set_progress(engine.store(), &key, Progress::Done)?;
  }

  debug!(key = %key, time = ?meta.time_command, "target built");
  Ok(BuildOutcome::Built)
}

/// Store a value and its meta record. Shared by targets and imports.
pub(crate) fn persist(engine: &Engine, key: &str, value: Value, meta: &Meta) -> Result<(), StoreError> {
  engine.store().set(key, value, OBJECTS, true)?;
  store::set_meta(engine.store(), meta)
}

/// Missing declared outputs become warnings, never failures.
fn check_outputs(engine: &Engine, entry: &LayoutEntry, meta: &mut Meta) -> Result<(), BuildError> {
  for file in &entry.deps.file_out {
    let path = engine.codec().decode_path(file)?;
    if !Path::new(&path).exists() {
      warn!(key = %entry.key, path = %path, "declared output file is missing");
      meta.warnings.push(format!("missing output file: {}", path));
    }
  }
  Ok(())
}

fn surface_diagnostics(engine: &Engine, meta: &Meta) {
  let name = engine.codec().display_name(&meta.key);
  if !meta.warnings.is_empty() {
    warn!("{} raised {} warning(s):\n  {}", name, meta.warnings.len(), meta.warnings.join("\n  "));
  }
  if !meta.messages.is_empty() {
    info!("{} raised {} message(s):\n  {}", name, meta.messages.len(), meta.messages.join("\n  "));
  }
}

fn with_fork_hint(message: &str) -> String {
  let lower = message.to_lowercase();
  if FORK_KEYWORDS.iter().any(|k| lower.contains(&k.to_lowercase())) {
    format!("{}\nhint: {}", message, FORK_HINT)
  } else {
    message.to_string()
  }
}
