//! Run configuration.
//!
//! Global defaults for every target, overridable per target through the
//! [`crate::layout::LayoutEntry`] fields. A missing override falls back to the
//! global value verbatim, including [`Limit::Unlimited`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::layout::LayoutEntry;

/// A time budget. Serialized as seconds, with `null` meaning unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Limit {
  #[default]
  Unlimited,
  Within(Duration),
}

impl Limit {
  /// Values a [`Duration`] cannot hold (infinite, NaN, negative or too
  /// large) mean no limit.
  pub fn from_secs(secs: f64) -> Self {
    Duration::try_from_secs_f64(secs).map_or(Limit::Unlimited, Limit::Within)
  }

  pub fn duration(self) -> Option<Duration> {
    match self {
      Limit::Unlimited => None,
      Limit::Within(d) => Some(d),
    }
  }
}

impl From<Option<f64>> for Limit {
  fn from(secs: Option<f64>) -> Self {
    secs.map(Limit::from_secs).unwrap_or_default()
  }
}

impl From<Limit> for Option<f64> {
  fn from(limit: Limit) -> Self {
    limit.duration().map(|d| d.as_secs_f64())
  }
}

/// What happens to in-memory target values before each build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStrategy {
  /// Keep everything bound.
  #[default]
  Speed,
  /// Unload values nothing downstream still needs.
  Autoclean,
  Preclean,
  Lookahead,
  /// Unload everything except the target's own dependencies.
  Unload,
  /// Leave memory alone and never bind new values.
  None,
}

impl MemoryStrategy {
  /// Whether built values may be bound into the shared context at all.
  pub fn binds_values(self) -> bool {
    !matches!(self, MemoryStrategy::Autoclean | MemoryStrategy::Unload | MemoryStrategy::None)
  }
}

/// When built values are bound into the shared context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
  /// Bind each value as soon as its target succeeds.
  #[default]
  Eager,
  /// Leave values in the store until someone asks for them.
  Lazy,
}

/// Which worker pool runs independent items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
  /// Tasks in this process, sharing memory.
  #[default]
  Local,
  /// A persistent set of workers reached over a channel.
  Cluster,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  /// Global seed; per-target seeds are derived from it.
  pub seed: u64,
  /// Maximum number of workers.
  pub jobs: usize,
  /// Retries after the first failed attempt.
  pub retries: u32,
  pub elapsed: Limit,
  pub cpu: Limit,
  /// Record failures and continue with independent targets.
  pub keep_going: bool,
  /// Guard the shared context while each command runs.
  pub lock_envir: bool,
  pub log_progress: bool,
  pub memory_strategy: MemoryStrategy,
  pub load_strategy: LoadStrategy,
  /// Verbosity tier; 0 silences warning/message notices.
  pub verbose: u8,
  pub pool: PoolKind,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      seed: 0,
      jobs: 1,
      retries: 0,
      elapsed: Limit::Unlimited,
      cpu: Limit::Unlimited,
      keep_going: false,
      lock_envir: false,
      log_progress: true,
      memory_strategy: MemoryStrategy::default(),
      load_strategy: LoadStrategy::default(),
      verbose: 1,
      pool: PoolKind::default(),
    }
  }
}

impl RunConfig {
  /// Defaults overlaid with `CAIRN_JOBS`, `CAIRN_RETRIES`, `CAIRN_SEED` and
  /// `CAIRN_KEEP_GOING`. Unparseable values are ignored with a warning.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Some(jobs) = env_var::<usize>("CAIRN_JOBS") {
      config.jobs = jobs.max(1);
    }
    if let Some(retries) = env_var("CAIRN_RETRIES") {
      config.retries = retries;
    }
    if let Some(seed) = env_var("CAIRN_SEED") {
      config.seed = seed;
    }
    if let Some(keep_going) = env_var("CAIRN_KEEP_GOING") {
      config.keep_going = keep_going;
    }
    config
  }

  pub fn retries_for(&self, entry: &LayoutEntry) -> u32 {
    entry.retries.unwrap_or(self.retries)
  }

  pub fn elapsed_for(&self, entry: &LayoutEntry) -> Limit {
    entry.elapsed.unwrap_or(self.elapsed)
  }

  pub fn cpu_for(&self, entry: &LayoutEntry) -> Limit {
    entry.cpu.unwrap_or(self.cpu)
  }

  pub fn memory_strategy_for(&self, entry: &LayoutEntry) -> MemoryStrategy {
    entry.memory_strategy.unwrap_or(self.memory_strategy)
  }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
  let raw = std::env::var(name).ok()?;
  match raw.trim().parse() {
    Ok(value) => Some(value),
    Err(_) => {
      warn!(var = name, value = %raw, "ignoring unparseable environment variable");
      None
    }
  }
}
