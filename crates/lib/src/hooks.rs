//! Collaborators the engine calls out to.
//!
//! - [`Reporter`] receives the fixed vocabulary of build events.
//! - [`TriggerDecision`] decides whether a target needs building at all.
//! - [`MemoryHook`] manages bound values before each build.
//! - [`SymbolResolver`] resolves namespaced imports.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::MemoryStrategy;
use crate::engine::Engine;
use crate::keys::{self, KeyKind, NamespacedRef};
use crate::store::{self, OBJECTS, Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
  /// A target started building.
  Target,
  Retry,
  Fail,
  /// An import could not be resolved.
  Missing,
  /// An import was resolved.
  Import,
}

impl EventKind {
  pub fn as_str(self) -> &'static str {
    match self {
      EventKind::Target => "target",
      EventKind::Retry => "retry",
      EventKind::Fail => "fail",
      EventKind::Missing => "missing",
      EventKind::Import => "import",
    }
  }

  /// Lowest verbosity at which the event is shown.
  pub fn tier(self) -> u8 {
    match self {
      EventKind::Fail => 0,
      EventKind::Target | EventKind::Retry | EventKind::Missing => 1,
      EventKind::Import => 2,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
  pub kind: EventKind,
  pub key: String,
  pub tier: u8,
}

impl Event {
  pub fn new(kind: EventKind, key: impl Into<String>) -> Self {
    Self {
      kind,
      key: key.into(),
      tier: kind.tier(),
    }
  }
}

pub trait Reporter: Send + Sync {
  fn report(&self, event: &Event);
}

/// Logs events through `tracing`, dropping those above the verbosity tier.
#[derive(Debug, Clone, Copy)]
pub struct TracingReporter {
  pub verbose: u8,
}

impl Default for TracingReporter {
  fn default() -> Self {
    Self { verbose: 1 }
  }
}

impl Reporter for TracingReporter {
  fn report(&self, event: &Event) {
    if event.tier > self.verbose {
      return;
    }
    let name = keys::display_name(&event.key);
    match event.kind {
      EventKind::Fail => error!(event = event.kind.as_str(), "fail {}", name),
      EventKind::Missing => warn!(event = event.kind.as_str(), "missing {}", name),
      EventKind::Retry => warn!(event = event.kind.as_str(), "retry {}", name),
      EventKind::Target => info!(event = event.kind.as_str(), "target {}", name),
      EventKind::Import => debug!(event = event.kind.as_str(), "import {}", name),
    }
  }
}

/// Keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingReporter {
  events: Mutex<Vec<Event>>,
}

impl RecordingReporter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<Event> {
    self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn count(&self, kind: EventKind) -> usize {
    self
      .events
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .iter()
      .filter(|e| e.kind == kind)
      .count()
  }

  pub fn events_for(&self, key: &str) -> Vec<EventKind> {
    self
      .events
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .iter()
      .filter(|e| e.key == key)
      .map(|e| e.kind)
      .collect()
  }
}

impl Reporter for RecordingReporter {
  fn report(&self, event: &Event) {
    self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
  }
}

pub trait TriggerDecision: Send + Sync {
  /// Whether `key` must be built. `false` short-circuits the build.
  fn should_build(&self, engine: &Engine, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysBuild;

impl TriggerDecision for AlwaysBuild {
  fn should_build(&self, _engine: &Engine, _key: &str) -> Result<bool, StoreError> {
    Ok(true)
  }
}

/// Rebuilds a target when any of these hold:
/// - no value is stored for it
/// - its last meta record carries an error
/// - a declared output file is missing
/// - a dependency was built earlier in the current run
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreTrigger;

impl TriggerDecision for StoreTrigger {
  fn should_build(&self, engine: &Engine, key: &str) -> Result<bool, StoreError> {
    let store = engine.store();
    if !store.exists(key, OBJECTS)? {
      return Ok(true);
    }
    if store::meta(store, key)?.is_some_and(|m| m.failed()) {
      return Ok(true);
    }
    if let Some(entry) = engine.layout().get(key) {
      for file in &entry.deps.file_out {
        match engine.codec().decode_path(file) {
          Ok(path) if Path::new(&path).exists() => {}
          _ => return Ok(true),
        }
      }
    }
    for dep in engine.graph().dependencies(key) {
      if engine.was_built(&dep) {
        return Ok(true);
      }
    }
    Ok(false)
  }
}

pub trait MemoryHook: Send + Sync {
  /// Called before `key` builds, with everything downstream of it.
  fn manage(&self, engine: &Engine, key: &str, downstream: &[String], jobs: usize) -> Result<(), StoreError>;
}

/// Applies the target's configured [`MemoryStrategy`].
///
/// Only plain target values are ever loaded or unloaded; imports and
/// anything bound by other means are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyMemory;

impl MemoryHook for StrategyMemory {
  fn manage(&self, engine: &Engine, key: &str, downstream: &[String], jobs: usize) -> Result<(), StoreError> {
    let Some(entry) = engine.layout().get(key) else {
      return Ok(());
    };
    let strategy = engine.config().memory_strategy_for(entry);
    let deps: HashSet<String> = target_values(engine, engine.graph().dependencies(key));

    let unload: Vec<String> = match strategy {
      MemoryStrategy::None => return Ok(()),
      MemoryStrategy::Speed | MemoryStrategy::Lookahead => Vec::new(),
      MemoryStrategy::Autoclean | MemoryStrategy::Preclean => {
        let mut keep = deps.clone();
        for node in downstream {
          keep.extend(target_values(engine, engine.graph().dependencies(node)));
        }
        bound_targets(engine).into_iter().filter(|k| !keep.contains(k)).collect()
      }
      MemoryStrategy::Unload => bound_targets(engine).into_iter().filter(|k| !deps.contains(k)).collect(),
    };

    if !unload.is_empty() {
      let removed = engine.env().unload(unload.iter().map(String::as_str));
      debug!(key = %key, ?strategy, removed, jobs, "unloaded target values");
    }

    let mut loaded = 0usize;
    for dep in &deps {
      if engine.env().contains(dep) {
        continue;
      }
      if let Some(value) = engine.store().get(dep, OBJECTS)? {
        engine.env().assign(dep.clone(), value);
        loaded += 1;
      }
    }
    if loaded > 0 {
      debug!(key = %key, loaded, "loaded dependency values");
    }
    Ok(())
  }
}

fn target_values(engine: &Engine, keys: Vec<String>) -> HashSet<String> {
  keys
    .into_iter()
    .filter(|k| KeyKind::of(k) == KeyKind::Plain && engine.layout().is_target(k))
    .collect()
}

fn bound_targets(engine: &Engine) -> Vec<String> {
  engine
    .env()
    .names()
    .into_iter()
    .filter(|k| engine.layout().is_target(k))
    .collect()
}

pub trait SymbolResolver: Send + Sync {
  fn resolve(&self, reference: &NamespacedRef) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
  fn resolve(&self, _reference: &NamespacedRef) -> Option<Value> {
    None
  }
}

/// Resolves references from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticSymbols {
  symbols: HashMap<NamespacedRef, Value>,
}

impl StaticSymbols {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, namespace: &str, symbol: &str, value: Value) -> Self {
    self.symbols.insert(NamespacedRef::new(namespace, symbol), value);
    self
  }
}

impl SymbolResolver for StaticSymbols {
  fn resolve(&self, reference: &NamespacedRef) -> Option<Value> {
    self.symbols.get(reference).cloned()
  }
}
