//! The state one run shares between all of its builds.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RunConfig;
use crate::env::SharedEnv;
use crate::graph::{DepGraph, GraphError};
use crate::hooks::{
  Event, EventKind, MemoryHook, NoSymbols, Reporter, StoreTrigger, StrategyMemory, SymbolResolver, TracingReporter,
  TriggerDecision,
};
use crate::keys::KeyCodec;
use crate::layout::Layout;
use crate::store::{MemoryStore, Store};

pub struct Engine {
  layout: Arc<Layout>,
  graph: Arc<DepGraph>,
  config: RunConfig,
  store: Arc<dyn Store>,
  env: Arc<SharedEnv>,
  codec: KeyCodec,
  trigger: Arc<dyn TriggerDecision>,
  memory: Arc<dyn MemoryHook>,
  reporter: Arc<dyn Reporter>,
  resolver: Arc<dyn SymbolResolver>,
  running: AtomicBool,
  built: Mutex<HashSet<String>>,
}

impl Engine {
  /// An engine over `layout` with an in-memory store, an empty shared
  /// context and the default hooks.
  pub fn new(layout: Layout, config: RunConfig) -> Result<Self, GraphError> {
    let graph = DepGraph::from_layout(&layout)?;
    let reporter = TracingReporter { verbose: config.verbose };
    Ok(Self {
      layout: Arc::new(layout),
      graph: Arc::new(graph),
      config,
      store: Arc::new(MemoryStore::new()),
      env: Arc::new(SharedEnv::new()),
      codec: KeyCodec::cached(),
      trigger: Arc::new(StoreTrigger),
      memory: Arc::new(StrategyMemory),
      reporter: Arc::new(reporter),
      resolver: Arc::new(NoSymbols),
      running: AtomicBool::new(false),
      built: Mutex::new(HashSet::new()),
    })
  }

  pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
    self.store = store;
    self
  }

  pub fn with_env(mut self, env: Arc<SharedEnv>) -> Self {
    self.env = env;
    self
  }

  pub fn with_trigger(mut self, trigger: Arc<dyn TriggerDecision>) -> Self {
    self.trigger = trigger;
    self
  }

  pub fn with_memory(mut self, memory: Arc<dyn MemoryHook>) -> Self {
    self.memory = memory;
    self
  }

  pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
    self.reporter = reporter;
    self
  }

  pub fn with_resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
    self.resolver = resolver;
    self
  }

  pub fn layout(&self) -> &Layout {
    &self.layout
  }

  pub fn graph(&self) -> &DepGraph {
    &self.graph
  }

  pub fn config(&self) -> &RunConfig {
    &self.config
  }

  pub fn store(&self) -> &dyn Store {
    self.store.as_ref()
  }

  pub fn env(&self) -> &SharedEnv {
    &self.env
  }

  pub fn codec(&self) -> &KeyCodec {
    &self.codec
  }

  pub fn trigger(&self) -> &dyn TriggerDecision {
    self.trigger.as_ref()
  }

  pub fn memory(&self) -> &dyn MemoryHook {
    self.memory.as_ref()
  }

  pub fn resolver(&self) -> &dyn SymbolResolver {
    self.resolver.as_ref()
  }

  pub fn report(&self, kind: EventKind, key: &str) {
    self.reporter.report(&Event::new(kind, key));
  }

  /// Whether an overarching run is active.
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Starting a run forgets which targets the previous one built.
  pub fn set_running(&self, running: bool) {
    if running {
      self.built_keys().clear();
    }
    self.running.store(running, Ordering::SeqCst);
  }

  pub fn mark_built(&self, key: &str) {
    self.built_keys().insert(key.to_string());
  }

  /// Whether `key` was built, not skipped, since the current run started.
  pub fn was_built(&self, key: &str) -> bool {
    self.built_keys().contains(key)
  }

  fn built_keys(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
    self.built.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Progress is only recorded during a run with progress logging on.
  pub fn logs_progress(&self) -> bool {
    self.config.log_progress && self.is_running()
  }
}

impl fmt::Debug for Engine {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Engine")
      .field("targets", &self.layout.targets().len())
      .field("nodes", &self.graph.len())
      .field("config", &self.config)
      .field("running", &self.is_running())
      .finish()
  }
}
