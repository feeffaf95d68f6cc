//! Static per-target metadata.
//!
//! A [`Layout`] is built once per run and read-only afterwards. Keys that have
//! an entry with a command are targets; every other key in the graph is an
//! import.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::command::Command;
use crate::config::{Limit, MemoryStrategy};
use crate::keys::{self, KeyKind};

/// Build-time dependencies of a target, split by role. All values are keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildDeps {
  /// Plain in-memory results the command reads.
  pub globals: Vec<String>,
  /// Namespaced external references.
  pub namespaced: Vec<String>,
  /// Files read by the command.
  pub file_in: Vec<String>,
  /// Files the command must produce.
  pub file_out: Vec<String>,
}

impl BuildDeps {
  /// Keys that must be resolved before the target can build.
  pub fn all(&self) -> impl Iterator<Item = &str> {
    self
      .globals
      .iter()
      .chain(&self.namespaced)
      .chain(&self.file_in)
      .map(String::as_str)
  }
}

#[derive(Clone)]
pub struct LayoutEntry {
  pub key: String,
  pub command: Option<Arc<dyn Command>>,
  pub deps: BuildDeps,
  pub retries: Option<u32>,
  pub elapsed: Option<Limit>,
  pub cpu: Option<Limit>,
  pub seed: Option<u64>,
  pub memory_strategy: Option<MemoryStrategy>,
}

impl LayoutEntry {
  pub fn target(key: impl Into<String>, command: Arc<dyn Command>) -> Self {
    Self {
      command: Some(command),
      ..Self::import(key)
    }
  }

  pub fn import(key: impl Into<String>) -> Self {
    Self {
      key: key.into(),
      command: None,
      deps: BuildDeps::default(),
      retries: None,
      elapsed: None,
      cpu: None,
      seed: None,
      memory_strategy: None,
    }
  }

  pub fn is_imported(&self) -> bool {
    self.command.is_none()
  }

  /// Depend on a named result or a `namespace::symbol` reference.
  pub fn depends_on(mut self, name: &str) -> Self {
    let key = keys::standardize(name);
    match KeyKind::of(&key) {
      KeyKind::Namespaced => self.deps.namespaced.push(key),
      KeyKind::Path => self.deps.file_in.push(key),
      KeyKind::Plain => self.deps.globals.push(key),
    }
    self
  }

  pub fn file_in(mut self, path: &str) -> Self {
    self.deps.file_in.push(keys::encode_path(path));
    self
  }

  pub fn file_out(mut self, path: &str) -> Self {
    self.deps.file_out.push(keys::encode_path(path));
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = Some(retries);
    self
  }

  pub fn with_elapsed(mut self, limit: Limit) -> Self {
    self.elapsed = Some(limit);
    self
  }

  pub fn with_cpu(mut self, limit: Limit) -> Self {
    self.cpu = Some(limit);
    self
  }

  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }

  pub fn with_memory_strategy(mut self, strategy: MemoryStrategy) -> Self {
    self.memory_strategy = Some(strategy);
    self
  }
}

impl fmt::Debug for LayoutEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LayoutEntry")
      .field("key", &self.key)
      .field("has_command", &self.command.is_some())
      .field("deps", &self.deps)
      .field("retries", &self.retries)
      .field("elapsed", &self.elapsed)
      .field("cpu", &self.cpu)
      .field("seed", &self.seed)
      .field("memory_strategy", &self.memory_strategy)
      .finish()
  }
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
  entries: BTreeMap<String, LayoutEntry>,
  producers: HashMap<String, String>,
}

impl Layout {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_entries(entries: impl IntoIterator<Item = LayoutEntry>) -> Self {
    let mut layout = Self::new();
    for entry in entries {
      layout.insert(entry);
    }
    layout
  }

  pub fn insert(&mut self, entry: LayoutEntry) {
    for file in &entry.deps.file_out {
      self.producers.insert(file.clone(), entry.key.clone());
    }
    self.entries.insert(entry.key.clone(), entry);
  }

  pub fn get(&self, key: &str) -> Option<&LayoutEntry> {
    self.entries.get(key)
  }

  pub fn entries(&self) -> impl Iterator<Item = &LayoutEntry> {
    self.entries.values()
  }

  /// Keys of entries that have a command, sorted.
  pub fn targets(&self) -> Vec<String> {
    self
      .entries
      .values()
      .filter(|e| !e.is_imported())
      .map(|e| e.key.clone())
      .collect()
  }

  pub fn is_target(&self, key: &str) -> bool {
    self.entries.get(key).is_some_and(|e| !e.is_imported())
  }

  pub fn is_import(&self, key: &str) -> bool {
    !self.is_target(key)
  }

  /// The target that declares `file_key` as one of its outputs.
  pub fn producer_of(&self, file_key: &str) -> Option<&str> {
    self.producers.get(file_key).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::command::from_fn;
  use serde_json::Value;

  fn noop() -> Arc<dyn Command> {
    from_fn(|_| Ok(Value::Null))
  }

  #[test]
  fn depends_on_sorts_by_role() {
    let entry = LayoutEntry::target("report", noop())
      .depends_on("data")
      .depends_on("stats::median")
      .file_in("raw.csv")
      .file_out("report.html");

    assert_eq!(entry.deps.globals, vec!["data"]);
    assert_eq!(entry.deps.namespaced, vec![keys::encode_namespaced("stats::median")]);
    assert_eq!(entry.deps.file_in, vec![keys::encode_path("raw.csv")]);
    assert_eq!(entry.deps.file_out, vec![keys::encode_path("report.html")]);
    assert_eq!(entry.deps.all().count(), 3);
  }

  #[test]
  fn targets_and_imports() {
    let layout = Layout::from_entries([
      LayoutEntry::target("b", noop()),
      LayoutEntry::target("a", noop()),
      LayoutEntry::import("raw"),
    ]);

    assert_eq!(layout.targets(), vec!["a", "b"]);
    assert!(layout.is_target("a"));
    assert!(layout.is_import("raw"));
    assert!(layout.is_import("not-in-layout"));
  }

  #[test]
  fn producers_are_indexed() {
    let layout = Layout::from_entries([LayoutEntry::target("plot", noop()).file_out("plot.png")]);
    assert_eq!(layout.producer_of(&keys::encode_path("plot.png")), Some("plot"));
    assert_eq!(layout.producer_of(&keys::encode_path("other.png")), None);
  }
}
