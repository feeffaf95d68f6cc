//! Cache collaborator.
//!
//! The engine only needs keyed, namespaced get/set. [`MemoryStore`] is the
//! in-process implementation; persistent backends plug in through [`Store`].

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::build::Meta;

/// Namespace of built values.
pub const OBJECTS: &str = "objects";

/// Namespace of meta records.
pub const META: &str = "meta";

/// Namespace of per-target progress.
pub const PROGRESS: &str = "progress";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to serialize {key} in {namespace}: {source}")]
  Serialize {
    key: String,
    namespace: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("backend error: {0}")]
  Backend(String),
}

pub trait Store: Send + Sync {
  /// Write `value` under `key` in `namespace`. With `use_cache` false the
  /// write bypasses any in-memory result cache in front of the backend.
  fn set(&self, key: &str, value: Value, namespace: &str, use_cache: bool) -> Result<(), StoreError>;

  fn get(&self, key: &str, namespace: &str) -> Result<Option<Value>, StoreError>;

  fn exists(&self, key: &str, namespace: &str) -> Result<bool, StoreError> {
    Ok(self.get(key, namespace)?.is_some())
  }
}

/// Store held entirely in memory.
///
/// Reads of the objects namespace go through a memo that writes with
/// `use_cache` false evict.
#[derive(Debug, Default)]
pub struct MemoryStore {
  backend: RwLock<HashMap<(String, String), Value>>,
  memo: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Keys present in `namespace`, sorted.
  pub fn keys(&self, namespace: &str) -> Vec<String> {
    let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
    let mut keys: Vec<String> = backend
      .keys()
      .filter(|(ns, _)| ns == namespace)
      .map(|(_, key)| key.clone())
      .collect();
    keys.sort();
    keys
  }

  pub fn is_memoized(&self, key: &str) -> bool {
    self.memo.read().unwrap_or_else(|e| e.into_inner()).contains_key(key)
  }
}

impl Store for MemoryStore {
  fn set(&self, key: &str, value: Value, namespace: &str, use_cache: bool) -> Result<(), StoreError> {
    if namespace == OBJECTS {
      let mut memo = self.memo.write().unwrap_or_else(|e| e.into_inner());
      if use_cache {
        memo.insert(key.to_string(), value.clone());
      } else {
        memo.remove(key);
      }
    }
    self
      .backend
      .write()
      .unwrap_or_else(|e| e.into_inner())
      .insert((namespace.to_string(), key.to_string()), value);
    Ok(())
  }

  fn get(&self, key: &str, namespace: &str) -> Result<Option<Value>, StoreError> {
    if namespace == OBJECTS
      && let Some(hit) = self.memo.read().unwrap_or_else(|e| e.into_inner()).get(key)
    {
      return Ok(Some(hit.clone()));
    }
    let backend = self.backend.read().unwrap_or_else(|e| e.into_inner());
    Ok(backend.get(&(namespace.to_string(), key.to_string())).cloned())
  }
}

/// Build progress of one target during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
  Running,
  Failed,
  Done,
}

pub fn set_progress(store: &dyn Store, key: &str, progress: Progress) -> Result<(), StoreError> {
  let value = serde_json::to_value(progress).map_err(|source| StoreError::Serialize {
    key: key.to_string(),
    namespace: PROGRESS.to_string(),
    source,
  })?;
  store.set(key, value, PROGRESS, false)
}

pub fn progress(store: &dyn Store, key: &str) -> Result<Option<Progress>, StoreError> {
  Ok(
    store
      .get(key, PROGRESS)?
      .and_then(|v| serde_json::from_value(v).ok()),
  )
}

pub fn set_meta(store: &dyn Store, meta: &Meta) -> Result<(), StoreError> {
  let value = serde_json::to_value(meta).map_err(|source| StoreError::Serialize {
    key: meta.key.clone(),
    namespace: META.to_string(),
    source,
  })?;
  store.set(&meta.key, value, META, false)
}

/// The last meta record stored for `key`, if it can be read back.
pub fn meta(store: &dyn Store, key: &str) -> Result<Option<Meta>, StoreError> {
  Ok(store.get(key, META)?.and_then(|v| serde_json::from_value(v).ok()))
}

/// Recorded command times of previous builds.
///
/// Keys with no meta record, or whose record carries no timing, are absent.
pub fn build_times<'a>(
  store: &dyn Store,
  keys: impl IntoIterator<Item = &'a str>,
) -> Result<HashMap<String, Duration>, StoreError> {
  let mut times = HashMap::new();
  for key in keys {
    if let Some(time) = meta(store, key)?.and_then(|m| m.time_command) {
      times.insert(key.to_string(), time);
    }
  }
  Ok(times)
}
