//! Shared execution context.
//!
//! Built values may be bound here so that in-process consumers read them
//! directly. While a command runs under the mutation guard the context is
//! read-only: [`EnvView::bind`] and [`EnvView::unbind`] fail with
//! [`EnvError::Locked`] instead of silently changing shared state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
  #[error("cannot modify {name:?}: the shared context is locked while a command runs")]
  Locked { name: String },
}

#[derive(Debug, Default)]
struct EnvState {
  bindings: HashMap<String, Value>,
  locked: bool,
}

#[derive(Debug, Default)]
pub struct SharedEnv {
  state: Mutex<EnvState>,
}

impl SharedEnv {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_bindings<K: Into<String>>(bindings: impl IntoIterator<Item = (K, Value)>) -> Self {
    let env = Self::new();
    for (name, value) in bindings {
      env.assign(name, value);
    }
    env
  }

  pub fn get(&self, name: &str) -> Option<Value> {
    self.state().bindings.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.state().bindings.contains_key(name)
  }

  /// Bound names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.state().bindings.keys().cloned().collect();
    names.sort();
    names
  }

  /// Bind a value on behalf of the scheduler. Not subject to the guard.
  pub fn assign(&self, name: impl Into<String>, value: Value) {
    self.state().bindings.insert(name.into(), value);
  }

  /// Drop bindings on behalf of the scheduler. Returns how many were removed.
  pub fn unload<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> usize {
    let mut state = self.state();
    names.into_iter().filter(|n| state.bindings.remove(*n).is_some()).count()
  }

  pub fn is_locked(&self) -> bool {
    self.state().locked
  }

  /// Take the guard if nobody holds it.
  pub fn try_lock(&self) -> Option<EnvGuard<'_>> {
    let mut state = self.state();
    if state.locked {
      return None;
    }
    state.locked = true;
    Some(EnvGuard { env: self })
  }

  /// Wait until the context is unlocked, then take the guard.
  ///
  /// Polls with a doubling sleep between attempts.
  pub async fn lock(&self) -> EnvGuard<'_> {
    let mut backoff = INITIAL_BACKOFF;
    let mut waits = 0u32;
    loop {
      if let Some(guard) = self.try_lock() {
        if waits > 0 {
          debug!(waits, "acquired shared context after contention");
        }
        return guard;
      }
      waits += 1;
      tokio::time::sleep(backoff).await;
      backoff = (backoff * 2).min(MAX_BACKOFF);
    }
  }

  /// A view for commands, subject to the guard.
  pub fn view(&self) -> EnvView<'_> {
    EnvView { env: self }
  }

  fn state(&self) -> std::sync::MutexGuard<'_, EnvState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Holds the shared context read-only until dropped.
#[derive(Debug)]
pub struct EnvGuard<'a> {
  env: &'a SharedEnv,
}

// Only the holder releases.
impl Drop for EnvGuard<'_> {
  fn drop(&mut self) {
    self.env.state().locked = false;
  }
}

/// What a running command sees of the shared context.
#[derive(Debug, Clone, Copy)]
pub struct EnvView<'a> {
  env: &'a SharedEnv,
}

impl EnvView<'_> {
  pub fn get(&self, name: &str) -> Option<Value> {
    self.env.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.env.contains(name)
  }

  pub fn bind(&self, name: &str, value: Value) -> Result<(), EnvError> {
    let mut state = self.env.state();
    if state.locked {
      return Err(EnvError::Locked { name: name.to_string() });
    }
    state.bindings.insert(name.to_string(), value);
    Ok(())
  }

  pub fn unbind(&self, name: &str) -> Result<Option<Value>, EnvError> {
    let mut state = self.env.state();
    if state.locked {
      return Err(EnvError::Locked { name: name.to_string() });
    }
    Ok(state.bindings.remove(name))
  }
}
