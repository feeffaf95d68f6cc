use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::graph::GraphError;
use crate::keys::{KeyError, is_path_key};
use crate::pool::PoolError;
use crate::store::StoreError;

/// What stopped a build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
  /// The command itself returned an error.
  Command,
  /// The cpu or elapsed budget ran out.
  Timeout,
}

/// An error captured from a build attempt. Plain data, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
  pub kind: ErrorKind,
  pub message: String,
}

impl CapturedError {
  pub fn command(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Command,
      message: message.into(),
    }
  }

  pub fn timeout(message: impl Into<String>) -> Self {
    Self {
      kind: ErrorKind::Timeout,
      message: message.into(),
    }
  }
}

/// Metadata of one build attempt.
///
/// A fresh record is derived for every attempt; only the last one of a build
/// is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
  pub key: String,
  pub seed: u64,
  /// The key is an import rather than a buildable target.
  #[serde(default)]
  pub imported: bool,
  #[serde(default)]
  pub is_file: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time_command: Option<Duration>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub warnings: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub messages: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<CapturedError>,
}

impl Meta {
  pub fn new(key: impl Into<String>, seed: u64) -> Self {
    let key = key.into();
    Self {
      is_file: is_path_key(&key),
      key,
      seed,
      imported: false,
      time_command: None,
      warnings: Vec::new(),
      messages: Vec::new(),
      error: None,
    }
  }

  /// The minimal record stored for an import.
  pub fn import(key: impl Into<String>) -> Self {
    Self {
      imported: true,
      ..Self::new(key, 0)
    }
  }

  pub fn failed(&self) -> bool {
    self.error.is_some()
  }
}

/// Output of one attempt: the produced value, if any, and its meta record.
#[derive(Debug, Clone)]
pub struct BuildResult {
  pub key: String,
  pub value: Option<Value>,
  pub meta: Meta,
}

/// How a target's build ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
  /// The trigger found the target up to date.
  Skipped,
  Built,
  /// Failed with keep-going enabled; the run continues.
  Failed,
}

/// Fatal, run-level errors.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("target {key} failed: {message}")]
  TargetFailed { key: String, message: String },

  #[error("unknown target: {0}")]
  UnknownTarget(String),

  #[error("{0} has no command")]
  NoCommand(String),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("graph error: {0}")]
  Graph(#[from] GraphError),

  #[error("key error: {0}")]
  Key(#[from] KeyError),

  #[error("worker pool error: {0}")]
  Pool(#[from] PoolError),
}
