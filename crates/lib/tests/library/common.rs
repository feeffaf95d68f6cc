use std::sync::Arc;

use cairn_lib::command::{Command, CommandError, from_fn};
use cairn_lib::config::RunConfig;
use cairn_lib::hooks::{AlwaysBuild, RecordingReporter};
use cairn_lib::{Engine, Layout, LayoutEntry};
use serde_json::Value;

/// An engine that always builds and records its events, inside an active run.
pub fn recording_engine(entries: Vec<LayoutEntry>, config: RunConfig) -> (Arc<Engine>, Arc<RecordingReporter>) {
  let reporter = Arc::new(RecordingReporter::new());
  let engine = Engine::new(Layout::from_entries(entries), config)
    .unwrap()
    .with_trigger(Arc::new(AlwaysBuild))
    .with_reporter(reporter.clone());
  engine.set_running(true);
  (Arc::new(engine), reporter)
}

pub fn keep_going() -> RunConfig {
  RunConfig {
    keep_going: true,
    ..RunConfig::default()
  }
}

pub fn always_fails(message: &'static str) -> Arc<dyn Command> {
  from_fn(move |_| Err(CommandError::msg(message)))
}

pub fn constant(value: Value) -> Arc<dyn Command> {
  from_fn(move |_| Ok(value.clone()))
}
