//! Resolving imports.
//!
//! Imports are the graph nodes that are not targets: files, plain names bound
//! in the shared context, and namespaced references. They are processed leaf
//! batch by leaf batch over the import-only subgraph, so an import is never
//! resolved before the imports it depends on. A batch must finish completely
//! before the next one starts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::build::execute::persist;
use crate::build::{BuildError, Meta};
use crate::engine::Engine;
use crate::hooks::EventKind;
use crate::keys::{KeyKind, is_url};
use crate::pool::WorkerPool;

/// Stored for a file import that exists. Files are never read.
pub const FILE_SENTINEL: &str = "cairn:file";

/// Stored for an import that could not be resolved.
pub const MISSING_SENTINEL: &str = "cairn:missing";

const URL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
  pub resolved: Vec<String>,
  pub missing: Vec<String>,
  /// Number of leaf batches processed.
  pub batches: usize,
}

impl ImportReport {
  pub fn len(&self) -> usize {
    self.resolved.len() + self.missing.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

pub fn is_missing(value: &Value) -> bool {
  value.as_str() == Some(MISSING_SENTINEL)
}

/// Resolve every import of the engine's graph.
pub async fn process_imports<P: WorkerPool>(engine: &Arc<Engine>, pool: &P) -> Result<ImportReport, BuildError> {
  let imports: Vec<String> = engine
    .graph()
    .keys()
    .into_iter()
    .filter(|k| engine.layout().is_import(k))
    .collect();
  let mut graph = engine.graph().subgraph(imports.iter().map(String::as_str));
  let mut report = ImportReport::default();

  info!(imports = imports.len(), workers = pool.workers(), "processing imports");

  while !graph.is_empty() {
    let leaves = graph.leaves();
    debug!(batch = report.batches, leaves = leaves.len(), "processing import batch");

    let engine = engine.clone();
    let results = pool
      .run_batch(leaves.clone(), move |key| {
        let engine = engine.clone();
        async move {
          let present = resolve_import(&engine, &key).await?;
          Ok::<_, BuildError>((key, present))
        }
      })
      .await?;

    for result in results {
      let (key, present) = result?;
      if present {
        report.resolved.push(key);
      } else {
        report.missing.push(key);
      }
    }

    graph.remove(leaves.iter().map(String::as_str));
    report.batches += 1;
  }

  report.resolved.sort();
  report.missing.sort();
  Ok(report)
}

/// Resolve one import and store its value. Returns whether it was found.
///
/// A failed lookup is reported as missing, never raised. Only store
/// failures are errors.
pub async fn resolve_import(engine: &Engine, key: &str) -> Result<bool, BuildError> {
  let value = lookup(engine, key).await;
  let present = !is_missing(&value);

  if present {
    engine.report(EventKind::Import, key);
  } else {
    engine.report(EventKind::Missing, key);
  }

  persist(engine, key, value, &Meta::import(key))?;
  Ok(present)
}

async fn lookup(engine: &Engine, key: &str) -> Value {
  let missing = Value::String(MISSING_SENTINEL.to_string());
  match KeyKind::of(key) {
    KeyKind::Path => {
      let Ok(path) = engine.codec().decode_path(key) else {
        return missing;
      };
      let exists = if is_url(&path) {
        url_reachable(&path).await
      } else {
        Path::new(&path).exists()
      };
      if exists {
        Value::String(FILE_SENTINEL.to_string())
      } else {
        missing
      }
    }
    KeyKind::Namespaced => {
      let Ok(reference) = engine.codec().decode_reference(key) else {
        return missing;
      };
      engine
        .env()
        .get(&reference.to_string())
        .or_else(|| engine.resolver().resolve(&reference))
        .unwrap_or(missing)
    }
    KeyKind::Plain => engine.env().get(key).unwrap_or(missing),
  }
}

async fn url_reachable(url: &str) -> bool {
  let client = match reqwest::Client::builder().timeout(URL_TIMEOUT).build() {
    Ok(client) => client,
    Err(e) => {
      debug!(url = %url, error = %e, "failed to build http client");
      return false;
    }
  };
  match client.head(url).send().await {
    Ok(response) => response.status().is_success(),
    Err(e) => {
      debug!(url = %url, error = %e, "url not reachable");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::command::from_fn;
  use crate::config::RunConfig;
  use crate::hooks::{RecordingReporter, StaticSymbols};
  use crate::keys::{encode_namespaced, encode_path};
  use crate::layout::{Layout, LayoutEntry};
  use crate::pool::LocalPool;
  use crate::store::{META, OBJECTS, progress};
  use serde_json::json;

  fn setup(layout: Layout, jobs: usize) -> (Arc<Engine>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let engine = Engine::new(layout, RunConfig { jobs, ..RunConfig::default() })
      .unwrap()
      .with_reporter(reporter.clone())
      .with_resolver(Arc::new(StaticSymbols::new().with("stats", "median", json!("median-fn"))));
    (Arc::new(engine), reporter)
  }

  #[tokio::test]
  async fn every_kind_of_import_is_classified() {
    let dir = tempfile::TempDir::new().unwrap();
    let present = dir.path().join("present.csv");
    std::fs::write(&present, "a,b").unwrap();
    let absent = dir.path().join("absent.csv");

    let layout = Layout::from_entries([LayoutEntry::target("report", from_fn(|_| Ok(Value::Null)))
      .depends_on("bound")
      .depends_on("unbound")
      .depends_on("stats::median")
      .depends_on("stats::mean")
      .file_in(&present.to_string_lossy())
      .file_in(&absent.to_string_lossy())]);
    let (engine, reporter) = setup(layout, 2);
    engine.env().assign("bound", json!([1, 2, 3]));
    engine.set_running(true);

    let report = process_imports(&engine, &LocalPool::new(2)).await.unwrap();

    let mut resolved = vec![
      "bound".to_string(),
      encode_namespaced("stats::median"),
      encode_path(&present.to_string_lossy()),
    ];
    resolved.sort();
    let mut missing = vec![
      "unbound".to_string(),
      encode_namespaced("stats::mean"),
      encode_path(&absent.to_string_lossy()),
    ];
    missing.sort();
    assert_eq!(report.resolved, resolved);
    assert_eq!(report.missing, missing);
    assert_eq!(report.batches, 1);

    assert_eq!(reporter.count(EventKind::Import), 3);
    assert_eq!(reporter.count(EventKind::Missing), 3);
    assert_eq!(reporter.count(EventKind::Target), 0);

    let store = engine.store();
    assert_eq!(store.get("bound", OBJECTS).unwrap(), Some(json!([1, 2, 3])));
    assert_eq!(
      store.get(&encode_namespaced("stats::median"), OBJECTS).unwrap(),
      Some(json!("median-fn"))
    );
    assert_eq!(
      store.get(&encode_path(&present.to_string_lossy()), OBJECTS).unwrap(),
      Some(json!(FILE_SENTINEL))
    );
    assert!(is_missing(&store.get("unbound", OBJECTS).unwrap().unwrap()));

    let meta = crate::store::meta(store, "bound").unwrap().unwrap();
    assert!(meta.imported);
    assert!(store.exists("unbound", META).unwrap());
    // Imports never carry progress.
    assert_eq!(progress(store, "bound").unwrap(), None);
  }

  #[tokio::test]
  async fn dependent_imports_wait_for_earlier_batches() {
    // base -> mid -> top, all imports; plus a target so the graph has one.
    let layout = Layout::from_entries([
      LayoutEntry::import("mid").depends_on("base"),
      LayoutEntry::import("top").depends_on("mid"),
      LayoutEntry::target("t", from_fn(|_| Ok(Value::Null))).depends_on("top"),
    ]);
    let (engine, reporter) = setup(layout, 4);
    for key in ["base", "mid", "top"] {
      engine.env().assign(key, json!(key));
    }

    let report = process_imports(&engine, &LocalPool::new(4)).await.unwrap();
    assert_eq!(report.batches, 3);
    assert_eq!(report.resolved, vec!["base", "mid", "top"]);

    let order: Vec<String> = reporter.events().into_iter().map(|e| e.key).collect();
    assert_eq!(order, vec!["base", "mid", "top"]);
  }

  #[tokio::test]
  async fn results_do_not_depend_on_worker_count() {
    let layout = || {
      Layout::from_entries([LayoutEntry::target("t", from_fn(|_| Ok(Value::Null)))
        .depends_on("a")
        .depends_on("b")
        .depends_on("c")
        .depends_on("d")])
    };

    let (serial, _) = setup(layout(), 1);
    let (parallel, _) = setup(layout(), 4);
    for engine in [&serial, &parallel] {
      engine.env().assign("a", json!(1));
      engine.env().assign("c", json!(3));
    }

    let one = process_imports(&serial, &LocalPool::new(1)).await.unwrap();
    let four = process_imports(&parallel, &LocalPool::new(4)).await.unwrap();
    assert_eq!(one, four);
    assert_eq!(one.len(), 4);
  }

  #[tokio::test]
  async fn no_imports_is_a_no_op() {
    let layout = Layout::from_entries([LayoutEntry::target("t", from_fn(|_| Ok(Value::Null)))]);
    let (engine, reporter) = setup(layout, 1);
    let report = process_imports(&engine, &LocalPool::new(1)).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(report.batches, 0);
    assert!(reporter.events().is_empty());
  }
}
