//! Implementation of the `cairn make` command.
//!
//! Loads a plan file, builds its outdated targets through the engine with an
//! in-memory store and prints a summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::debug;

use cairn_lib::config::PoolKind;
use cairn_lib::pool::Pool;
use cairn_lib::{Engine, make};

use super::plan_dir;
use crate::output::{ConsoleReporter, OutputFormat, format_duration, print_json, print_stat, print_success, print_warning};
use crate::plan::PlanFile;

#[derive(Debug)]
pub struct MakeArgs {
  pub plan: PathBuf,
  pub jobs: Option<usize>,
  pub keep_going: bool,
  pub retries: Option<u32>,
  pub pool: Option<PoolKind>,
  pub verbose: bool,
  pub output: OutputFormat,
}

pub fn cmd_make(args: MakeArgs) -> Result<()> {
  let start = Instant::now();
  let plan = PlanFile::load(&args.plan)?;

  let mut config = plan.config();
  if let Some(jobs) = args.jobs {
    config.jobs = jobs.max(1);
  }
  if args.keep_going {
    config.keep_going = true;
  }
  if let Some(retries) = args.retries {
    config.retries = retries;
  }
  if let Some(pool) = args.pool {
    config.pool = pool;
  }
  if args.verbose {
    config.verbose = config.verbose.max(2);
  }
  debug!(?config, "run configuration");

  let reporter = ConsoleReporter { verbose: config.verbose };
  let engine = Engine::new(plan.layout(plan_dir(&args.plan)), config)
    .with_context(|| format!("Invalid plan: {}", args.plan.display()))?
    .with_reporter(Arc::new(reporter));
  let engine = Arc::new(engine);

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt
    .block_on(async {
      let pool = Pool::from_config(engine.config());
      let result = make(&engine, &pool).await;
      pool.shutdown().await;
      result
    })
    .context("Build failed")?;

  if args.output.is_json() {
    print_json(&json!({
      "built": report.built,
      "skipped": report.skipped,
      "failed": report.failed,
      "blocked": report.blocked,
      "imports": { "resolved": report.imports.resolved, "missing": report.imports.missing },
      "duration_ms": start.elapsed().as_millis() as u64,
    }))?;
  } else {
    println!();
    if report.succeeded() {
      print_success("Build complete!");
    } else {
      print_warning("Build finished with failures");
    }
    print_stat("Built", &report.built.len().to_string());
    print_stat("Up to date", &report.skipped.len().to_string());
    print_stat("Imports", &report.imports.len().to_string());
    if !report.imports.missing.is_empty() {
      print_stat("Missing imports", &report.imports.missing.len().to_string());
    }
    if !report.failed.is_empty() {
      print_stat("Failed", &report.failed.join(", "));
    }
    if !report.blocked.is_empty() {
      print_stat("Blocked", &report.blocked.join(", "));
    }
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  if !report.succeeded() {
    bail!(
      "{} target(s) failed, {} blocked",
      report.failed.len(),
      report.blocked.len()
    );
  }
  Ok(())
}
