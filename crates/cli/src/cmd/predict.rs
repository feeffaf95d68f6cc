//! Implementation of the `cairn predict` command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use cairn_lib::{Engine, PredictOptions, predict_runtime};

use super::plan_dir;
use crate::output::{OutputFormat, format_duration, print_json, print_stat, print_success, symbols};
use crate::plan::PlanFile;

#[derive(Debug)]
pub struct PredictArgs {
  pub plan: PathBuf,
  pub jobs: Option<usize>,
  pub default_time: Option<Duration>,
  pub targets: Vec<String>,
  pub output: OutputFormat,
}

/// Predict the runtime of building the plan from scratch. Durations come
/// from the plan's `times`, falling back to the default time.
pub fn cmd_predict(args: PredictArgs) -> Result<()> {
  let plan = PlanFile::load(&args.plan)?;
  let config = plan.config();
  let jobs = args.jobs.unwrap_or(config.jobs).max(1);

  let engine = Engine::new(plan.layout(plan_dir(&args.plan)), config)
    .with_context(|| format!("Invalid plan: {}", args.plan.display()))?;

  let opts = PredictOptions {
    jobs,
    targets: (!args.targets.is_empty()).then_some(args.targets),
    from_scratch: true,
    known_times: plan.known_times(),
    default_time: args.default_time.unwrap_or_default(),
  };
  let schedule = predict_runtime(&engine, &opts).context("Prediction failed")?;
  let sequences = schedule.sequences();

  if args.output.is_json() {
    print_json(&json!({
      "total_secs": schedule.total.as_secs_f64(),
      "jobs": jobs,
      "workers": sequences.values().collect::<Vec<_>>(),
      "untimed": schedule.untimed,
    }))?;
    return Ok(());
  }

  print_success(&format!("Predicted runtime: {}", format_duration(schedule.total)));
  print_stat("Workers", &jobs.to_string());
  print_stat("Targets", &schedule.assignments.len().to_string());
  if !schedule.untimed.is_empty() {
    print_stat("Without known time", &schedule.untimed.join(", "));
  }
  println!();
  for (worker, keys) in &sequences {
    println!("  worker {}: {}", worker + 1, keys.join(&format!(" {} ", symbols::ARROW)));
  }
  Ok(())
}
