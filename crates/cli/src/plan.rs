//! JSON plan files.
//!
//! A plan lists targets as shell commands with their dependencies, an
//! optional run configuration and optional known durations used by
//! `cairn predict`:
//!
//! ```json
//! {
//!   "config": { "jobs": 2, "retries": 1 },
//!   "targets": [
//!     { "name": "data", "command": "curl -s https://example.com/data.csv > data.csv", "file_out": ["data.csv"] },
//!     { "name": "summary", "command": "wc -l < data.csv", "file_in": ["data.csv"], "elapsed": 30 }
//!   ],
//!   "times": { "data": 12.5 }
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use cairn_lib::command::{Command, ShellCommand};
use cairn_lib::config::{Limit, RunConfig};
use cairn_lib::{Layout, LayoutEntry};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
  pub config: Option<RunConfig>,
  #[serde(default)]
  pub targets: Vec<PlanTarget>,
  /// Known command durations in seconds.
  #[serde(default)]
  pub times: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanTarget {
  pub name: String,
  pub command: String,
  /// Shell to run `command` with, instead of the platform default.
  pub shell: Option<String>,
  /// Extra environment variables for the command.
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  #[serde(default)]
  pub deps: Vec<String>,
  #[serde(default)]
  pub file_in: Vec<String>,
  #[serde(default)]
  pub file_out: Vec<String>,
  pub retries: Option<u32>,
  /// Seconds; `null` lifts a global limit.
  #[serde(default, deserialize_with = "limit_override")]
  pub elapsed: Option<Limit>,
  #[serde(default, deserialize_with = "limit_override")]
  pub cpu: Option<Limit>,
  pub seed: Option<u64>,
}

// A present `null` is an explicit Unlimited override; an absent field is no override.
fn limit_override<'de, D>(deserializer: D) -> Result<Option<Limit>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Limit::deserialize(deserializer).map(Some)
}

impl PlanFile {
  pub fn load(path: &Path) -> Result<Self> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    let plan: PlanFile =
      serde_json::from_str(&text).with_context(|| format!("Failed to parse plan file: {}", path.display()))?;
    plan.validate()?;
    Ok(plan)
  }

  fn validate(&self) -> Result<()> {
    let mut seen = HashSet::new();
    for target in &self.targets {
      if target.name.is_empty() {
        bail!("target with an empty name");
      }
      if !seen.insert(target.name.as_str()) {
        bail!("duplicate target: {}", target.name);
      }
    }
    Ok(())
  }

  /// The plan's config, or defaults overlaid with `CAIRN_*` variables.
  pub fn config(&self) -> RunConfig {
    self.config.clone().unwrap_or_else(RunConfig::from_env)
  }

  /// Shell commands run from `base`, normally the plan file's directory.
  pub fn layout(&self, base: &Path) -> Layout {
    Layout::from_entries(self.targets.iter().map(|t| t.entry(base)))
  }

  /// Durations that are negative or too large to represent are skipped.
  pub fn known_times(&self) -> HashMap<String, Duration> {
    self
      .times
      .iter()
      .filter_map(|(name, secs)| Some((name.clone(), Duration::try_from_secs_f64(*secs).ok()?)))
      .collect()
  }
}

impl PlanTarget {
  fn entry(&self, base: &Path) -> LayoutEntry {
    let mut shell_command = ShellCommand::new(self.command.as_str()).with_env(self.env.clone());
    if !base.as_os_str().is_empty() {
      shell_command = shell_command.with_cwd(base);
    }
    if let Some(shell) = &self.shell {
      shell_command = shell_command.with_shell(shell.as_str());
    }
    let command: Arc<dyn Command> = Arc::new(shell_command);

    let mut entry = LayoutEntry::target(self.name.as_str(), command);
    for dep in &self.deps {
      entry = entry.depends_on(dep);
    }
    for path in &self.file_in {
      entry = entry.file_in(&resolve(base, path));
    }
    for path in &self.file_out {
      entry = entry.file_out(&resolve(base, path));
    }
    entry.retries = self.retries;
    entry.elapsed = self.elapsed;
    entry.cpu = self.cpu;
    entry.seed = self.seed;
    entry
  }
}

// Relative paths are taken from the plan's directory, where shell commands run.
fn resolve(base: &Path, path: &str) -> String {
  if cairn_lib::keys::is_url(path) || Path::new(path).is_absolute() {
    path.to_string()
  } else {
    base.join(path).to_string_lossy().to_string()
  }
}
