//! Target commands.
//!
//! A command receives a [`CommandContext`] carrying the seeded generator for
//! this build, a guarded view of the shared context and a sink for warnings
//! and messages. Whatever it returns becomes the target's value.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::rngs::StdRng;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::env::{EnvError, EnvView};

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("{0}")]
  Failed(String),

  #[error(transparent)]
  Env(#[from] EnvError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("invalid value: {0}")]
  Json(#[from] serde_json::Error),

  #[error("command exited with status {code:?}: {stderr}")]
  Exit { code: Option<i32>, stderr: String },
}

impl CommandError {
  pub fn msg(message: impl Into<String>) -> Self {
    CommandError::Failed(message.into())
  }
}

/// Warnings and messages raised by one command evaluation, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
  pub warnings: Vec<String>,
  pub messages: Vec<String>,
}

impl Diagnostics {
  pub fn is_empty(&self) -> bool {
    self.warnings.is_empty() && self.messages.is_empty()
  }
}

pub struct CommandContext<'a> {
  key: &'a str,
  rng: &'a mut StdRng,
  env: EnvView<'a>,
  diagnostics: &'a mut Diagnostics,
}

impl<'a> CommandContext<'a> {
  pub fn new(key: &'a str, rng: &'a mut StdRng, env: EnvView<'a>, diagnostics: &'a mut Diagnostics) -> Self {
    Self {
      key,
      rng,
      env,
      diagnostics,
    }
  }

  /// Key of the target being built.
  pub fn key(&self) -> &str {
    self.key
  }

  /// Generator seeded for this target.
  pub fn rng(&mut self) -> &mut StdRng {
    self.rng
  }

  pub fn env(&self) -> EnvView<'a> {
    self.env
  }

  /// Record a warning. It is logged and kept, never raised.
  pub fn warn(&mut self, warning: impl Into<String>) {
    let warning = warning.into();
    warn!(key = %self.key, "{}", warning);
    self.diagnostics.warnings.push(warning);
  }

  /// Record an informational message.
  pub fn message(&mut self, message: impl Into<String>) {
    let message = message.into();
    info!(key = %self.key, "{}", message);
    self.diagnostics.messages.push(message);
  }
}

#[async_trait]
pub trait Command: Send + Sync {
  async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<Value, CommandError>;
}

/// Command backed by a synchronous closure.
pub struct FnCommand<F> {
  f: F,
}

#[async_trait]
impl<F> Command for FnCommand<F>
where
  F: Fn(&mut CommandContext<'_>) -> Result<Value, CommandError> + Send + Sync,
{
  async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<Value, CommandError> {
    (self.f)(ctx)
  }
}

pub fn from_fn<F>(f: F) -> Arc<dyn Command>
where
  F: Fn(&mut CommandContext<'_>) -> Result<Value, CommandError> + Send + Sync + 'static,
{
  Arc::new(FnCommand { f })
}

/// Command that runs a script through a shell.
///
/// The child is killed if the evaluation is abandoned, so an expired time
/// budget really stops it. Trimmed stdout is the value; each stderr line is
/// recorded as a message.
#[derive(Debug, Clone)]
pub struct ShellCommand {
  pub script: String,
  pub shell: Option<String>,
  pub cwd: Option<PathBuf>,
  pub env: BTreeMap<String, String>,
}

impl ShellCommand {
  pub fn new(script: impl Into<String>) -> Self {
    Self {
      script: script.into(),
      shell: None,
      cwd: None,
      env: BTreeMap::new(),
    }
  }

  pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
    self.cwd = Some(cwd.into());
    self
  }

  /// Run the script through `shell` instead of the platform default.
  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
    self.env = env;
    self
  }
}

pub fn shell(script: impl Into<String>) -> Arc<dyn Command> {
  Arc::new(ShellCommand::new(script))
}

#[async_trait]
impl Command for ShellCommand {
  async fn run(&self, ctx: &mut CommandContext<'_>) -> Result<Value, CommandError> {
    let (shell, args) = get_shell(self.shell.as_deref());
    let seed: u32 = ctx.rng().r#gen();

    let mut command = tokio::process::Command::new(&shell);
    command
      .args(&args)
      .arg(&self.script)
      .env("CAIRN_TARGET", ctx.key())
      .env("CAIRN_SEED", seed.to_string())
      .envs(&self.env)
      .kill_on_drop(true);
    if let Some(cwd) = &self.cwd {
      command.current_dir(cwd);
    }

    debug!(shell = %shell, script = %self.script, "spawning process");
    let output = command.output().await?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
      ctx.message(line);
    }

    if !output.status.success() {
      return Err(CommandError::Exit {
        code: output.status.code(),
        stderr: stderr.trim().to_string(),
      });
    }

    Ok(Value::String(String::from_utf8_lossy(&output.stdout).trim().to_string()))
  }
}

/// Shell binary and the flag that passes it a script.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    ("cmd.exe".to_string(), vec!["/C".to_string()])
  }
}
