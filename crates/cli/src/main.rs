mod cmd;
mod output;
mod plan;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use cairn_lib::config::PoolKind;

use crate::cmd::{MakeArgs, PredictArgs};
use crate::output::{OutputFormat, print_error};

/// cairn - incremental build engine
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every outdated target of a plan file
  Make {
    /// Path to the JSON plan file
    plan: PathBuf,

    /// Number of parallel workers
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Record failures and keep building independent targets
    #[arg(short, long)]
    keep_going: bool,

    /// Retries after a failed attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Worker pool to run targets on
    #[arg(long, value_enum)]
    pool: Option<PoolArg>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Predict how long building a plan takes
  Predict {
    /// Path to the JSON plan file
    plan: PathBuf,

    /// Number of parallel workers
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Duration of targets with no known time (e.g. "30s", "2m")
    #[arg(long, value_parser = humantime::parse_duration)]
    default_time: Option<Duration>,

    /// Only predict these targets and what they depend on
    #[arg(long, value_delimiter = ',')]
    targets: Vec<String>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show the key a dependency name is stored under
  Key {
    /// A plain name or a namespace::symbol reference
    name: String,

    /// Treat the name as a file path or URL
    #[arg(short, long)]
    file: bool,
  },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PoolArg {
  Local,
  Cluster,
}

impl From<PoolArg> for PoolKind {
  fn from(arg: PoolArg) -> Self {
    match arg {
      PoolArg::Local => PoolKind::Local,
      PoolArg::Cluster => PoolKind::Cluster,
    }
  }
}

fn main() {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  if let Err(e) = run(cli) {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

fn run(cli: Cli) -> Result<()> {
  match cli.command {
    Commands::Make {
      plan,
      jobs,
      keep_going,
      retries,
      pool,
      output,
    } => cmd::cmd_make(MakeArgs {
      plan,
      jobs,
      keep_going,
      retries,
      pool: pool.map(PoolKind::from),
      verbose: cli.verbose,
      output,
    }),
    Commands::Predict {
      plan,
      jobs,
      default_time,
      targets,
      output,
    } => cmd::cmd_predict(PredictArgs {
      plan,
      jobs,
      default_time,
      targets,
      output,
    }),
    Commands::Key { name, file } => {
      cmd::cmd_key(&name, file);
      Ok(())
    }
  }
}
