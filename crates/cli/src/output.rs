//! CLI output formatting utilities.
//!
//! Colored status lines, build events on stderr and JSON output.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use cairn_lib::hooks::{Event, EventKind, Reporter};
use cairn_lib::keys::display_name;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const ARROW: &str = "→";
}

/// Humantime formatting, truncated to whole milliseconds.
pub fn format_duration(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  if millis.is_zero() {
    return "0s".to_string();
  }
  humantime::format_duration(millis).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// Prints build events on stderr as they happen, keeping stdout for the
/// summary.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
  pub verbose: u8,
}

impl Reporter for ConsoleReporter {
  fn report(&self, event: &Event) {
    if event.tier > self.verbose {
      return;
    }
    let message = format!("{} {}", event.kind.as_str(), display_name(&event.key));
    match event.kind {
      EventKind::Fail => print_error(&message),
      EventKind::Retry | EventKind::Missing => print_warning(&message),
      EventKind::Target | EventKind::Import => eprintln!(
        "{} {}",
        symbols::ARROW.if_supports_color(Stream::Stderr, |s| s.cyan()),
        message
      ),
    }
  }
}
