//! Time budgets around a command evaluation.
//!
//! Elapsed time is wall-clock time since the budget was created. Cpu time is
//! the time spent inside `poll` of the wrapped future, i.e. time the command
//! actually occupied a worker thread. A future that overruns either limit
//! resolves to [`Overrun`] even if it managed to finish, since a blocking
//! command can only be checked after the fact.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::time::Sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overrun {
  Elapsed(Duration),
  Cpu(Duration),
}

impl fmt::Display for Overrun {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Overrun::Elapsed(limit) => write!(f, "reached elapsed time limit of {}", humanize(*limit)),
      Overrun::Cpu(limit) => write!(f, "reached cpu time limit of {}", humanize(*limit)),
    }
  }
}

fn humanize(d: Duration) -> String {
  format!("{:.3}s", d.as_secs_f64())
}

pub struct Budget<F> {
  inner: Pin<Box<F>>,
  started: Instant,
  elapsed: Option<(Duration, Pin<Box<Sleep>>)>,
  cpu: Option<Duration>,
  cpu_used: Duration,
}

impl<F: Future> Budget<F> {
  /// Must be called inside a tokio runtime when `elapsed` is set.
  pub fn new(inner: F, elapsed: Option<Duration>, cpu: Option<Duration>) -> Self {
    Self {
      inner: Box::pin(inner),
      started: Instant::now(),
      elapsed: elapsed.map(|limit| (limit, Box::pin(tokio::time::sleep(limit)))),
      cpu,
      cpu_used: Duration::ZERO,
    }
  }

  fn overrun(&self) -> Option<Overrun> {
    if let Some(limit) = self.cpu
      && self.cpu_used > limit
    {
      return Some(Overrun::Cpu(limit));
    }
    if let Some((limit, _)) = &self.elapsed
      && self.started.elapsed() > *limit
    {
      return Some(Overrun::Elapsed(*limit));
    }
    None
  }
}

impl<F: Future> Future for Budget<F> {
  type Output = Result<F::Output, Overrun>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();

    let poll_started = Instant::now();
    let polled = this.inner.as_mut().poll(cx);
    this.cpu_used += poll_started.elapsed();

    if let Some(overrun) = this.overrun() {
      return Poll::Ready(Err(overrun));
    }
    if let Poll::Ready(output) = polled {
      return Poll::Ready(Ok(output));
    }
    if let Some((limit, deadline)) = &mut this.elapsed
      && deadline.as_mut().poll(cx).is_ready()
    {
      return Poll::Ready(Err(Overrun::Elapsed(*limit)));
    }
    Poll::Pending
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn finishes_within_budget() {
    let result = Budget::new(async { 5 }, Some(Duration::from_secs(5)), Some(Duration::from_secs(5))).await;
    assert_eq!(result, Ok(5));
  }

  #[tokio::test]
  async fn unlimited_budget_never_expires() {
    let result = Budget::new(
      async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        "done"
      },
      None,
      None,
    )
    .await;
    assert_eq!(result, Ok("done"));
  }

  #[tokio::test]
  async fn pending_future_hits_elapsed_limit() {
    let limit = Duration::from_millis(20);
    let result = Budget::new(std::future::pending::<()>(), Some(limit), None).await;
    assert_eq!(result, Err(Overrun::Elapsed(limit)));
  }

  #[tokio::test]
  async fn blocking_future_hits_cpu_limit() {
    let limit = Duration::from_millis(10);
    let result = Budget::new(
      async {
        std::thread::sleep(Duration::from_millis(40));
      },
      None,
      Some(limit),
    )
    .await;
    assert_eq!(result, Err(Overrun::Cpu(limit)));
  }

  #[tokio::test]
  async fn waiting_does_not_count_as_cpu() {
    let result = Budget::new(
      async {
        tokio::time::sleep(Duration::from_millis(40)).await;
      },
      None,
      Some(Duration::from_millis(20)),
    )
    .await;
    assert!(result.is_ok());
  }

  #[test]
  fn overrun_messages() {
    assert_eq!(
      Overrun::Elapsed(Duration::from_millis(1500)).to_string(),
      "reached elapsed time limit of 1.500s"
    );
  }
}
