//! Worker pools.
//!
//! Both pools offer the same primitive: fan a batch of independent items out
//! across up to N workers and wait for the whole batch. Results come back in
//! item order.
//!
//! - [`LocalPool`] spawns one task per item, bounded by a semaphore.
//! - [`ClusterPool`] starts a fixed set of workers once and feeds them jobs
//!   over a channel until it is shut down. Everything a job needs travels
//!   inside the job.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

use crate::config::{PoolKind, RunConfig};

#[derive(Debug, Error)]
pub enum PoolError {
  #[error("worker pool is shut down")]
  Closed,

  #[error("worker task panicked: {0}")]
  Panicked(String),
}

pub trait WorkerPool: Send + Sync {
  /// Maximum number of items in flight.
  fn workers(&self) -> usize;

  /// Run `f` on every item and wait for all of them.
  fn run_batch<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> impl Future<Output = Result<Vec<R>, PoolError>> + Send
  where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static;
}

/// Tasks in this process, sharing memory with the caller.
#[derive(Debug, Clone)]
pub struct LocalPool {
  jobs: usize,
}

impl LocalPool {
  pub fn new(jobs: usize) -> Self {
    Self { jobs: jobs.max(1) }
  }
}

impl WorkerPool for LocalPool {
  fn workers(&self) -> usize {
    self.jobs
  }

  async fn run_batch<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, PoolError>
  where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
  {
    let semaphore = Arc::new(Semaphore::new(self.jobs));
    let f = Arc::new(f);
    let mut join_set = JoinSet::new();

    for (idx, item) in items.into_iter().enumerate() {
      let semaphore = semaphore.clone();
      let f = f.clone();
      join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await.map_err(|_| PoolError::Closed)?;
        Ok::<_, PoolError>((idx, f(item).await))
      });
    }

    collect_ordered(join_set).await
  }
}

async fn collect_ordered<R: Send + 'static>(
  mut join_set: JoinSet<Result<(usize, R), PoolError>>,
) -> Result<Vec<R>, PoolError> {
  let mut results = Vec::with_capacity(join_set.len());
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(Ok(pair)) => results.push(pair),
      Ok(Err(e)) => return Err(e),
      Err(e) => {
        error!(error = %e, "batch task panicked");
        return Err(PoolError::Panicked(e.to_string()));
      }
    }
  }
  results.sort_by_key(|(idx, _)| *idx);
  Ok(results.into_iter().map(|(_, r)| r).collect())
}

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// A persistent set of workers reached over a channel.
///
/// Workers are started once by [`ClusterPool::start`], reused for every
/// batch and stopped by [`ClusterPool::shutdown`]. A panicking job does not
/// take its worker down.
pub struct ClusterPool {
  size: usize,
  sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterPool {
  /// Start `size` workers. Must be called inside a tokio runtime.
  pub fn start(size: usize) -> Self {
    let size = size.max(1);
    let (sender, receiver) = mpsc::unbounded_channel::<Job>();
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    let workers = (0..size)
      .map(|worker| {
        let receiver = receiver.clone();
        tokio::spawn(async move {
          loop {
            let job = { receiver.lock().await.recv().await };
            let Some(job) = job else {
              break;
            };
            if let Err(e) = tokio::spawn(job()).await {
              error!(worker, error = %e, "cluster job panicked");
            }
          }
          debug!(worker, "cluster worker stopped");
        })
      })
      .collect();

    info!(workers = size, "started cluster pool");
    Self {
      size,
      sender: Mutex::new(Some(sender)),
      workers: Mutex::new(workers),
    }
  }

  /// Close the job channel and wait for every worker to finish.
  pub async fn shutdown(&self) {
    self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
    let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
    for worker in workers {
      if let Err(e) = worker.await {
        error!(error = %e, "cluster worker panicked");
      }
    }
    debug!("cluster pool shut down");
  }

  fn submit(&self, job: Job) -> Result<(), PoolError> {
    let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
    let sender = sender.as_ref().ok_or(PoolError::Closed)?;
    sender.send(job).map_err(|_| PoolError::Closed)
  }
}

impl WorkerPool for ClusterPool {
  fn workers(&self) -> usize {
    self.size
  }

  async fn run_batch<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, PoolError>
  where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
  {
    let f = Arc::new(f);
    let mut pending = Vec::with_capacity(items.len());

    for item in items {
      let (tx, rx) = oneshot::channel();
      let f = f.clone();
      let job: Job = Box::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
          let _ = tx.send(f(item).await);
        })
      });
      self.submit(job)?;
      pending.push(rx);
    }

    let mut results = Vec::with_capacity(pending.len());
    for rx in pending {
      let result = rx
        .await
        .map_err(|_| PoolError::Panicked("job dropped its result".to_string()))?;
      results.push(result);
    }
    Ok(results)
  }
}

/// The pool selected by [`RunConfig::pool`].
pub enum Pool {
  Local(LocalPool),
  Cluster(ClusterPool),
}

impl Pool {
  /// Build the configured pool. Must be called inside a tokio runtime.
  pub fn from_config(config: &RunConfig) -> Self {
    match config.pool {
      PoolKind::Local => Pool::Local(LocalPool::new(config.jobs)),
      PoolKind::Cluster => Pool::Cluster(ClusterPool::start(config.jobs)),
    }
  }

  pub async fn shutdown(&self) {
    if let Pool::Cluster(cluster) = self {
      cluster.shutdown().await;
    }
  }
}

impl WorkerPool for Pool {
  fn workers(&self) -> usize {
    match self {
      Pool::Local(pool) => pool.workers(),
      Pool::Cluster(pool) => pool.workers(),
    }
  }

  async fn run_batch<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, PoolError>
  where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
  {
    match self {
      Pool::Local(pool) => pool.run_batch(items, f).await,
      Pool::Cluster(pool) => pool.run_batch(items, f).await,
    }
  }
}
