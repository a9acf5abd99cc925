//! Request batching
//!
//! Requests are queued and flushed together, either once `batch_size` are
//! waiting or `batch_timeout` after the first one arrived. A flushed batch
//! runs in chunks of at most `max_concurrent` requests.
//!
//! A job is tied to the caller waiting for it: dropping the `submit` future
//! (a timeout, a cancelled load) aborts the job, so its work never outlives
//! the caller.

use crate::error::Error;
use crate::recovery::{ErrorKind, FetchError, RaceSubtype};
use crate::types::lock;
use futures::future::{join_all, AbortHandle, Abortable, BoxFuture};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// A queued unit of work
pub type BatchJob<V> = BoxFuture<'static, Result<V, FetchError>>;

struct Pending<V> {
    job: BatchJob<V>,
    reply: oneshot::Sender<Result<V, FetchError>>,
}

struct Queue<V> {
    pending: Vec<Pending<V>>,
    /// Bumped on every flush so stale timers leave later batches alone
    generation: u64,
}

/// Size- and time-triggered request queue
pub struct BatchQueue<V> {
    queue: Arc<Mutex<Queue<V>>>,
    batch_size: usize,
    timeout: Duration,
    max_concurrent: usize,
    flushed: Arc<AtomicU64>,
}

impl<V: Send + 'static> BatchQueue<V> {
    /// Create a queue
    pub fn new(batch_size: usize, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Queue {
                pending: Vec::new(),
                generation: 0,
            })),
            batch_size: batch_size.max(1),
            timeout,
            max_concurrent: max_concurrent.max(1),
            flushed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue `job` and wait for its result
    ///
    /// Must be called within a tokio runtime. Dropping the returned future
    /// aborts the job, whether it is still queued or already running.
    pub async fn submit(&self, job: BatchJob<V>) -> Result<V, FetchError> {
        let (reply, rx) = oneshot::channel();
        let (handle, registration) = AbortHandle::new_pair();
        let _abort = AbortOnDrop(handle);
        let job: BatchJob<V> = Abortable::new(job, registration)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(cancelled())))
            .boxed();

        let (ready, arm) = {
            let mut queue = lock(&self.queue);
            queue.pending.push(Pending { job, reply });
            if queue.pending.len() >= self.batch_size {
                (Some(take(&mut queue)), None)
            } else if queue.pending.len() == 1 {
                (None, Some(queue.generation))
            } else {
                (None, None)
            }
        };

        if let Some(batch) = ready {
            debug!(size = batch.len(), "Batch full, flushing");
            self.spawn_run(batch);
        }
        if let Some(generation) = arm {
            self.arm_timer(generation);
        }

        rx.await.unwrap_or_else(|_| Err(cancelled()))
    }

    /// Flush whatever is queued and wait for it to finish
    pub async fn flush(&self) {
        let batch = take(&mut lock(&self.queue));
        if !batch.is_empty() {
            self.flushed.fetch_add(1, Ordering::Relaxed);
            run(batch, self.max_concurrent).await;
        }
    }

    /// Requests waiting for a flush
    pub fn pending(&self) -> usize {
        lock(&self.queue).pending.len()
    }

    /// Batches flushed so far
    pub fn batches_flushed(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    fn spawn_run(&self, batch: Vec<Pending<V>>) {
        self.flushed.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(run(batch, self.max_concurrent));
    }

    fn arm_timer(&self, generation: u64) {
        let queue = Arc::clone(&self.queue);
        let flushed = Arc::clone(&self.flushed);
        let timeout = self.timeout;
        let max_concurrent = self.max_concurrent;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let batch = {
                let mut queue = lock(&queue);
                if queue.generation != generation {
                    return;
                }
                take(&mut queue)
            };
            if batch.is_empty() {
                return;
            }
            debug!(size = batch.len(), "Batch timer fired, flushing");
            flushed.fetch_add(1, Ordering::Relaxed);
            run(batch, max_concurrent).await;
        });
    }
}

impl<V> std::fmt::Debug for BatchQueue<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueue")
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

/// Aborts a submitted job when its caller stops waiting
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn cancelled() -> FetchError {
    FetchError::new(Error::BatchCancelled.to_string())
        .context("code", ErrorKind::RaceCondition(RaceSubtype::OperationCancelled).code())
}

fn take<V>(queue: &mut Queue<V>) -> Vec<Pending<V>> {
    queue.generation += 1;
    std::mem::take(&mut queue.pending)
}

async fn run<V>(batch: Vec<Pending<V>>, max_concurrent: usize) {
    let mut rest = batch.into_iter();
    loop {
        let chunk: Vec<Pending<V>> = rest.by_ref().take(max_concurrent).collect();
        if chunk.is_empty() {
            break;
        }
        let (jobs, replies): (Vec<_>, Vec<_>) = chunk.into_iter().map(|p| (p.job, p.reply)).unzip();
        let results = join_all(jobs).await;
        for (reply, result) in replies.into_iter().zip(results) {
            // The caller may have given up waiting
            let _ = reply.send(result);
        }
    }
}
