//! Per-thread FIFO scheduler.
//!
//! Serializes runs belonging to the same chat thread while permitting
//! concurrency across threads. Each non-empty queue has exactly one
//! driver task executing jobs in submission order; the driver exits and
//! the queue entry is removed when the queue drains.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::debug;

use crate::transport::ThreadKey;

/// Queued unit of work for one thread.
pub struct ThreadJob {
    enqueued_at: Instant,
    future: BoxFuture<'static, ()>,
}

impl ThreadJob {
    #[must_use]
    pub fn new(future: impl std::future::Future<Output = ()> + Send + 'static) -> Self {
        Self {
            enqueued_at: Instant::now(),
            future: Box::pin(future),
        }
    }
}

#[derive(Default)]
struct ThreadQueue {
    jobs: VecDeque<ThreadJob>,
    driver_active: bool,
}

/// FIFO scheduler keyed by chat thread.
#[derive(Clone, Default)]
pub struct ThreadScheduler {
    inner: Arc<Mutex<HashMap<ThreadKey, ThreadQueue>>>,
}

impl ThreadScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job; spawns the thread's driver if none is running.
    ///
    /// For any single thread, jobs execute in submission order and never
    /// overlap. Distinct threads run concurrently.
    pub fn submit(&self, thread: ThreadKey, job: ThreadJob) {
        let spawn_driver = {
            let mut map = self.inner.lock();
            let queue = map.entry(thread).or_default();
            queue.jobs.push_back(job);
            if queue.driver_active {
                false
            } else {
                queue.driver_active = true;
                true
            }
        };
        if spawn_driver {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.drive(thread).await;
            });
        }
    }

    /// Mark a thread as known without enqueueing work.
    ///
    /// Used when a runner reveals the thread's resume token mid-stream,
    /// so messages arriving for the same thread queue against an existing
    /// entry instead of racing its creation.
    pub fn note_thread_known(&self, thread: ThreadKey) {
        let mut map = self.inner.lock();
        map.entry(thread).or_default();
    }

    /// Number of tracked threads (test hook).
    #[must_use]
    pub fn tracked_threads(&self) -> usize {
        self.inner.lock().len()
    }

    async fn drive(&self, thread: ThreadKey) {
        loop {
            let job = {
                let mut map = self.inner.lock();
                match map.get_mut(&thread) {
                    Some(queue) => match queue.jobs.pop_front() {
                        Some(job) => Some(job),
                        None => {
                            map.remove(&thread);
                            None
                        }
                    },
                    None => None,
                }
            };
            let Some(job) = job else {
                debug!(%thread, "thread queue drained, driver exiting");
                return;
            };
            let waited = job.enqueued_at.elapsed();
            if waited.as_millis() > 50 {
                debug!(%thread, waited_ms = waited.as_millis() as u64, "job dequeued after wait");
            }
            job.future.await;
        }
    }
}
