//! Runner capability interface and run-scoped primitives.
//!
//! A runner adapts one engine: it spawns the engine CLI, translates its
//! JSONL dialect into domain events, and exposes each run as a finite,
//! single-use event stream. Concrete runners live in [`crate::engines`];
//! the shared driver lives in [`exec`].

pub mod codec;
pub mod exec;
pub mod process;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{EngineId, Event, ResumeToken};
use crate::Result;

/// Capacity of the translator → consumer event queue.
///
/// The translator blocks when the queue is full, giving natural
/// back-pressure against slow transports.
pub const EVENT_QUEUE_CAPACITY: usize = 128;

/// Adapter owning one engine invocation.
#[async_trait]
pub trait Runner: Send + Sync {
    /// The engine this runner drives.
    fn engine_id(&self) -> &EngineId;

    /// Scan message text for this engine's resume syntax.
    ///
    /// Pure function; no I/O. Returns the first resume token found.
    fn resolve_resume(&self, text: &str) -> Option<ResumeToken>;

    /// Start a run.
    ///
    /// The returned stream yields `Started` first, zero or more action
    /// events in source order, and exactly one terminal `Completed`.
    /// Cancelling `cancel` tears down the engine's process group and ends
    /// the stream with `Completed(ok=false, error="cancelled")`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the run cannot be set up at all;
    /// failures after setup surface through the event stream.
    async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        cancel: CancellationToken,
    ) -> Result<EventStream>;
}

/// Finite, single-use sequence of events from one run.
///
/// Dropping the stream detaches the producer; the producer notices the
/// closed channel and tears the child down.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    _producer: JoinHandle<()>,
}

impl EventStream {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Event>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            _producer: producer,
        }
    }

    /// Next event, or `None` once the run has fully terminated.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Keyed mutex pool serializing concurrent resumes of the same session.
///
/// Entries are weak-valued: the pool holds `Weak` references and an
/// entry is reclaimable as soon as no run holds its lock.
#[derive(Clone, Default)]
pub struct ResumeLocks {
    inner: Arc<parking_lot::Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>>,
}

impl ResumeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `resume_raw`, creating it if absent.
    #[must_use]
    pub fn lock_for(&self, resume_raw: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock();
        if let Some(existing) = map.get(resume_raw).and_then(Weak::upgrade) {
            return existing;
        }
        let fresh = Arc::new(tokio::sync::Mutex::new(()));
        map.insert(resume_raw.to_owned(), Arc::downgrade(&fresh));
        map.retain(|_, weak| weak.strong_count() > 0);
        fresh
    }

    /// Number of live entries (test hook).
    #[must_use]
    pub fn live_entries(&self) -> usize {
        let mut map = self.inner.lock();
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }
}
