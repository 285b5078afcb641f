//! Message handler: the end-to-end per-message pipeline.
//!
//! The bridge owns transport polling and composes the whole run: route
//! the message, send the initial silent progress message, start the edit
//! worker, stream runner events through the tracker, and always deliver
//! exactly one final render — success, failure, or cancellation. A
//! `/cancel` reply targeting a progress message cancels that run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TakopiConfig;
use crate::edits::spawn_edit_worker;
use crate::model::{EngineId, EventFactory};
use crate::progress::{ProgressState, ProgressTracker};
use crate::render::Presenter;
use crate::router::{AutoRouter, Route};
use crate::scheduler::{ThreadJob, ThreadScheduler};
use crate::transport::{
    IncomingMessage, MessageRef, RenderedMessage, SendOptions, ThreadKey, Transport,
};

/// Back-off after a failed transport poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Pause before retrying a failed final delivery.
const FINAL_RETRY_DELAY: Duration = Duration::from_millis(500);

// ── Running task registry ─────────────────────────────────────────────────────

/// In-flight run coordination, keyed by the progress message so a
/// `/cancel` reply can find its target.
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub thread: ThreadKey,
    pub engine: EngineId,
    pub cancel: CancellationToken,
    pub resume_known: bool,
}

#[derive(Clone, Default)]
pub struct RunningTasks {
    inner: Arc<Mutex<HashMap<MessageRef, RunningTask>>>,
}

impl RunningTasks {
    fn insert(&self, progress: MessageRef, task: RunningTask) {
        self.inner.lock().insert(progress, task);
    }

    fn remove(&self, progress: &MessageRef) {
        self.inner.lock().remove(progress);
    }

    fn mark_resume_known(&self, progress: &MessageRef) {
        if let Some(task) = self.inner.lock().get_mut(progress) {
            task.resume_known = true;
        }
    }

    /// Cancel the run whose progress message is `progress`.
    fn cancel_by_ref(&self, progress: &MessageRef) -> bool {
        match self.inner.lock().get(progress) {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the thread's active run, if any.
    fn cancel_by_thread(&self, thread: &ThreadKey) -> bool {
        match self
            .inner
            .lock()
            .values()
            .find(|task| &task.thread == thread)
        {
            Some(task) => {
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        for task in self.inner.lock().values() {
            task.cancel.cancel();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

pub struct Bridge {
    transport: Arc<dyn Transport>,
    router: Arc<AutoRouter>,
    scheduler: ThreadScheduler,
    running: RunningTasks,
    presenter: Presenter,
    allowed_chats: HashSet<i64>,
    final_notify: bool,
    min_edit_interval: Duration,
}

impl Bridge {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<AutoRouter>,
        config: &TakopiConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            router,
            scheduler: ThreadScheduler::new(),
            running: RunningTasks::default(),
            presenter: Presenter::new(&config.progress),
            allowed_chats: config.telegram.allowed_chat_ids.iter().copied().collect(),
            final_notify: config.final_notify,
            min_edit_interval: Duration::from_millis(config.progress.min_edit_interval_ms),
        })
    }

    /// Tasks currently in flight (test hook).
    #[must_use]
    pub fn running_tasks(&self) -> RunningTasks {
        self.running.clone()
    }

    /// Poll the transport and dispatch messages until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("bridge polling for messages");
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                batch = self.transport.poll() => match batch {
                    Ok(messages) => {
                        for message in messages {
                            dispatch(&self, message, &cancel);
                        }
                    }
                    Err(err) => {
                        warn!(%err, "transport poll failed, backing off");
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                        }
                    }
                }
            }
        }
        // Shutdown: cancel in-flight runs so their handlers render the
        // terminal state within the shutdown window.
        self.running.cancel_all();
        info!("bridge poll loop exited");
    }

    async fn handle_cancel(self: Arc<Self>, message: IncomingMessage) {
        let cancelled = match message.reply {
            Some(ref reply) => self.running.cancel_by_ref(&MessageRef {
                chat_id: message.thread.chat_id,
                message_id: reply.message_id,
            }),
            None => self.running.cancel_by_thread(&message.thread),
        };
        if cancelled {
            info!(thread = %message.thread, "run cancelled by user");
        } else {
            self.send_reply(message.thread, message.message_id, "no active run to cancel")
                .await;
        }
    }

    /// The per-message pipeline, executed inside the thread's FIFO slot.
    async fn run_routed(
        self: Arc<Self>,
        message: IncomingMessage,
        route: Route,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let thread = message.thread;

        // 1. Initial silent progress message.
        let seed = ProgressState::for_engine(route.engine.clone());
        let initial = self.presenter.render_progress(&seed, Duration::ZERO);
        let opts = SendOptions {
            silent: true,
            reply_to: Some(message.message_id),
        };
        let progress_ref = match self.transport.send(thread, &initial, opts).await {
            Ok(progress_ref) => progress_ref,
            Err(err) => {
                error!(%err, thread = %thread, "failed to send initial progress message");
                return;
            }
        };

        self.running.insert(
            progress_ref,
            RunningTask {
                thread,
                engine: route.engine.clone(),
                cancel: cancel.clone(),
                resume_known: route.resume.is_some(),
            },
        );

        // 2. Edit worker bound to the progress message.
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let worker = spawn_edit_worker(
            Arc::clone(&self.transport),
            progress_ref,
            snapshot_rx,
            self.min_edit_interval,
        );

        // 3. Drive the run, folding events into the tracker.
        let mut tracker = ProgressTracker::for_engine(route.engine.clone());
        let mut resume_noted = route.resume.is_some();

        match route
            .runner
            .run(&route.prompt, route.resume.clone(), cancel.clone())
            .await
        {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if !resume_noted && event.resume.is_some() {
                        // The engine revealed its session: later messages
                        // on this thread must queue, not race.
                        resume_noted = true;
                        self.running.mark_resume_known(&progress_ref);
                        self.scheduler.note_thread_known(thread);
                    }
                    tracker.note_event(&event);
                    if tracker.state().is_terminal() {
                        break;
                    }
                    let rendered = self
                        .presenter
                        .render_progress(tracker.state(), started.elapsed());
                    let _ = snapshot_tx.send(Some(rendered));
                }
            }
            Err(err) => {
                error!(%err, engine = %route.engine, "runner failed to start");
                let factory = EventFactory::with_resume(route.engine.clone(), route.resume.clone());
                tracker.note_event(&factory.completed_err(err.to_string()));
            }
        }

        // A run must never end without a terminal state, even if the
        // producer died before emitting one.
        if !tracker.state().is_terminal() {
            warn!(engine = %route.engine, "event stream ended without a terminal event");
            let factory = EventFactory::with_resume(route.engine.clone(), route.resume.clone());
            tracker.note_event(&factory.completed_err("run ended unexpectedly"));
        }

        // 4. Close the edits channel and wait for the flush.
        drop(snapshot_tx);
        let _ = worker.await;

        // 5. Final render, delivered synchronously.
        let final_rendered = self
            .presenter
            .render_final(tracker.state(), started.elapsed());
        self.deliver_final(thread, progress_ref, &final_rendered).await;
        self.running.remove(&progress_ref);
    }

    /// Deliver the final render, retrying once on transport failure.
    async fn deliver_final(
        &self,
        thread: ThreadKey,
        progress_ref: MessageRef,
        rendered: &RenderedMessage,
    ) {
        if self.final_notify {
            // Audible new message, then drop the progress message.
            match self.send_with_retry(thread, rendered).await {
                Ok(_) => {
                    if let Err(err) = self.transport.delete(&progress_ref).await {
                        debug!(%err, "failed to delete progress message");
                    }
                }
                Err(err) => {
                    warn!(%err, "final send failed, editing progress message instead");
                    if let Err(err) = self.edit_with_retry(&progress_ref, rendered).await {
                        error!(%err, thread = %thread, "final render could not be delivered");
                    }
                }
            }
        } else if let Err(err) = self.edit_with_retry(&progress_ref, rendered).await {
            warn!(%err, "final edit failed, sending new message instead");
            if let Err(err) = self.send_with_retry(thread, rendered).await {
                error!(%err, thread = %thread, "final render could not be delivered");
            }
        }
    }

    async fn send_with_retry(
        &self,
        thread: ThreadKey,
        rendered: &RenderedMessage,
    ) -> crate::Result<MessageRef> {
        match self
            .transport
            .send(thread, rendered, SendOptions::default())
            .await
        {
            Ok(sent) => Ok(sent),
            Err(first) => {
                debug!(%first, "final send failed, retrying once");
                tokio::time::sleep(FINAL_RETRY_DELAY).await;
                self.transport
                    .send(thread, rendered, SendOptions::default())
                    .await
            }
        }
    }

    async fn edit_with_retry(
        &self,
        progress_ref: &MessageRef,
        rendered: &RenderedMessage,
    ) -> crate::Result<()> {
        match self.transport.edit(progress_ref, rendered).await {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!(%first, "final edit failed, retrying once");
                tokio::time::sleep(FINAL_RETRY_DELAY).await;
                self.transport.edit(progress_ref, rendered).await
            }
        }
    }

    async fn send_reply(&self, thread: ThreadKey, reply_to: i64, text: &str) {
        let opts = SendOptions {
            silent: false,
            reply_to: Some(reply_to),
        };
        if let Err(err) = self
            .transport
            .send(thread, &RenderedMessage::new(text), opts)
            .await
        {
            warn!(%err, thread = %thread, "failed to send reply");
        }
    }
}

/// Route one incoming message and enqueue its handler on the thread's
/// FIFO queue. Cancel commands and routing errors are handled out of
/// band — they never occupy a queue slot.
fn dispatch(bridge: &Arc<Bridge>, message: IncomingMessage, root_cancel: &CancellationToken) {
    if !bridge.allowed_chats.contains(&message.thread.chat_id) {
        debug!(chat_id = message.thread.chat_id, "message from disallowed chat dropped");
        return;
    }

    if is_cancel_command(&message.text) {
        let bridge = Arc::clone(bridge);
        tokio::spawn(bridge.handle_cancel(message));
        return;
    }

    let reply_text = message
        .reply
        .as_ref()
        .and_then(|reply| reply.text.as_deref());
    let route = match bridge.router.route(&message.text, reply_text) {
        Ok(route) => route,
        Err(err) => {
            info!(%err, thread = %message.thread, "message could not be routed");
            let bridge = Arc::clone(bridge);
            let text = err.to_string();
            tokio::spawn(async move {
                bridge
                    .send_reply(message.thread, message.message_id, &text)
                    .await;
            });
            return;
        }
    };

    if route.prompt.is_empty() {
        let bridge = Arc::clone(bridge);
        tokio::spawn(async move {
            bridge
                .send_reply(message.thread, message.message_id, "empty prompt")
                .await;
        });
        return;
    }

    debug!(
        thread = %message.thread,
        engine = %route.engine,
        resume = route.resume.is_some(),
        "message routed"
    );

    let thread = message.thread;
    let run_cancel = root_cancel.child_token();
    let scheduler = bridge.scheduler.clone();
    let bridge = Arc::clone(bridge);
    scheduler.submit(
        thread,
        ThreadJob::new(async move {
            bridge.run_routed(message, route, run_cancel).await;
        }),
    );
}

/// `/cancel` or `/cancel@botname`, as the first token.
#[must_use]
pub fn is_cancel_command(text: &str) -> bool {
    let Some(first) = text.trim().split_whitespace().next() else {
        return false;
    };
    first == "/cancel" || first.starts_with("/cancel@")
}
