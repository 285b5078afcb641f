//! Shared JSONL run driver.
//!
//! Drives one engine invocation end to end: acquires the per-resume lock,
//! spawns the child in its own process group, frames stdout into lines,
//! feeds each line to the engine's [`Translator`], and forwards the
//! resulting events through a bounded channel.
//!
//! Guarantees, on every exit path:
//!
//! - `Started` is the first event and exactly one `Completed` is the last.
//! - Events are delivered in the order the child emitted the underlying
//!   records, regardless of how many events one record expands to.
//! - The child's process group is terminated (cancel, translation abort,
//!   consumer gone, natural exit with stragglers).
//!
//! Failure semantics:
//!
//! - Non-zero exit → warning action carrying the stderr tail, then
//!   `Completed(ok=false)`.
//! - Malformed or unexpected JSONL → abort the run with
//!   `Completed(ok=false, error=<translator error>)`; no skip-and-continue.
//! - Cancellation → group teardown, then `Completed(ok=false,
//!   error="cancelled")`.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{Action, ActionKind, ActionStatus, EngineId, Event, EventFactory, EventPayload, ResumeToken};
use crate::runner::codec::LineCodec;
use crate::runner::process::{self, SpawnSpec};
use crate::runner::{EventStream, ResumeLocks, EVENT_QUEUE_CAPACITY};
use crate::Result;

/// Maximum characters of stderr tail carried in a warning action.
const WARNING_TAIL_CHARS: usize = 1000;

/// Translates one engine's JSONL dialect into domain events.
///
/// One record may map to zero or more events; the driver delivers them in
/// source order. An `Err` aborts the run.
pub trait Translator: Send {
    /// Translate one non-empty stdout line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Translation` for malformed or unexpected input.
    fn note_line(&mut self, line: &str, factory: &mut EventFactory) -> Result<Vec<Event>>;

    /// Synthesize trailing events after a clean EOF without a terminal
    /// record. The default closes the run successfully with no answer.
    fn finish(&mut self, factory: &mut EventFactory) -> Vec<Event> {
        vec![factory.completed_ok(None)]
    }
}

/// Start a run: spawn the producer task and hand back its event stream.
///
/// # Errors
///
/// Infallible today; kept fallible so runner setup errors have a place
/// to surface without widening the trait later.
pub fn run_exec(
    engine: EngineId,
    spec: SpawnSpec,
    translator: Box<dyn Translator>,
    resume: Option<ResumeToken>,
    locks: ResumeLocks,
    cancel: CancellationToken,
) -> Result<EventStream> {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let producer = tokio::spawn(produce(engine, spec, translator, resume, locks, cancel, tx));
    Ok(EventStream::new(rx, producer))
}

fn is_terminal(event: &Event) -> bool {
    matches!(event.payload, EventPayload::Completed { .. })
}

#[allow(clippy::too_many_lines)] // One linear run lifecycle; splitting obscures the exit paths.
async fn produce(
    engine: EngineId,
    spec: SpawnSpec,
    mut translator: Box<dyn Translator>,
    resume: Option<ResumeToken>,
    locks: ResumeLocks,
    cancel: CancellationToken,
    tx: mpsc::Sender<Event>,
) {
    let mut factory = EventFactory::with_resume(engine.clone(), resume.clone());
    let program = spec.program.clone();

    // Serialize concurrent resumes of the same session, across threads.
    let _resume_guard = match resume {
        Some(ref token) => {
            let lock = locks.lock_for(&token.raw);
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = tx.send(factory.completed_cancelled()).await;
                    return;
                }
                guard = lock.lock_owned() => Some(guard),
            }
        }
        None => None,
    };

    if tx.send(factory.started()).await.is_err() {
        return;
    }

    let (mut guard, stdout) = match process::spawn(spec) {
        Ok(pair) => pair,
        Err(err) => {
            warn!(engine = %engine, %err, "engine spawn failed");
            let action = Action::note(
                ActionKind::Warning,
                format!("failed to start {program}"),
                ActionStatus::Warning,
            )
            .with_detail(err.to_string());
            let _ = tx.send(factory.action(action)).await;
            let _ = tx.send(factory.completed_err(err.to_string())).await;
            return;
        }
    };

    let mut framed = FramedRead::new(stdout, LineCodec::new());
    let mut completed_sent = false;

    'stream: loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(engine = %engine, "run cancelled, tearing down process group");
                guard.cancel().await;
                let _ = tx.send(factory.completed_cancelled()).await;
                completed_sent = true;
                break 'stream;
            }

            item = framed.next() => match item {
                None => break 'stream,

                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match translator.note_line(&line, &mut factory) {
                        Ok(events) => {
                            for event in events {
                                let terminal = is_terminal(&event);
                                if tx.send(event).await.is_err() {
                                    debug!(engine = %engine, "consumer gone, stopping run");
                                    guard.cancel().await;
                                    return;
                                }
                                if terminal {
                                    completed_sent = true;
                                    break 'stream;
                                }
                            }
                        }
                        Err(err) => {
                            warn!(engine = %engine, %err, raw_line = %line, "translation error, aborting run");
                            guard.cancel().await;
                            let _ = tx.send(factory.completed_err(err.to_string())).await;
                            completed_sent = true;
                            break 'stream;
                        }
                    }
                }

                Some(Err(err)) => {
                    warn!(engine = %engine, %err, "stream error, aborting run");
                    guard.cancel().await;
                    let _ = tx.send(factory.completed_err(err.to_string())).await;
                    completed_sent = true;
                    break 'stream;
                }
            }
        }
    }

    if completed_sent {
        // Terminal already delivered; make sure the group is gone.
        guard.cancel().await;
        return;
    }

    // EOF without a terminal record: reap the child and close the run.
    match guard.wait().await {
        Ok(status) if status.success() => {
            for event in translator.finish(&mut factory) {
                let terminal = is_terminal(&event);
                if tx.send(event).await.is_err() {
                    return;
                }
                if terminal {
                    completed_sent = true;
                    break;
                }
            }
            if !completed_sent {
                let _ = tx.send(factory.completed_ok(None)).await;
            }
        }
        Ok(status) => {
            let summary = format!("{program} {}", process::describe_exit(status));
            let tail = truncate_tail(&guard.stderr_tail());
            let mut action = Action::note(ActionKind::Warning, summary.clone(), ActionStatus::Warning);
            if !tail.is_empty() {
                action = action.with_detail(tail);
            }
            let _ = tx.send(factory.action(action)).await;
            let _ = tx.send(factory.completed_err(summary)).await;
        }
        Err(err) => {
            let _ = tx.send(factory.completed_err(err.to_string())).await;
        }
    }
}

/// Keep the last [`WARNING_TAIL_CHARS`] characters of the stderr tail.
fn truncate_tail(tail: &str) -> String {
    let trimmed = tail.trim();
    let total = trimmed.chars().count();
    if total <= WARNING_TAIL_CHARS {
        return trimmed.to_owned();
    }
    trimmed.chars().skip(total - WARNING_TAIL_CHARS).collect()
}
