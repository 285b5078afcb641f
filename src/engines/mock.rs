//! In-process mock engine.
//!
//! Emits a scripted event sequence without spawning a subprocess. Used
//! by the test suite and selectable in config for dry runs. The mock
//! honors the per-resume lock pool so resume-serialization behavior can
//! be exercised without a real engine.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engines::{is_token_like, resume_line_tokens};
use crate::model::{
    Action, ActionKind, ActionStatus, EngineId, EventFactory, ResumeToken,
};
use crate::runner::{EventStream, ResumeLocks, Runner, EVENT_QUEUE_CAPACITY};
use crate::Result;

/// Session id baked into every mock resume token.
pub const MOCK_SESSION_ID: &str = "mock-session";

/// What the mock should do for each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockScript {
    /// Started, one "thinking" action, `Completed(ok, answer = echo)`.
    Happy,
    /// Started, warning action, `Completed(ok=false)`.
    Fail,
    /// Started, then park until cancelled.
    Hang,
}

pub struct MockRunner {
    engine: EngineId,
    script: MockScript,
    locks: ResumeLocks,
    /// Delay between scripted events; tests keep this small.
    step_delay: Duration,
}

impl MockRunner {
    #[must_use]
    pub fn new(engine: EngineId, locks: ResumeLocks) -> Self {
        Self::with_script(engine, locks, MockScript::Happy)
    }

    #[must_use]
    pub fn with_script(engine: EngineId, locks: ResumeLocks, script: MockScript) -> Self {
        Self {
            engine,
            script,
            locks,
            step_delay: Duration::from_millis(20),
        }
    }

    #[must_use]
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn resume_token(&self) -> ResumeToken {
        ResumeToken::with_session_id(
            self.engine.clone(),
            format!("mock resume {MOCK_SESSION_ID}"),
            MOCK_SESSION_ID,
        )
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn engine_id(&self) -> &EngineId {
        &self.engine
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        for line in text.lines() {
            if let ["mock", "resume", token] = resume_line_tokens(line)[..] {
                if is_token_like(token) {
                    return Some(ResumeToken::with_session_id(
                        self.engine.clone(),
                        format!("mock resume {token}"),
                        token,
                    ));
                }
            }
        }
        None
    }

    async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let engine = self.engine.clone();
        let script = self.script;
        let locks = self.locks.clone();
        let delay = self.step_delay;
        let prompt = prompt.to_owned();
        let fresh_token = self.resume_token();

        let producer = tokio::spawn(async move {
            let mut factory = EventFactory::with_resume(engine, resume.clone());

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

            match script {
                MockScript::Happy => {
                    if pause(delay, &cancel).await {
                        let _ = tx.send(factory.completed_cancelled()).await;
                        return;
                    }
                    let _ = tx
                        .send(factory.action_started("mock-1", ActionKind::Tool, "thinking"))
                        .await;
                    if pause(delay, &cancel).await {
                        let _ = tx.send(factory.completed_cancelled()).await;
                        return;
                    }
                    let _ = tx
                        .send(factory.action_completed("mock-1", ActionStatus::Done, None, None))
                        .await;
                    if factory.resume().is_none() {
                        factory.set_resume(fresh_token);
                    }
                    let _ = tx
                        .send(factory.completed_ok(Some(format!("echo: {prompt}"))))
                        .await;
                }
                MockScript::Fail => {
                    let action = Action::note(
                        ActionKind::Warning,
                        "mock exited with code 2",
                        ActionStatus::Warning,
                    )
                    .with_detail("mock stderr tail");
                    let _ = tx.send(factory.action(action)).await;
                    let _ = tx.send(factory.completed_err("mock exited with code 2")).await;
                }
                MockScript::Hang => {
                    cancel.cancelled().await;
                    let _ = tx.send(factory.completed_cancelled()).await;
                }
            }
        });

        Ok(EventStream::new(rx, producer))
    }
}

/// Sleep for `delay`, returning `true` if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}
