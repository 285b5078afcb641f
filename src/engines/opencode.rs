//! OpenCode engine backend.
//!
//! Invocation: `opencode run --format json [--continue <id>] <prompt>`.
//! Resume hint: `opencode run --continue <id>`.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::engines::{is_token_like, resume_line_tokens};
use crate::model::{ActionKind, ActionStatus, EngineId, Event, EventFactory, ResumeToken};
use crate::runner::exec::{run_exec, Translator};
use crate::runner::process::SpawnSpec;
use crate::runner::{EventStream, ResumeLocks, Runner};
use crate::{AppError, Result};

pub struct OpenCodeRunner {
    engine: EngineId,
    program: String,
    extra_args: Vec<String>,
    locks: ResumeLocks,
}

impl OpenCodeRunner {
    #[must_use]
    pub fn new(engine: EngineId, config: &EngineConfig, locks: ResumeLocks) -> Self {
        Self {
            engine,
            program: config.program.clone().unwrap_or_else(|| "opencode".into()),
            extra_args: config.extra_args.clone(),
            locks,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

fn format_resume(session_id: &str) -> String {
    format!("opencode run --continue {session_id}")
}

#[async_trait]
impl Runner for OpenCodeRunner {
    fn engine_id(&self) -> &EngineId {
        &self.engine
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        for line in text.lines() {
            if let ["opencode", "run", "--continue", token] = resume_line_tokens(line)[..] {
                if is_token_like(token) {
                    return Some(ResumeToken::with_session_id(
                        self.engine.clone(),
                        format_resume(token),
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
        let mut args = vec!["run".to_owned(), "--format".to_owned(), "json".to_owned()];
        if let Some(ref token) = resume {
            let id = token.session_id.clone().ok_or_else(|| {
                AppError::Config("opencode resume token missing session id".into())
            })?;
            args.push("--continue".to_owned());
            args.push(id);
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(prompt.to_owned());

        let spec = SpawnSpec::new(self.program.clone(), args);

        run_exec(
            self.engine.clone(),
            spec,
            Box::new(OpenCodeTranslator::default()),
            resume,
            self.locks.clone(),
            cancel,
        )
    }
}

// ── Translator ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenCodeRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[serde(rename = "callID", default)]
    call_id: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ok: Option<bool>,
}

#[derive(Debug, Default)]
pub struct OpenCodeTranslator {
    answer: Option<String>,
}

impl Translator for OpenCodeTranslator {
    fn note_line(&mut self, line: &str, factory: &mut EventFactory) -> Result<Vec<Event>> {
        let record: OpenCodeRecord = serde_json::from_str(line)
            .map_err(|err| AppError::Translation(format!("opencode: malformed json: {err}")))?;

        match record.kind.as_str() {
            "session.start" => {
                let id = record.session_id.ok_or_else(|| {
                    AppError::Translation("opencode: session.start without sessionID".into())
                })?;
                factory.set_resume(ResumeToken::with_session_id(
                    factory.engine().clone(),
                    format_resume(&id),
                    id,
                ));
                Ok(Vec::new())
            }
            "tool.start" => {
                let call_id = record.call_id.ok_or_else(|| {
                    AppError::Translation("opencode: tool.start without callID".into())
                })?;
                let tool = record.tool.unwrap_or_else(|| "tool".into());
                let title = match record.title {
                    Some(ref title) if !title.is_empty() => format!("{tool}: {title}"),
                    _ => tool,
                };
                Ok(vec![factory.action_started(call_id, ActionKind::Tool, title)])
            }
            "tool.end" => {
                let call_id = record.call_id.ok_or_else(|| {
                    AppError::Translation("opencode: tool.end without callID".into())
                })?;
                let status = if record.ok == Some(false) {
                    ActionStatus::Error
                } else {
                    ActionStatus::Done
                };
                Ok(vec![factory.action_completed(call_id, status, None, None)])
            }
            "text" => {
                if let Some(ref text) = record.text {
                    match self.answer {
                        Some(ref mut acc) => {
                            acc.push_str(text);
                        }
                        None => self.answer = Some(text.clone()),
                    }
                }
                Ok(Vec::new())
            }
            "session.end" => {
                if record.ok == Some(false) {
                    Ok(vec![factory.completed_err("opencode run failed")])
                } else {
                    Ok(vec![factory.completed_ok(self.answer.take())])
                }
            }
            other => {
                debug!(kind = other, "opencode: skipping unknown record type");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self, factory: &mut EventFactory) -> Vec<Event> {
        vec![factory.completed_ok(self.answer.take())]
    }
}
