//! Pi engine backend.
//!
//! Invocation: `pi --print --mode json [--session <path>] <prompt>`.
//! Resume hint: `pi --session <path>` — pi sessions are addressed by the
//! on-disk session file rather than an id.

use std::path::PathBuf;

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

pub struct PiRunner {
    engine: EngineId,
    program: String,
    extra_args: Vec<String>,
    locks: ResumeLocks,
}

impl PiRunner {
    #[must_use]
    pub fn new(engine: EngineId, config: &EngineConfig, locks: ResumeLocks) -> Self {
        Self {
            engine,
            program: config.program.clone().unwrap_or_else(|| "pi".into()),
            extra_args: config.extra_args.clone(),
            locks,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

fn format_resume(path: &str) -> String {
    format!("pi --session {path}")
}

#[async_trait]
impl Runner for PiRunner {
    fn engine_id(&self) -> &EngineId {
        &self.engine
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        for line in text.lines() {
            if let ["pi", "--session", path] = resume_line_tokens(line)[..] {
                if is_token_like(path) {
                    return Some(ResumeToken::with_session_path(
                        self.engine.clone(),
                        format_resume(path),
                        PathBuf::from(path),
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
        let mut args = vec!["--print".to_owned(), "--mode".to_owned(), "json".to_owned()];
        if let Some(ref token) = resume {
            let path = token
                .session_path
                .clone()
                .ok_or_else(|| AppError::Config("pi resume token missing session path".into()))?;
            args.push("--session".to_owned());
            args.push(path.to_string_lossy().into_owned());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(prompt.to_owned());

        let spec = SpawnSpec::new(self.program.clone(), args);

        run_exec(
            self.engine.clone(),
            spec,
            Box::new(PiTranslator::default()),
            resume,
            self.locks.clone(),
            cancel,
        )
    }
}

// ── Translator ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PiRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ok: Option<bool>,
}

#[derive(Debug, Default)]
pub struct PiTranslator {
    answer: Option<String>,
}

impl Translator for PiTranslator {
    fn note_line(&mut self, line: &str, factory: &mut EventFactory) -> Result<Vec<Event>> {
        let record: PiRecord = serde_json::from_str(line)
            .map_err(|err| AppError::Translation(format!("pi: malformed json: {err}")))?;

        match record.kind.as_str() {
            "session" => {
                let path = record.path.ok_or_else(|| {
                    AppError::Translation("pi: session record without path".into())
                })?;
                factory.set_resume(ResumeToken::with_session_path(
                    factory.engine().clone(),
                    format_resume(&path),
                    PathBuf::from(path),
                ));
                Ok(Vec::new())
            }
            "tool_execution_start" => {
                let id = record.id.ok_or_else(|| {
                    AppError::Translation("pi: tool_execution_start without id".into())
                })?;
                let name = record.name.unwrap_or_else(|| "tool".into());
                let (kind, title) = match record.label {
                    Some(label) if name == "bash" => (ActionKind::Command, label),
                    Some(label) => (ActionKind::Tool, format!("{name}: {label}")),
                    None => (ActionKind::Tool, name),
                };
                Ok(vec![factory.action_started(id, kind, title)])
            }
            "tool_execution_end" => {
                let id = record.id.ok_or_else(|| {
                    AppError::Translation("pi: tool_execution_end without id".into())
                })?;
                let status = if record.ok == Some(false) {
                    ActionStatus::Error
                } else {
                    ActionStatus::Done
                };
                Ok(vec![factory.action_completed(id, status, None, None)])
            }
            "message" => {
                if record.role.as_deref() == Some("assistant") {
                    if let Some(ref text) = record.text {
                        match self.answer {
                            Some(ref mut acc) => {
                                acc.push_str("\n\n");
                                acc.push_str(text);
                            }
                            None => self.answer = Some(text.clone()),
                        }
                    }
                }
                Ok(Vec::new())
            }
            "agent_end" => Ok(vec![factory.completed_ok(self.answer.take())]),
            other => {
                debug!(kind = other, "pi: skipping unknown record type");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self, factory: &mut EventFactory) -> Vec<Event> {
        vec![factory.completed_ok(self.answer.take())]
    }
}
