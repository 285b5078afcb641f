//! Codex engine backend.
//!
//! Invocation: `codex exec --json [resume <id>] -` with the prompt on
//! stdin. Resume hint: `codex resume <id>`.
//!
//! # JSONL dialect
//!
//! | `msg.type`           | Maps to                                   |
//! |----------------------|-------------------------------------------|
//! | `session_configured` | resume token (`session_id`)               |
//! | `task_started`       | skipped                                   |
//! | `exec_command_begin` | `ActionStarted` (command)                 |
//! | `exec_command_end`   | `ActionCompleted` (by `exit_code`)        |
//! | `agent_message`      | answer text (accumulated)                 |
//! | `task_complete`      | `Completed(ok=true)`                      |
//! | `error`              | `Completed(ok=false)`                     |
//! | *(any other)*        | skipped; logged at `DEBUG`                |

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

pub struct CodexRunner {
    engine: EngineId,
    program: String,
    extra_args: Vec<String>,
    locks: ResumeLocks,
}

impl CodexRunner {
    #[must_use]
    pub fn new(engine: EngineId, config: &EngineConfig, locks: ResumeLocks) -> Self {
        Self {
            engine,
            program: config.program.clone().unwrap_or_else(|| "codex".into()),
            extra_args: config.extra_args.clone(),
            locks,
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Runner for CodexRunner {
    fn engine_id(&self) -> &EngineId {
        &self.engine
    }

    fn resolve_resume(&self, text: &str) -> Option<ResumeToken> {
        for line in text.lines() {
            if let ["codex", "resume", token] = resume_line_tokens(line)[..] {
                if is_token_like(token) {
                    return Some(ResumeToken::with_session_id(
                        self.engine.clone(),
                        format!("codex resume {token}"),
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
        let mut args = vec!["exec".to_owned(), "--json".to_owned()];
        if let Some(ref token) = resume {
            let id = token
                .session_id
                .clone()
                .ok_or_else(|| AppError::Config("codex resume token missing session id".into()))?;
            args.push("resume".to_owned());
            args.push(id);
        }
        args.extend(self.extra_args.iter().cloned());
        args.push("-".to_owned());

        let mut spec = SpawnSpec::new(self.program.clone(), args);
        spec.stdin_payload = Some(prompt.to_owned());

        run_exec(
            self.engine.clone(),
            spec,
            Box::new(CodexTranslator::default()),
            resume,
            self.locks.clone(),
            cancel,
        )
    }
}

// ── Translator ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CodexRecord {
    msg: CodexMsg,
}

#[derive(Debug, Deserialize)]
struct CodexMsg {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    command: Option<serde_json::Value>,
    #[serde(default)]
    exit_code: Option<i32>,
}

#[derive(Debug, Default)]
pub struct CodexTranslator {
    answer: Option<String>,
}

impl CodexTranslator {
    fn push_answer(&mut self, text: &str) {
        match self.answer {
            Some(ref mut answer) => {
                answer.push_str("\n\n");
                answer.push_str(text);
            }
            None => self.answer = Some(text.to_owned()),
        }
    }
}

impl Translator for CodexTranslator {
    fn note_line(&mut self, line: &str, factory: &mut EventFactory) -> Result<Vec<Event>> {
        let record: CodexRecord = serde_json::from_str(line)
            .map_err(|err| AppError::Translation(format!("codex: malformed json: {err}")))?;
        let msg = record.msg;

        match msg.kind.as_str() {
            "session_configured" => {
                let id = msg.session_id.ok_or_else(|| {
                    AppError::Translation("codex: session_configured without session_id".into())
                })?;
                factory.set_resume(ResumeToken::with_session_id(
                    factory.engine().clone(),
                    format!("codex resume {id}"),
                    id,
                ));
                Ok(Vec::new())
            }
            "task_started" => Ok(Vec::new()),
            "exec_command_begin" => {
                let call_id = msg.call_id.ok_or_else(|| {
                    AppError::Translation("codex: exec_command_begin without call_id".into())
                })?;
                let title = msg.command.map(format_command).unwrap_or_default();
                Ok(vec![factory.action_started(call_id, ActionKind::Command, title)])
            }
            "exec_command_end" => {
                let call_id = msg.call_id.ok_or_else(|| {
                    AppError::Translation("codex: exec_command_end without call_id".into())
                })?;
                let status = match msg.exit_code {
                    Some(code) if code != 0 => ActionStatus::Error,
                    _ => ActionStatus::Done,
                };
                Ok(vec![factory.action_completed(call_id, status, None, msg.exit_code)])
            }
            "agent_message" => {
                if let Some(ref text) = msg.message {
                    self.push_answer(text);
                }
                Ok(Vec::new())
            }
            "task_complete" => Ok(vec![factory.completed_ok(self.answer.take())]),
            "error" => {
                let error = msg.message.unwrap_or_else(|| "codex reported an error".into());
                Ok(vec![factory.completed_err(error)])
            }
            other => {
                debug!(kind = other, "codex: skipping unknown record type");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self, factory: &mut EventFactory) -> Vec<Event> {
        vec![factory.completed_ok(self.answer.take())]
    }
}

/// Render the `command` payload (argv array or plain string) as a title.
fn format_command(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(parts) => parts
            .iter()
            .map(|part| part.as_str().map_or_else(|| part.to_string(), str::to_owned))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}
